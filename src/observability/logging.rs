//! Logging for the `tickstate` binary.
//!
//! The engine logs through `tracing` with `machine`, `state`, `from`/`to`
//! and `session` fields. Verbosity raises the level of the `tickstate`
//! target only; dependencies stay at `warn` so a `-vv` run shows machine
//! transitions rather than runtime internals. `TICKSTATE_LOG_LEVEL`
//! replaces the whole filter.

use std::io::IsTerminal;
use tracing_subscriber::EnvFilter;

use crate::cli::args::ColorChoice;

/// Environment variable holding a full filter, e.g. `tickstate=trace`.
pub const LOG_LEVEL_ENV: &str = "TICKSTATE_LOG_LEVEL";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Compact lines on stderr, colored when attached to a terminal
    #[default]
    Human,
    /// One JSON object per line with event fields flattened
    Json,
}

/// Level for the `tickstate` target at a given `-v` count.
///
/// 0 is `warn`, 1 `info` (state changes), 2 `debug` (triggers and script
/// steps), 3 and above `trace`.
#[must_use]
pub const fn verbosity_to_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Filter used when `TICKSTATE_LOG_LEVEL` is unset.
#[must_use]
pub fn default_filter(verbosity: u8) -> String {
    format!("warn,tickstate={}", verbosity_to_directive(verbosity))
}

fn use_ansi(color: ColorChoice) -> bool {
    match color {
        ColorChoice::Auto => {
            std::io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none()
        }
        ColorChoice::Always => true,
        ColorChoice::Never => false,
    }
}

/// Installs the global subscriber on stderr.
///
/// Stdout is left to command output and `--events -`. A second call is a
/// no-op.
pub fn init_logging(format: LogFormat, verbosity: u8, color: ColorChoice) {
    let filter = EnvFilter::try_from_env(LOG_LEVEL_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbosity)));
    // Module paths only help once debug output is on.
    let show_target = verbosity >= 2;

    let installed = match format {
        LogFormat::Human => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(use_ansi(color))
            .with_target(show_target)
            .with_writer(std::io::stderr)
            .try_init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .flatten_event(true)
            .with_target(show_target)
            .with_writer(std::io::stderr)
            .try_init(),
    };
    if installed.is_ok() {
        tracing::debug!(?format, verbosity, "logging initialized");
    }
}
