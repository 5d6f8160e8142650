//! Shared integration-test helpers: fixtures, the `tickstate` binary, and
//! small `State` implementations for driving machines directly.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tickstate::fsm::{State, StateError, wait_ticks};
use tokio_util::sync::CancellationToken;

/// Path of a file under `tests/fixtures`.
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

/// Runs the `tickstate` binary to completion.
#[allow(clippy::missing_panics_doc)]
pub fn run_tickstate(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_tickstate"))
        .args(args)
        .env_remove("TICKSTATE_LOG_LEVEL")
        .output()
        .expect("failed to run tickstate")
}

/// Runs `tickstate run <fixture> --fast --events <file>` and returns the
/// process output plus the parsed event lines.
#[allow(clippy::missing_panics_doc)]
pub fn run_fixture(name: &str, extra: &[&str]) -> (Output, Vec<serde_json::Value>) {
    let dir = tempfile::tempdir().expect("tempdir");
    let events = dir.path().join("events.jsonl");
    let fixture = fixture_path(name);

    let mut args = vec![
        "run",
        fixture.to_str().expect("non-UTF-8 fixture path"),
        "--fast",
        "--events",
        events.to_str().expect("non-UTF-8 temp path"),
    ];
    args.extend_from_slice(extra);
    let output = run_tickstate(&args);

    let lines = read_events(&events);
    (output, lines)
}

/// Parses a JSONL event file; a missing file yields no events.
pub fn read_events(path: &Path) -> Vec<serde_json::Value> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).expect("event line should be JSON"))
        .collect()
}

/// Shared, ordered record of lifecycle calls.
pub type CallLog = Arc<Mutex<Vec<String>>>;

/// A state that records every lifecycle call as `"<id>.<call>"`, with
/// optional tick delays on its async enter and exit.
pub struct Recorder {
    pub id: &'static str,
    pub log: CallLog,
    pub enter_ticks: u32,
    pub exit_ticks: u32,
}

impl Recorder {
    pub fn new(id: &'static str, log: &CallLog) -> Self {
        Self {
            id,
            log: Arc::clone(log),
            enter_ticks: 0,
            exit_ticks: 0,
        }
    }

    pub const fn with_enter_ticks(mut self, ticks: u32) -> Self {
        self.enter_ticks = ticks;
        self
    }

    pub const fn with_exit_ticks(mut self, ticks: u32) -> Self {
        self.exit_ticks = ticks;
        self
    }

    fn record(&self, call: &str) {
        self.log.lock().unwrap().push(format!("{}.{call}", self.id));
    }
}

#[async_trait]
impl<C: Send + Sync + 'static> State<C> for Recorder {
    fn enter(&mut self, _ctx: &C) -> Result<(), StateError> {
        self.record("enter");
        Ok(())
    }

    async fn enter_async(&mut self, _ctx: &C, _cancel: &CancellationToken) -> Result<(), StateError> {
        wait_ticks(self.enter_ticks).await;
        self.record("enter_async");
        Ok(())
    }

    fn exit(&mut self, _ctx: &C) -> Result<(), StateError> {
        self.record("exit");
        Ok(())
    }

    async fn exit_async(&mut self, _ctx: &C, _cancel: &CancellationToken) -> Result<(), StateError> {
        wait_ticks(self.exit_ticks).await;
        self.record("exit_async");
        Ok(())
    }
}

/// Drains and returns the call log.
pub fn take_calls(log: &CallLog) -> Vec<String> {
    std::mem::take(&mut *log.lock().unwrap())
}
