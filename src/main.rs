//! `tickstate` - tick-driven state machine simulator

use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

use clap::Parser;
use tokio_util::sync::CancellationToken;

use tickstate::cli::args::{Cli, OutputFormat};
use tickstate::cli::commands;
use tickstate::error::ExitCode;
use tickstate::observability::{LogFormat, init_logging};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if !cli.quiet {
        let format = match cli.log_format {
            OutputFormat::Human => LogFormat::Human,
            OutputFormat::Json => LogFormat::Json,
        };
        init_logging(format, cli.verbose, cli.color);
    }

    let cancel = CancellationToken::new();
    let signal_code = Arc::new(AtomicI32::new(ExitCode::SUCCESS));

    // First signal stops the run; a second one exits immediately
    {
        let cancel = cancel.clone();
        let signal_code = Arc::clone(&signal_code);
        tokio::spawn(async move {
            let Ok(mut sigterm) =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            else {
                tracing::error!("failed to register SIGTERM handler");
                return;
            };

            let code = tokio::select! {
                _ = tokio::signal::ctrl_c() => ExitCode::INTERRUPTED,
                _ = sigterm.recv() => ExitCode::TERMINATED,
            };
            signal_code.store(code, Ordering::SeqCst);
            cancel.cancel();

            eprintln!("\nShutting down gracefully... (press Ctrl+C again to force)");

            tokio::select! {
                _ = tokio::signal::ctrl_c() => std::process::exit(ExitCode::INTERRUPTED),
                _ = sigterm.recv() => std::process::exit(ExitCode::TERMINATED),
            }
        });
    }

    match commands::dispatch(cli, cancel).await {
        Ok(()) => std::process::exit(signal_code.load(Ordering::SeqCst)),
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(e.exit_code());
        }
    }
}
