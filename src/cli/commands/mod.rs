//! CLI command dispatch and handlers.

pub mod run;
pub mod validate;
pub mod version;

use tokio_util::sync::CancellationToken;

use crate::cli::args::{Cli, Commands};
use crate::error::TickstateError;

/// Dispatches a parsed CLI invocation to its command handler.
///
/// # Errors
///
/// Returns an error if the dispatched command handler fails.
pub async fn dispatch(cli: Cli, cancel: CancellationToken) -> Result<(), TickstateError> {
    match cli.command {
        Commands::Run(args) => run::run(&args, cli.quiet, cancel).await,
        Commands::Validate(args) => validate::validate(&args),
        Commands::Version(args) => {
            version::run(&args);
            Ok(())
        }
    }
}
