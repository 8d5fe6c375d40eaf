use crate::cli::actions::{Action, server};
use anyhow::Result;

/// Run the selected action. New subcommands plug in as further
/// `Action::*` arms.
/// # Errors
/// Propagates the action's failure.
pub async fn execute(action: Action) -> Result<()> {
    match action {
        Action::Server(args) => server::execute(args).await,
    }
}
