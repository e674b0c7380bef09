use crate::cli::{actions::Action, commands, dispatch, telemetry};
use anyhow::Result;

/// Parse arguments, install telemetry and build the action to run.
///
/// Telemetry comes up before dispatch so argument errors are logged too.
///
/// # Errors
/// Returns an error if telemetry initialization or argument validation fails.
pub fn start() -> Result<Action> {
    let matches = commands::new().get_matches();
    telemetry::init(commands::logging::level(&matches))?;
    dispatch::handler(&matches)
}
