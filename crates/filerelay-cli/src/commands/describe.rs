use std::path::Path;

use filerelay_engine::orchestrator;

use crate::error::CliError;

/// Execute the `describe` command: print the assembled pipelines.
pub fn execute(config_path: &Path) -> Result<(), CliError> {
    let (_, pipelines) = super::load(config_path)?;
    print!("{}", orchestrator::describe(&pipelines));
    Ok(())
}
