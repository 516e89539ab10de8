use std::path::Path;

use filerelay_engine::{open_store, orchestrator};

use crate::error::CliError;

/// Execute the `state` command: print each stage's checkpoint.
///
/// Read-only, so it does not take the instance lock.
pub fn execute(config_path: &Path) -> Result<(), CliError> {
    let (config, pipelines) = super::load(config_path)?;
    let store = open_store(&config.state)?;
    println!("State: {}", store.location());

    for checkpoint in orchestrator::list_checkpoints(&pipelines, store.as_ref()) {
        if !checkpoint.enabled {
            println!("{}: state disabled", checkpoint.id);
            continue;
        }
        match checkpoint.keys {
            Ok(keys) => {
                println!("{}: {} item(s)", checkpoint.id, keys.len());
                for key in keys {
                    println!("  {key}");
                }
            }
            Err(e) => println!("{}: unreadable ({e})", checkpoint.id),
        }
    }
    Ok(())
}
