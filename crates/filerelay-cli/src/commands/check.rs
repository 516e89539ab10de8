use std::path::Path;

use filerelay_engine::open_store;

use crate::error::CliError;

/// Execute the `check` command: parse, validate and assemble without running.
pub fn execute(config_path: &Path) -> Result<(), CliError> {
    let (config, pipelines) = super::load(config_path)?;
    println!("Configuration:     OK");
    for pipeline in &pipelines {
        println!(
            "  {:<16} {} stage(s){}",
            pipeline.name,
            pipeline.stages.len(),
            if pipeline.thread { ", threaded" } else { "" }
        );
    }

    let store = open_store(&config.state)?;
    println!("State backend:     OK ({})", store.location());

    println!("\nAll checks passed.");
    Ok(())
}
