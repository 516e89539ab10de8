use std::path::Path;
use std::time::Instant;

use filerelay_engine::{open_store, run_all, PipelineReport};

use crate::error::CliError;
use crate::lock::InstanceLock;

/// Execute the `run` command: assemble, lock, run every pipeline once.
///
/// The lock is taken only once the configuration assembled, so a broken or
/// missing configuration never touches the lock file.
pub async fn execute(config_path: &Path, measure: bool) -> Result<(), CliError> {
    let started = Instant::now();
    let (config, pipelines) = super::load(config_path)?;
    let _lock = InstanceLock::acquire(config_path)?;

    let store = open_store(&config.state)?;
    tracing::info!(
        pipelines = pipelines.len(),
        state = %store.location(),
        "Starting run"
    );

    let report = run_all(pipelines, store).await;

    print!("{report}");
    let completed: usize = report.pipelines.iter().map(|p| p.completed.len()).sum();
    println!("Completed {completed} item(s) in {:.2}s", report.duration.as_secs_f64());
    if measure {
        println!("Elapsed:  {:.3}s", started.elapsed().as_secs_f64());
    }

    if report.has_failures() {
        let items = report.pipelines.iter().map(PipelineReport::failed).sum();
        let producers = report
            .pipelines
            .iter()
            .filter(|p| p.discovery_error.is_some())
            .count();
        return Err(CliError::Failures { items, producers });
    }
    Ok(())
}
