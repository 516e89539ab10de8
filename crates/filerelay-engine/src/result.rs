//! Run reports.

use std::fmt;
use std::time::Duration;

use filerelay_types::{ItemKey, StageId, WorkItem};

/// Outcome of one stage invocation.
#[derive(Debug, Clone)]
pub struct StageReport {
    pub id: StageId,
    /// Items discovered for the run.
    pub candidates: usize,
    /// Candidates skipped because the checkpoint already holds them.
    pub skipped_processed: usize,
    /// Candidates skipped because the previous stage failed them.
    pub skipped_dependency: usize,
    /// Sorted keys of items that succeeded in this run.
    pub succeeded: Vec<ItemKey>,
    /// Sorted keys of items that failed in this run.
    pub failed: Vec<ItemKey>,
    /// Set when `pre_process` failed and no item was attempted.
    pub lifecycle_error: Option<String>,
    pub duration: Duration,
}

impl StageReport {
    /// Items dispatched (or, after a lifecycle error, written off).
    #[must_use]
    pub fn dispatched(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

/// Outcome of one producer's pipeline.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub producer: String,
    pub discovered: usize,
    /// Set when the producer could not list its source.
    pub discovery_error: Option<String>,
    pub stages: Vec<StageReport>,
    /// Items the terminal stage completed in this run, with `processed_time`.
    pub completed: Vec<WorkItem>,
    pub duration: Duration,
}

impl PipelineReport {
    #[must_use]
    pub fn failed(&self) -> usize {
        self.stages.iter().map(|s| s.failed.len()).sum()
    }
}

/// Outcome of one process run over every pipeline.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub pipelines: Vec<PipelineReport>,
    pub duration: Duration,
}

impl RunReport {
    /// Whether any item or stage failed anywhere in the run.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.pipelines.iter().any(|p| {
            p.discovery_error.is_some()
                || p.stages
                    .iter()
                    .any(|s| !s.failed.is_empty() || s.lifecycle_error.is_some())
        })
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for pipeline in &self.pipelines {
            write!(f, "{}: {} discovered", pipeline.producer, pipeline.discovered)?;
            if let Some(error) = &pipeline.discovery_error {
                write!(f, " (discovery failed: {error})")?;
            }
            writeln!(f)?;
            for stage in &pipeline.stages {
                write!(
                    f,
                    "  {:<24} ok {:>5}  failed {:>5}  skipped {:>5}  ({:.2}s)",
                    stage.id.to_string(),
                    stage.succeeded.len(),
                    stage.failed.len(),
                    stage.skipped_processed + stage.skipped_dependency,
                    stage.duration.as_secs_f64()
                )?;
                if let Some(error) = &stage.lifecycle_error {
                    write!(f, "  [{error}]")?;
                }
                writeln!(f)?;
            }
        }
        Ok(())
    }
}
