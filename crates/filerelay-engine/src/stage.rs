//! The processor capability set and its per-stage settings.

use filerelay_types::{ConfigError, Properties, StageId, WorkItem};

use crate::error::StageError;

/// One processing step.
///
/// The runner never calls `run` on a configured stage directly: every worker
/// gets its own [`fork`](Stage::fork), brackets its share of the working set
/// with [`pre_process`](Stage::pre_process) and
/// [`post_process`](Stage::post_process), and brackets each item with
/// [`pre_run`](Stage::pre_run) / [`post_run`](Stage::post_run). Anything a
/// fork shares with its siblings must be synchronized by the stage itself.
pub trait Stage: Send {
    /// A fresh instance for one worker. Connections are not carried over.
    fn fork(&self) -> Box<dyn Stage>;

    /// Acquire per-worker resources (e.g. a remote connection).
    ///
    /// # Errors
    ///
    /// A failure here fails the whole working set of the stage.
    fn pre_process(&mut self) -> Result<(), StageError> {
        Ok(())
    }

    /// Release whatever [`pre_process`](Stage::pre_process) acquired.
    fn post_process(&mut self) {}

    fn pre_run(&mut self, _item: &WorkItem) {}

    /// Apply the stage to one item.
    ///
    /// # Errors
    ///
    /// The item is recorded as failed for this run and retried next run.
    fn run(&mut self, item: &WorkItem) -> Result<(), StageError>;

    fn post_run(&mut self, _item: &WorkItem) {}

    /// One-line, human-readable rendering of the stage's configuration.
    fn summary(&self) -> String;
}

/// Settings every processor carries regardless of its provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageSettings {
    /// Keep a checkpoint and skip items already processed.
    pub state: bool,
    /// Skip items the preceding stage failed in this run.
    pub depends: bool,
    /// Worker pool size.
    pub threads: usize,
}

impl Default for StageSettings {
    fn default() -> Self {
        Self {
            state: true,
            depends: false,
            threads: 1,
        }
    }
}

impl StageSettings {
    /// Read the universal processor properties.
    ///
    /// # Errors
    ///
    /// Fails if a universal property is missing from the schema or the
    /// thread count does not fit the platform.
    pub fn from_properties(props: &Properties) -> Result<Self, ConfigError> {
        let threads = props.integer("threads")?;
        let threads = usize::try_from(threads).map_err(|e| ConfigError::PropertyType {
            provider: props.provider().to_string(),
            name: "threads".to_string(),
            raw: threads.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            state: props.boolean("state")?,
            depends: props.boolean("depends")?,
            threads,
        })
    }
}

/// A processor bound to its producer, ready to be run.
pub struct ConfiguredStage {
    pub id: StageId,
    /// Provider type key the stage was built from.
    pub provider: String,
    /// One-line provider description from the registry.
    pub description: String,
    pub settings: StageSettings,
    pub stage: Box<dyn Stage>,
}

impl std::fmt::Debug for ConfiguredStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfiguredStage")
            .field("id", &self.id)
            .field("provider", &self.provider)
            .field("settings", &self.settings)
            .field("summary", &self.stage.summary())
            .finish()
    }
}
