//! Pipeline assembly and multi-producer orchestration.

use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use filerelay_state::{CheckpointStore, FileCheckpointStore, SqliteCheckpointStore, StateError};
use filerelay_types::{ItemKey, ProviderKind, StageId};
use tokio::task::JoinSet;

use crate::config::parser::parse_config;
use crate::config::types::{RelayConfig, StateBackendKind, StateConfig};
use crate::config::validator::validate_config;
use crate::error::AssemblyError;
use crate::producer::Producer;
use crate::registry::{Collaborators, ProviderRegistry};
use crate::result::RunReport;
use crate::runner::run_pipeline;
use crate::stage::ConfiguredStage;

/// One producer and its ordered, bound stages.
pub struct Pipeline {
    pub name: String,
    /// Producer type key.
    pub provider: String,
    pub description: String,
    /// Run concurrently with the other pipelines.
    pub thread: bool,
    pub producer: Arc<dyn Producer>,
    pub stages: Vec<ConfiguredStage>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("provider", &self.provider)
            .field("thread", &self.thread)
            .field("stages", &self.stages)
            .finish_non_exhaustive()
    }
}

/// Build every pipeline of `config`, producer first, then its processors in
/// listed order.
///
/// # Errors
///
/// [`AssemblyError::Provider`] for the first provider that cannot be resolved
/// or materialized; nothing is built in that case.
pub fn assemble(
    config: &RelayConfig,
    registry: &ProviderRegistry,
    collaborators: &Collaborators,
) -> Result<Vec<Pipeline>, AssemblyError> {
    let mut pipelines = Vec::with_capacity(config.pipelines.len());

    for (index, definition) in config.pipelines.iter().enumerate() {
        let producer_ref = &definition.producer;
        let producer_label = producer_ref.name().map_or_else(
            || format!("pipeline {index} producer"),
            |name| format!("producer '{name}'"),
        );
        let provider_error = |location: &str| {
            let location = location.to_string();
            move |source| AssemblyError::Provider { location, source }
        };

        let built = registry
            .build_producer(&producer_ref.use_ref, &producer_ref.properties)
            .map_err(provider_error(&producer_label))?;
        let description = registry
            .resolve(ProviderKind::Producer, &producer_ref.use_ref)
            .map_err(provider_error(&producer_label))?
            .description
            .clone();

        let mut stages = Vec::with_capacity(definition.processes.len());
        for (position, process) in definition.processes.iter().enumerate() {
            let label = process.name().map_or_else(
                || format!("{producer_label}, processor {position}"),
                |name| format!("{producer_label}, processor '{name}'"),
            );
            let processor = registry
                .build_processor(&process.use_ref, &process.properties, collaborators)
                .map_err(provider_error(&label))?;
            let entry = registry
                .resolve(ProviderKind::Processor, &process.use_ref)
                .map_err(provider_error(&label))?;
            stages.push(ConfiguredStage {
                id: StageId::new(&built.name, processor.name),
                provider: process.use_ref.clone(),
                description: entry.description.clone(),
                settings: processor.settings,
                stage: processor.stage,
            });
        }

        tracing::debug!(
            producer = %built.name,
            provider = %producer_ref.use_ref,
            stages = stages.len(),
            thread = built.thread,
            "pipeline assembled"
        );
        pipelines.push(Pipeline {
            name: built.name,
            provider: producer_ref.use_ref.clone(),
            description,
            thread: built.thread,
            producer: built.producer,
            stages,
        });
    }

    Ok(pipelines)
}

/// Parse, validate and assemble the configuration file at `path`.
///
/// # Errors
///
/// [`AssemblyError::Document`] when the file is unreadable, malformed or
/// semantically invalid; [`AssemblyError::Provider`] from [`assemble`].
pub fn load_pipelines(
    path: &Path,
    registry: &ProviderRegistry,
    collaborators: &Collaborators,
) -> Result<(RelayConfig, Vec<Pipeline>), AssemblyError> {
    let config = parse_config(path).map_err(AssemblyError::Document)?;
    validate_config(&config).map_err(AssemblyError::Document)?;
    let pipelines = assemble(&config, registry, collaborators)?;
    Ok((config, pipelines))
}

/// Open the checkpoint backend selected by `state`.
///
/// # Errors
///
/// Returns [`StateError`] if the location cannot be created or opened.
pub fn open_store(state: &StateConfig) -> Result<Arc<dyn CheckpointStore>, StateError> {
    let location = state.location();
    let store: Arc<dyn CheckpointStore> = match state.backend {
        StateBackendKind::File => Arc::new(FileCheckpointStore::open(&location)?),
        StateBackendKind::Sqlite => Arc::new(SqliteCheckpointStore::open(&location)?),
    };
    tracing::debug!(location = %store.location(), "checkpoint store opened");
    Ok(store)
}

/// Run every pipeline once.
///
/// Pipelines flagged `thread` start first, each on its own task; the others
/// then run one after another on the calling task. Returns once all of them
/// have finished, with reports in configuration order.
pub async fn run_all(pipelines: Vec<Pipeline>, store: Arc<dyn CheckpointStore>) -> RunReport {
    let started = Instant::now();
    let mut reports = Vec::with_capacity(pipelines.len());
    let mut threaded = JoinSet::new();
    let mut inline = Vec::new();

    for (index, mut pipeline) in pipelines.into_iter().enumerate() {
        if pipeline.thread {
            let store = Arc::clone(&store);
            threaded.spawn(async move { (index, run_pipeline(&mut pipeline, store).await) });
        } else {
            inline.push((index, pipeline));
        }
    }

    for (index, mut pipeline) in inline {
        reports.push((index, run_pipeline(&mut pipeline, Arc::clone(&store)).await));
    }

    while let Some(joined) = threaded.join_next().await {
        match joined {
            Ok(report) => reports.push(report),
            Err(join_err) => tracing::error!(error = %join_err, "pipeline task panicked"),
        }
    }

    reports.sort_by_key(|(index, _)| *index);
    RunReport {
        pipelines: reports.into_iter().map(|(_, report)| report).collect(),
        duration: started.elapsed(),
    }
}

/// Persisted checkpoint of one stage.
#[derive(Debug)]
pub struct StageCheckpoint {
    pub id: StageId,
    /// `false` when the stage runs with `state: false`.
    pub enabled: bool,
    pub keys: Result<Vec<ItemKey>, StateError>,
}

/// Read the checkpoint of every stage, sorted by item key.
#[must_use]
pub fn list_checkpoints(pipelines: &[Pipeline], store: &dyn CheckpointStore) -> Vec<StageCheckpoint> {
    pipelines
        .iter()
        .flat_map(|pipeline| &pipeline.stages)
        .map(|stage| {
            let keys = store.load(&stage.id).map(|set| {
                let mut keys: Vec<_> = set.into_iter().collect();
                keys.sort();
                keys
            });
            StageCheckpoint {
                id: stage.id.clone(),
                enabled: stage.settings.state,
                keys,
            }
        })
        .collect()
}

/// Human-readable summary of the assembled pipelines.
#[must_use]
pub fn describe(pipelines: &[Pipeline]) -> String {
    let mut out = String::new();
    for pipeline in pipelines {
        let _ = write!(
            out,
            "{}: {} : {}",
            pipeline.name,
            pipeline.description,
            pipeline.producer.summary()
        );
        if pipeline.thread {
            out.push_str(" [thread]");
        }
        out.push('\n');
        for stage in &pipeline.stages {
            let settings = stage.settings;
            let _ = writeln!(
                out,
                "  -> {} : {} [{} state={} depends={} threads={}]",
                stage.description,
                stage.stage.summary(),
                stage.id.stage(),
                settings.state,
                settings.depends,
                settings.threads
            );
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parser::parse_config_str;

    fn assemble_str(yaml: &str) -> Result<Vec<Pipeline>, AssemblyError> {
        assemble(
            &parse_config_str(yaml).unwrap(),
            &ProviderRegistry::builtin(),
            &Collaborators::default(),
        )
    }

    #[test]
    fn processors_inherit_producer_name() {
        let pipelines = assemble_str(
            r#"
version: "1.0"
pipelines:
  - producer: { use: dir_mon, name: inbox, basedir: /data/in, thread: true }
    processes:
      - { use: cp, name: backup, dest_dir: /data/backup, threads: 2 }
      - { use: echo, name: log, state: false }
"#,
        )
        .unwrap();
        assert_eq!(pipelines.len(), 1);
        let pipeline = &pipelines[0];
        assert_eq!(pipeline.name, "inbox");
        assert!(pipeline.thread);
        let ids: Vec<_> = pipeline.stages.iter().map(|s| s.id.to_string()).collect();
        assert_eq!(ids, vec!["inbox.backup", "inbox.log"]);
        assert_eq!(pipeline.stages[0].settings.threads, 2);
        assert!(!pipeline.stages[1].settings.state);
    }

    #[test]
    fn missing_required_property_names_location() {
        let err = assemble_str(
            r#"
version: "1.0"
pipelines:
  - producer: { use: dir_mon, name: inbox }
    processes:
      - { use: cp, name: backup }
"#,
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "producer 'inbox', processor 'backup': cp: missing required property 'dest_dir'"
        );
    }

    #[test]
    fn unknown_producer_is_rejected() {
        let err = assemble_str(
            "version: \"1.0\"\npipelines:\n  - producer: { use: inotify, name: a }",
        )
        .unwrap_err();
        assert!(matches!(err, AssemblyError::Provider { .. }));
        assert!(err.to_string().contains("unknown producer provider 'inotify'"));
    }

    #[test]
    fn describe_lists_producer_then_stages() {
        let pipelines = assemble_str(
            r#"
version: "1.0"
pipelines:
  - producer: { use: dir_mon, name: inbox, basedir: /data/in, recursive: false }
    processes:
      - { use: move, name: archive, dest_dir: /data/archive, depends: true }
"#,
        )
        .unwrap();
        let text = describe(&pipelines);
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "inbox: Monitors directory changes between runs : /data/in recursive=false filter=.*"
        );
        assert_eq!(
            lines.next().unwrap(),
            "  -> Move local files : move to /data/archive [archive state=true depends=true threads=1]"
        );
    }

    #[test]
    fn open_store_creates_file_backend_directory() {
        let dir = tempfile::tempdir().unwrap();
        let state = StateConfig {
            backend: StateBackendKind::File,
            connection: Some(dir.path().join("checkpoints")),
        };
        let store = open_store(&state).unwrap();
        assert!(dir.path().join("checkpoints").is_dir());
        assert!(store.load(&StageId::new("p", "s")).unwrap().is_empty());
    }
}
