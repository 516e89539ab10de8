//! Configuration document types.

use std::path::PathBuf;

use serde::Deserialize;
use serde_json::{Map, Value};

/// Top-level configuration document.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    pub version: String,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub pipelines: Vec<PipelineConfig>,
}

/// Checkpoint backend selection.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StateConfig {
    #[serde(default)]
    pub backend: StateBackendKind,
    /// Checkpoint directory (`file`) or database path (`sqlite`).
    pub connection: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateBackendKind {
    #[default]
    File,
    Sqlite,
}

impl StateConfig {
    /// Configured location, or the per-user default for the backend.
    #[must_use]
    pub fn location(&self) -> PathBuf {
        if let Some(path) = &self.connection {
            return path.clone();
        }
        let root = std::env::var_os("HOME")
            .map_or_else(|| PathBuf::from("/tmp"), PathBuf::from)
            .join(".filerelay");
        match self.backend {
            StateBackendKind::File => root.join("checkpoints"),
            StateBackendKind::Sqlite => root.join("state.db"),
        }
    }
}

/// One producer and its ordered processors.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    pub producer: ProviderConfig,
    #[serde(default)]
    pub processes: Vec<ProviderConfig>,
}

/// A provider reference plus its raw, not yet materialized properties.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    #[serde(rename = "use")]
    pub use_ref: String,
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

impl ProviderConfig {
    /// The configured `name`, when present and textual.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.properties.get("name").and_then(Value::as_str)
    }
}
