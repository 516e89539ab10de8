//! Engine error model.
//!
//! [`StageError`] covers everything a single stage invocation can fail with;
//! it is always recovered locally by recording the item (or, for lifecycle
//! hooks, the whole working set) as failed. [`AssemblyError`] is fatal and
//! surfaces before any item is touched.

use std::path::{Path, PathBuf};

use filerelay_types::ConfigError;

/// Per-item or lifecycle failure of a stage.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    /// Local filesystem failure on `path`.
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The open-file guard reported the source as still in use.
    #[error("{} is open by another process", .0.display())]
    FileOpen(PathBuf),

    /// The destination already exists and would be overwritten.
    #[error("{} already exists", .0.display())]
    Collision(PathBuf),

    /// Connection or transfer failure of a remote sink.
    #[error("remote: {0}")]
    Remote(String),

    /// `run` was invoked on a remote stage without a live connection.
    #[error("not connected")]
    NotConnected,

    /// The stage panicked while handling the item.
    #[error("stage panicked: {0}")]
    Panicked(String),
}

impl StageError {
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Fatal failure while loading, validating or assembling pipelines.
#[derive(Debug, thiserror::Error)]
pub enum AssemblyError {
    /// The document could not be read, parsed or validated.
    #[error("{0:#}")]
    Document(anyhow::Error),

    /// A producer or processor could not be resolved or materialized.
    #[error("{location}: {source}")]
    Provider {
        location: String,
        #[source]
        source: ConfigError,
    },
}
