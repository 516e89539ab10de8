//! Checkpoint store error types.

/// Errors produced by [`CheckpointStore`](crate::CheckpointStore) operations.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Underlying `SQLite` failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// File-system I/O failure (e.g. creating the checkpoint directory).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A checkpoint record could not be encoded or decoded.
    #[error("checkpoint encoding error: {0}")]
    Json(#[from] serde_json::Error),

    /// A stored timestamp is not valid RFC 3339.
    #[error("invalid stored timestamp '{0}'")]
    Timestamp(String),

    /// Internal mutex was poisoned by a panicked thread.
    #[error("checkpoint store lock poisoned")]
    LockPoisoned,
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, StateError>;
