//! Checkpoint store trait definition.

use std::collections::HashSet;

use filerelay_types::{ItemKey, StageId};

use crate::error;

/// Storage contract for per-stage checkpoints.
///
/// Implementations must be `Send + Sync` for use behind
/// `Arc<dyn CheckpointStore>`; producers running on separate tasks share one
/// store but never touch the same [`StageId`].
pub trait CheckpointStore: Send + Sync {
    /// Read the processed set of `stage`.
    ///
    /// Returns an empty set when nothing has been persisted yet.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) when the record exists
    /// but cannot be read or decoded. Callers treat that as an empty set.
    fn load(&self, stage: &StageId) -> error::Result<HashSet<ItemKey>>;

    /// Replace the processed set of `stage` with `keys`.
    ///
    /// A partially written record is never observable by a later
    /// [`load`](Self::load).
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure;
    /// the previous record is left intact.
    fn save(&self, stage: &StageId, keys: &HashSet<ItemKey>) -> error::Result<()>;

    /// Human-readable location of the store, for logs and listings.
    fn location(&self) -> String;
}
