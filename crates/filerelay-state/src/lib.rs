//! Checkpoint persistence for filerelay stages.
//!
//! A checkpoint is the set of [`ItemKey`](filerelay_types::ItemKey)s a stage
//! has processed successfully across all runs. [`CheckpointStore`] is the
//! storage contract; [`FileCheckpointStore`] keeps one JSON document per
//! stage and [`SqliteCheckpointStore`] keeps every stage in one database.

#![warn(clippy::pedantic)]

pub mod backend;
pub mod error;
pub mod file;
pub mod sqlite;

pub use backend::CheckpointStore;
pub use error::StateError;
pub use file::FileCheckpointStore;
pub use sqlite::SqliteCheckpointStore;
