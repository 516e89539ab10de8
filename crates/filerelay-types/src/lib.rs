//! Shared filerelay types: work items, stage identity, and the property
//! schema used to turn untyped configuration into typed providers.
//!
//! This crate performs no I/O beyond reading metadata that callers hand it.

pub mod error;
pub mod item;
pub mod schema;
pub mod stage;

pub use error::ConfigError;
pub use item::{path_from_bytes, path_to_bytes, ItemKey, WorkItem};
pub use schema::{
    materialize, Properties, PropertyKind, PropertySpec, PropertyValue, ProviderKind,
};
pub use stage::StageId;
