//! Pipeline engine for filerelay.
//!
//! A configuration document names producers, each owning an ordered list of
//! processors. [`orchestrator::assemble`] turns the document into runnable
//! [`Pipeline`]s through the [`ProviderRegistry`]; [`orchestrator::run_all`]
//! drives every pipeline through [`runner::run_pipeline`], which applies
//! per-stage checkpoints, dependency filtering and a bounded worker pool.

pub mod config;
pub mod error;
pub mod fs;
pub mod guard;
pub mod orchestrator;
pub mod producer;
pub mod registry;
pub mod result;
pub mod runner;
pub mod sink;
pub mod stage;
pub mod stages;

pub use error::{AssemblyError, StageError};
pub use orchestrator::{assemble, load_pipelines, open_store, run_all, Pipeline};
pub use registry::{Collaborators, ProviderRegistry};
pub use result::{PipelineReport, RunReport, StageReport};
