pub mod check;
pub mod describe;
pub mod providers;
pub mod run;
pub mod state;
pub mod version;

use std::path::Path;

use filerelay_engine::config::types::RelayConfig;
use filerelay_engine::{load_pipelines, Collaborators, Pipeline, ProviderRegistry};

use crate::error::CliError;

/// Parse, validate and assemble the configuration with the built-in providers.
pub(crate) fn load(config_path: &Path) -> Result<(RelayConfig, Vec<Pipeline>), CliError> {
    let registry = ProviderRegistry::builtin();
    let (config, pipelines) = load_pipelines(config_path, &registry, &Collaborators::default())?;
    tracing::debug!(
        config = %config_path.display(),
        pipelines = pipelines.len(),
        "configuration assembled"
    );
    Ok((config, pipelines))
}
