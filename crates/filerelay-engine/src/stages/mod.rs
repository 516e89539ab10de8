//! Built-in processors and their registration.

pub mod echo;
pub mod ftp;
pub mod local;
pub mod rename;
pub mod scp;

use std::sync::Arc;

use filerelay_types::ConfigError;

use crate::producer::{DirMon, Producer, DIR_MON_SCHEMA};
use crate::registry::ProviderRegistry;

/// Register every built-in provider, in listing order.
///
/// # Errors
///
/// [`ConfigError::DuplicateProvider`] if `registry` already holds one of the
/// built-in keys.
pub fn register_builtin(registry: &mut ProviderRegistry) -> Result<(), ConfigError> {
    registry.register_producer(
        "dir_mon",
        "Monitors directory changes between runs",
        DIR_MON_SCHEMA,
        |props| Ok(Arc::new(DirMon::from_properties(props)?) as Arc<dyn Producer>),
    )?;
    registry.register_processor(
        "echo",
        "Writes produced items, default stdout",
        echo::SCHEMA,
        echo::build,
    )?;
    registry.register_processor(
        "rename",
        "Rename local files",
        rename::SCHEMA,
        rename::build,
    )?;
    registry.register_processor("move", "Move local files", local::SCHEMA, local::build_move)?;
    registry.register_processor("cp", "Copies local files", local::SCHEMA, local::build_copy)?;
    registry.register_processor("ftp", "Copies files using FTP", ftp::SCHEMA, ftp::build)?;
    registry.register_processor("scp", "Copies files using SFTP", scp::SCHEMA, scp::build)?;
    Ok(())
}
