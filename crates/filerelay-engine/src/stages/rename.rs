//! `rename`: regex substitution on the leaf name, in place.

use std::sync::Arc;

use filerelay_types::{ConfigError, Properties, PropertyKind, PropertySpec, WorkItem};
use regex::Regex;

use crate::error::StageError;
use crate::fs::LocalFs;
use crate::registry::Collaborators;
use crate::stage::Stage;

pub const SCHEMA: &[PropertySpec] = &[
    PropertySpec::required(
        "rule_origin",
        "Regular expression matched in the file name",
        PropertyKind::Regex,
    ),
    PropertySpec::required(
        "rule_destination",
        "Replacement, may reference groups as $1 or ${name}",
        PropertyKind::String,
    ),
];

#[derive(Clone)]
pub struct RenameStage {
    origin: Regex,
    destination: String,
    fs: Arc<dyn LocalFs>,
}

impl RenameStage {
    pub fn new(origin: Regex, destination: impl Into<String>, fs: Arc<dyn LocalFs>) -> Self {
        Self {
            origin,
            destination: destination.into(),
            fs,
        }
    }
}

/// # Errors
///
/// Fails if a declared property is missing or of the wrong kind.
pub fn build(props: &Properties, collab: &Collaborators) -> Result<Box<dyn Stage>, ConfigError> {
    Ok(Box::new(RenameStage::new(
        props.regex("rule_origin")?.clone(),
        props.string("rule_destination")?,
        Arc::clone(&collab.fs),
    )))
}

impl Stage for RenameStage {
    fn fork(&self) -> Box<dyn Stage> {
        Box::new(self.clone())
    }

    fn run(&mut self, item: &WorkItem) -> Result<(), StageError> {
        let renamed = self
            .origin
            .replace_all(&item.name, self.destination.as_str());
        if renamed == item.name {
            return Ok(());
        }

        let target = item.full_path.with_file_name(&*renamed);
        if self
            .fs
            .exists(&target)
            .map_err(|e| StageError::io(&target, e))?
        {
            return Err(StageError::Collision(target));
        }
        self.fs
            .rename(&item.full_path, &target)
            .map_err(|e| StageError::io(&item.full_path, e))?;
        tracing::debug!(from = %item.full_path.display(), to = %target.display(), "renamed");
        Ok(())
    }

    fn summary(&self) -> String {
        format!("{} => {}", self.origin.as_str(), self.destination)
    }
}
