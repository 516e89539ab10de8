//! Semantic validation for parsed configuration documents.
//!
//! Only document-level rules live here. Whether a provider exists and whether
//! its properties are complete and well typed is decided later, against the
//! provider registry.

use std::collections::HashSet;

use anyhow::{bail, Result};

use crate::config::types::RelayConfig;

/// Validate a parsed configuration document.
/// Returns `Ok(())` if valid, Err with all validation errors if not.
///
/// # Errors
///
/// Returns an error listing all validation failures found in the document.
pub fn validate_config(config: &RelayConfig) -> Result<()> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(format!(
            "Unsupported configuration version '{}', expected '1.0'",
            config.version
        ));
    }

    if config.pipelines.is_empty() {
        errors.push("At least one pipeline must be defined".to_string());
    }

    let mut producers = HashSet::new();
    for (i, pipeline) in config.pipelines.iter().enumerate() {
        let producer = &pipeline.producer;
        if producer.use_ref.trim().is_empty() {
            errors.push(format!(
                "Pipeline {i}: producer reference (use) must not be empty"
            ));
        }

        let producer_label = producer
            .name()
            .map_or_else(|| format!("Pipeline {i}"), |n| format!("Producer '{n}'"));
        if let Some(name) = producer.name() {
            if !producers.insert(name) {
                errors.push(format!("Duplicate producer name '{name}'"));
            }
        }

        let mut processors = HashSet::new();
        for (j, process) in pipeline.processes.iter().enumerate() {
            if process.use_ref.trim().is_empty() {
                errors.push(format!(
                    "{producer_label}: processor {j} reference (use) must not be empty"
                ));
            }
            if let Some(name) = process.name() {
                if !processors.insert(name) {
                    errors.push(format!(
                        "{producer_label}: duplicate processor name '{name}'"
                    ));
                }
            }
        }
    }

    if !errors.is_empty() {
        bail!(
            "Pipeline validation failed:\n  - {}",
            errors.join("\n  - ")
        );
    }

    Ok(())
}
