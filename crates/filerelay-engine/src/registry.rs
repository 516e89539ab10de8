//! Provider registry: type keys mapped to constructors and property schemas.
//!
//! The registry is an explicit value built once at startup and handed to the
//! assembly routine. [`ProviderRegistry::builtin`] registers the providers
//! shipped with filerelay; embedders add their own (for example an SFTP
//! [`RemoteSink`](crate::sink::RemoteSink)) with
//! [`register_processor`](ProviderRegistry::register_processor).

use std::fmt::Write as _;
use std::sync::Arc;

use filerelay_types::{
    materialize, ConfigError, Properties, PropertyKind, PropertySpec, ProviderKind,
};
use serde_json::{Map, Value};

use crate::fs::{LocalFs, StdFs};
use crate::guard::{platform_guard, OpenFileGuard};
use crate::producer::Producer;
use crate::stage::{Stage, StageSettings};
use crate::stages;

/// Properties every producer accepts.
pub const PRODUCER_COMMON: &[PropertySpec] = &[
    PropertySpec::required("name", "Unique producer name", PropertyKind::String),
    PropertySpec::optional(
        "thread",
        "Run this pipeline concurrently with the others",
        PropertyKind::Boolean,
        "false",
    ),
];

/// Properties every processor accepts.
pub const PROCESSOR_COMMON: &[PropertySpec] = &[
    PropertySpec::required(
        "name",
        "Processor name, unique within its producer",
        PropertyKind::String,
    ),
    PropertySpec::optional(
        "state",
        "Keep a checkpoint and skip items already processed",
        PropertyKind::Boolean,
        "true",
    ),
    PropertySpec::optional(
        "depends",
        "Skip items the previous processor failed in this run",
        PropertyKind::Boolean,
        "false",
    ),
    PropertySpec::optional("threads", "Concurrent workers", PropertyKind::Integer, "1").at_least(1),
];

/// Shared collaborators injected into stage constructors.
#[derive(Clone)]
pub struct Collaborators {
    pub fs: Arc<dyn LocalFs>,
    pub guard: Arc<dyn OpenFileGuard>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            fs: Arc::new(StdFs),
            guard: platform_guard(),
        }
    }
}

pub type ProducerBuilder = fn(&Properties) -> Result<Arc<dyn Producer>, ConfigError>;
pub type ProcessorBuilder = fn(&Properties, &Collaborators) -> Result<Box<dyn Stage>, ConfigError>;

#[derive(Clone, Copy)]
enum Builder {
    Producer(ProducerBuilder),
    Processor(ProcessorBuilder),
}

/// One registered provider.
pub struct ProviderEntry {
    pub key: String,
    pub kind: ProviderKind,
    pub description: String,
    /// Universal properties followed by the provider's own.
    pub schema: Vec<PropertySpec>,
    builder: Builder,
}

/// A producer built from configuration.
pub struct BuiltProducer {
    pub name: String,
    pub thread: bool,
    pub producer: Arc<dyn Producer>,
}

/// A processor built from configuration, not yet bound to a producer.
pub struct BuiltProcessor {
    pub name: String,
    pub settings: StageSettings,
    pub stage: Box<dyn Stage>,
}

/// Registration-ordered table of providers.
#[derive(Default)]
pub struct ProviderRegistry {
    entries: Vec<ProviderEntry>,
}

impl ProviderRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in provider.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        stages::register_builtin(&mut registry)
            .unwrap_or_else(|e| unreachable!("built-in providers use distinct keys: {e}"));
        registry
    }

    fn insert(
        &mut self,
        kind: ProviderKind,
        key: &str,
        description: &str,
        common: &[PropertySpec],
        specific: &[PropertySpec],
        builder: Builder,
    ) -> Result<(), ConfigError> {
        if self.find(kind, key).is_some() {
            return Err(ConfigError::DuplicateProvider {
                kind,
                key: key.to_string(),
            });
        }
        self.entries.push(ProviderEntry {
            key: key.to_string(),
            kind,
            description: description.to_string(),
            schema: common.iter().chain(specific).copied().collect(),
            builder,
        });
        Ok(())
    }

    /// Register a producer under `key`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::DuplicateProvider`] if `key` is taken by another producer.
    pub fn register_producer(
        &mut self,
        key: &str,
        description: &str,
        schema: &[PropertySpec],
        builder: ProducerBuilder,
    ) -> Result<(), ConfigError> {
        self.insert(
            ProviderKind::Producer,
            key,
            description,
            PRODUCER_COMMON,
            schema,
            Builder::Producer(builder),
        )
    }

    /// Register a processor under `key`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::DuplicateProvider`] if `key` is taken by another processor.
    pub fn register_processor(
        &mut self,
        key: &str,
        description: &str,
        schema: &[PropertySpec],
        builder: ProcessorBuilder,
    ) -> Result<(), ConfigError> {
        self.insert(
            ProviderKind::Processor,
            key,
            description,
            PROCESSOR_COMMON,
            schema,
            Builder::Processor(builder),
        )
    }

    fn find(&self, kind: ProviderKind, key: &str) -> Option<&ProviderEntry> {
        self.entries
            .iter()
            .find(|entry| entry.kind == kind && entry.key == key)
    }

    /// Look up a provider.
    ///
    /// # Errors
    ///
    /// [`ConfigError::UnknownProvider`] when nothing is registered under `key`.
    pub fn resolve(&self, kind: ProviderKind, key: &str) -> Result<&ProviderEntry, ConfigError> {
        self.find(kind, key)
            .ok_or_else(|| ConfigError::UnknownProvider {
                kind,
                key: key.to_string(),
            })
    }

    /// Registered providers in registration order.
    pub fn entries(&self) -> impl Iterator<Item = &ProviderEntry> {
        self.entries.iter()
    }

    /// Resolve, materialize and construct a producer.
    ///
    /// # Errors
    ///
    /// Any [`ConfigError`] raised by resolution, materialization or the
    /// provider's constructor.
    pub fn build_producer(
        &self,
        key: &str,
        raw: &Map<String, Value>,
    ) -> Result<BuiltProducer, ConfigError> {
        let entry = self.resolve(ProviderKind::Producer, key)?;
        let props = materialize(key, &entry.schema, raw)?;
        log_ignored_keys(entry, raw);
        let Builder::Producer(build) = entry.builder else {
            unreachable!("producer entries hold producer builders")
        };
        Ok(BuiltProducer {
            name: props.string("name")?.to_string(),
            thread: props.boolean("thread")?,
            producer: build(&props)?,
        })
    }

    /// Resolve, materialize and construct a processor.
    ///
    /// # Errors
    ///
    /// Any [`ConfigError`] raised by resolution, materialization or the
    /// provider's constructor.
    pub fn build_processor(
        &self,
        key: &str,
        raw: &Map<String, Value>,
        collaborators: &Collaborators,
    ) -> Result<BuiltProcessor, ConfigError> {
        let entry = self.resolve(ProviderKind::Processor, key)?;
        let props = materialize(key, &entry.schema, raw)?;
        log_ignored_keys(entry, raw);
        let Builder::Processor(build) = entry.builder else {
            unreachable!("processor entries hold processor builders")
        };
        Ok(BuiltProcessor {
            name: props.string("name")?.to_string(),
            settings: StageSettings::from_properties(&props)?,
            stage: build(&props, collaborators)?,
        })
    }

    /// Deterministic listing of every provider and its properties.
    #[must_use]
    pub fn describe(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            let _ = writeln!(out, "{} {}: {}", entry.kind, entry.key, entry.description);
            for spec in &entry.schema {
                let _ = writeln!(out, "    {spec}");
            }
        }
        out
    }
}

fn log_ignored_keys(entry: &ProviderEntry, raw: &Map<String, Value>) {
    for key in raw.keys() {
        if !entry.schema.iter().any(|spec| spec.name == key.as_str()) {
            tracing::debug!(provider = %entry.key, key = %key, "ignoring unrecognized property");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn builtin_registration_order() {
        let registry = ProviderRegistry::builtin();
        let keys: Vec<_> = registry
            .entries()
            .map(|e| format!("{}:{}", e.kind, e.key))
            .collect();
        assert_eq!(
            keys,
            vec![
                "producer:dir_mon",
                "processor:echo",
                "processor:rename",
                "processor:move",
                "processor:cp",
                "processor:ftp",
                "processor:scp",
            ]
        );
    }

    #[test]
    fn duplicate_key_within_kind_is_rejected() {
        let mut registry = ProviderRegistry::builtin();
        let err = registry
            .register_processor("cp", "again", &[], |_, _| unreachable!())
            .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateProvider { .. }));
    }

    #[test]
    fn same_key_in_other_kind_is_allowed() {
        let mut registry = ProviderRegistry::builtin();
        registry
            .register_producer("cp", "a producer named cp", &[], |_| unreachable!())
            .unwrap();
        assert!(registry.resolve(ProviderKind::Producer, "cp").is_ok());
    }

    #[test]
    fn unknown_key_fails_resolution() {
        let registry = ProviderRegistry::builtin();
        let err = registry
            .build_processor("gopher", &raw(json!({"name": "g"})), &Collaborators::default())
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "unknown processor provider 'gopher'");
    }

    #[test]
    fn processor_schema_starts_with_universal_properties() {
        let registry = ProviderRegistry::builtin();
        let entry = registry.resolve(ProviderKind::Processor, "cp").unwrap();
        let names: Vec<_> = entry.schema.iter().map(|s| s.name).collect();
        assert_eq!(&names[..4], &["name", "state", "depends", "threads"]);
        assert!(names.contains(&"dest_dir"));
    }

    #[test]
    fn build_processor_reads_settings() {
        let registry = ProviderRegistry::builtin();
        let built = registry
            .build_processor(
                "cp",
                &raw(json!({"name": "backup", "dest_dir": "/out", "threads": 4, "depends": "yes"})),
                &Collaborators::default(),
            )
            .unwrap();
        assert_eq!(built.name, "backup");
        assert_eq!(
            built.settings,
            StageSettings {
                state: true,
                depends: true,
                threads: 4
            }
        );
    }

    #[test]
    fn zero_threads_is_a_property_error() {
        let registry = ProviderRegistry::builtin();
        let err = registry
            .build_processor(
                "echo",
                &raw(json!({"name": "e", "threads": 0})),
                &Collaborators::default(),
            )
            .err()
            .unwrap();
        assert_eq!(err.property(), Some("threads"));
    }

    #[test]
    fn build_producer_reads_name_and_thread() {
        let registry = ProviderRegistry::builtin();
        let built = registry
            .build_producer("dir_mon", &raw(json!({"name": "inbox", "thread": true})))
            .unwrap();
        assert_eq!(built.name, "inbox");
        assert!(built.thread);
    }

    #[test]
    fn describe_is_stable_and_lists_properties() {
        let registry = ProviderRegistry::builtin();
        let listing = registry.describe();
        assert_eq!(listing, ProviderRegistry::builtin().describe());
        assert!(listing.starts_with("producer dir_mon: Monitors directory changes between runs\n"));
        assert!(listing.contains("    dest_dir (string, required): "));
        assert!(listing.contains("processor ftp: Copies files using FTP"));
        assert!(listing.contains("processor scp: Copies files using SFTP"));
        assert!(listing.contains("    key_filename (string): "));
    }
}
