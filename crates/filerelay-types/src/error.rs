//! Configuration error taxonomy.
//!
//! Every variant is fatal at assembly time: nothing has been processed yet
//! when one of these surfaces.

use crate::schema::ProviderKind;

/// Errors raised while resolving providers and materializing their properties.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// No provider is registered under `key` for this category.
    #[error("unknown {kind} provider '{key}'")]
    UnknownProvider { kind: ProviderKind, key: String },

    /// A provider key was registered twice within one category.
    #[error("{kind} provider '{key}' is already registered")]
    DuplicateProvider { kind: ProviderKind, key: String },

    /// A property declared as required is absent from the configuration.
    #[error("{provider}: missing required property '{name}'")]
    MissingRequiredProperty { provider: String, name: String },

    /// A supplied (or default) value could not be coerced to the declared type.
    #[error("{provider}: property '{name}' has invalid value {raw}: {reason}")]
    PropertyType {
        provider: String,
        name: String,
        raw: String,
        reason: String,
    },

    /// An accessor asked for a property the provider's schema never declared.
    #[error("{provider}: property '{name}' is not declared in the schema")]
    UndeclaredProperty { provider: String, name: String },

    /// Any other configuration problem detected while building a provider.
    #[error("{0}")]
    Invalid(String),
}

impl ConfigError {
    /// Name of the offending property, when the error is tied to one.
    #[must_use]
    pub fn property(&self) -> Option<&str> {
        match self {
            Self::MissingRequiredProperty { name, .. }
            | Self::PropertyType { name, .. }
            | Self::UndeclaredProperty { name, .. } => Some(name),
            _ => None,
        }
    }
}
