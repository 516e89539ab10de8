//! Declarative property schema and the single routine that materializes
//! untyped configuration into typed [`Properties`].
//!
//! Providers declare their recognized keys as static [`PropertySpec`]
//! tables. [`materialize`] walks a table against a raw key/value map:
//! required keys must be present, absent optional keys take their default,
//! every value is coerced through its declared [`PropertyKind`], and keys
//! the table does not mention are ignored.

use std::fmt;

use regex::Regex;
use serde_json::{Map, Value};

use crate::error::ConfigError;

/// Provider category. A type key is unique within one category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Producer,
    Processor,
}

impl ProviderKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Producer => "producer",
            Self::Processor => "processor",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value type a property is coerced to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    String,
    Integer,
    Float,
    Boolean,
    /// A string compiled as a regular expression.
    Regex,
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::Regex => "regex",
        };
        f.write_str(s)
    }
}

/// One recognized configuration key of a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertySpec {
    pub name: &'static str,
    pub description: &'static str,
    pub kind: PropertyKind,
    pub required: bool,
    /// Raw default, coerced through `kind` exactly like a supplied value.
    pub default: Option<&'static str>,
    /// Inclusive lower bound for integer properties.
    pub min: Option<i64>,
}

impl PropertySpec {
    /// A property that must be present in the configuration.
    #[must_use]
    pub const fn required(name: &'static str, description: &'static str, kind: PropertyKind) -> Self {
        Self {
            name,
            description,
            kind,
            required: true,
            default: None,
            min: None,
        }
    }

    /// An optional property falling back to `default` when absent.
    #[must_use]
    pub const fn optional(
        name: &'static str,
        description: &'static str,
        kind: PropertyKind,
        default: &'static str,
    ) -> Self {
        Self {
            name,
            description,
            kind,
            required: false,
            default: Some(default),
            min: None,
        }
    }

    /// An optional property with no default; absent stays absent.
    #[must_use]
    pub const fn unset(name: &'static str, description: &'static str, kind: PropertyKind) -> Self {
        Self {
            name,
            description,
            kind,
            required: false,
            default: None,
            min: None,
        }
    }

    /// Reject integer values below `min`.
    #[must_use]
    pub const fn at_least(self, min: i64) -> Self {
        Self {
            min: Some(min),
            ..self
        }
    }
}

impl fmt::Display for PropertySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}", self.name, self.kind)?;
        if self.required {
            f.write_str(", required")?;
        } else if let Some(default) = self.default {
            write!(f, ", default {default:?}")?;
        }
        write!(f, "): {}", self.description)
    }
}

/// A coerced property value.
#[derive(Debug, Clone)]
pub enum PropertyValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Regex(Regex),
}

impl PropertyValue {
    /// Coerce a raw configuration value to `kind`.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when the value cannot be represented
    /// as `kind`.
    pub fn coerce(kind: PropertyKind, raw: &Value) -> Result<Self, String> {
        match kind {
            PropertyKind::String => match raw {
                Value::String(s) => Ok(Self::String(s.clone())),
                Value::Number(n) => Ok(Self::String(n.to_string())),
                Value::Bool(b) => Ok(Self::String(b.to_string())),
                _ => Err("expected a string".to_string()),
            },
            PropertyKind::Integer => match raw {
                Value::Number(n) => n
                    .as_i64()
                    .map(Self::Integer)
                    .ok_or_else(|| "expected an integer".to_string()),
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Self::Integer)
                    .map_err(|e| format!("expected an integer ({e})")),
                _ => Err("expected an integer".to_string()),
            },
            PropertyKind::Float => match raw {
                Value::Number(n) => n
                    .as_f64()
                    .map(Self::Float)
                    .ok_or_else(|| "expected a number".to_string()),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(Self::Float)
                    .map_err(|e| format!("expected a number ({e})")),
                _ => Err("expected a number".to_string()),
            },
            PropertyKind::Boolean => match raw {
                Value::Bool(b) => Ok(Self::Boolean(*b)),
                Value::Number(n) => match n.as_i64() {
                    Some(0) => Ok(Self::Boolean(false)),
                    Some(1) => Ok(Self::Boolean(true)),
                    _ => Err("expected a boolean".to_string()),
                },
                Value::String(s) => parse_bool(s)
                    .map(Self::Boolean)
                    .ok_or_else(|| "expected a boolean".to_string()),
                _ => Err("expected a boolean".to_string()),
            },
            PropertyKind::Regex => match raw {
                Value::String(s) => Regex::new(s)
                    .map(Self::Regex)
                    .map_err(|e| format!("invalid regular expression ({e})")),
                _ => Err("expected a regular expression string".to_string()),
            },
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// Typed property values of one provider instance, in schema order.
#[derive(Debug, Clone)]
pub struct Properties {
    provider: String,
    values: Vec<(&'static str, Option<PropertyValue>)>,
}

impl Properties {
    /// Provider type key these properties were materialized for.
    #[must_use]
    pub fn provider(&self) -> &str {
        &self.provider
    }

    fn slot(&self, name: &str) -> Result<Option<&PropertyValue>, ConfigError> {
        self.values
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.as_ref())
            .ok_or_else(|| ConfigError::UndeclaredProperty {
                provider: self.provider.clone(),
                name: name.to_string(),
            })
    }

    fn present(&self, name: &str) -> Result<&PropertyValue, ConfigError> {
        self.slot(name)?
            .ok_or_else(|| ConfigError::MissingRequiredProperty {
                provider: self.provider.clone(),
                name: name.to_string(),
            })
    }

    fn mismatch(&self, name: &str, expected: PropertyKind) -> ConfigError {
        ConfigError::Invalid(format!(
            "{}: property '{name}' is not declared as {expected}",
            self.provider
        ))
    }

    /// # Errors
    ///
    /// Fails if `name` is undeclared, absent, or not a string property.
    pub fn string(&self, name: &str) -> Result<&str, ConfigError> {
        match self.present(name)? {
            PropertyValue::String(s) => Ok(s),
            _ => Err(self.mismatch(name, PropertyKind::String)),
        }
    }

    /// String property that may be absent (declared without default).
    ///
    /// # Errors
    ///
    /// Fails if `name` is undeclared or not a string property.
    pub fn opt_string(&self, name: &str) -> Result<Option<&str>, ConfigError> {
        match self.slot(name)? {
            None => Ok(None),
            Some(PropertyValue::String(s)) => Ok(Some(s)),
            Some(_) => Err(self.mismatch(name, PropertyKind::String)),
        }
    }

    /// # Errors
    ///
    /// Fails if `name` is undeclared, absent, or not an integer property.
    pub fn integer(&self, name: &str) -> Result<i64, ConfigError> {
        match self.present(name)? {
            PropertyValue::Integer(v) => Ok(*v),
            _ => Err(self.mismatch(name, PropertyKind::Integer)),
        }
    }

    /// # Errors
    ///
    /// Fails if `name` is undeclared, absent, or not a float property.
    pub fn float(&self, name: &str) -> Result<f64, ConfigError> {
        match self.present(name)? {
            PropertyValue::Float(v) => Ok(*v),
            _ => Err(self.mismatch(name, PropertyKind::Float)),
        }
    }

    /// # Errors
    ///
    /// Fails if `name` is undeclared, absent, or not a boolean property.
    pub fn boolean(&self, name: &str) -> Result<bool, ConfigError> {
        match self.present(name)? {
            PropertyValue::Boolean(v) => Ok(*v),
            _ => Err(self.mismatch(name, PropertyKind::Boolean)),
        }
    }

    /// # Errors
    ///
    /// Fails if `name` is undeclared, absent, or not a regex property.
    pub fn regex(&self, name: &str) -> Result<&Regex, ConfigError> {
        match self.present(name)? {
            PropertyValue::Regex(re) => Ok(re),
            _ => Err(self.mismatch(name, PropertyKind::Regex)),
        }
    }
}

/// Materialize `raw` against `schema` for the provider `provider`.
///
/// A JSON `null` counts as absent. Keys not named by `schema` are ignored.
///
/// # Errors
///
/// [`ConfigError::MissingRequiredProperty`] when a required key is absent,
/// [`ConfigError::PropertyType`] when a supplied or default value fails
/// coercion or falls below the declared minimum.
pub fn materialize(
    provider: &str,
    schema: &[PropertySpec],
    raw: &Map<String, Value>,
) -> Result<Properties, ConfigError> {
    let mut values = Vec::with_capacity(schema.len());

    for spec in schema {
        let supplied = raw.get(spec.name).filter(|v| !v.is_null());
        let candidate = match (supplied, spec.default) {
            (Some(value), _) => Some(value.clone()),
            (None, _) if spec.required => {
                return Err(ConfigError::MissingRequiredProperty {
                    provider: provider.to_string(),
                    name: spec.name.to_string(),
                });
            }
            (None, Some(default)) => Some(Value::String(default.to_string())),
            (None, None) => None,
        };

        let value = match candidate {
            Some(raw_value) => Some(coerce_checked(provider, spec, &raw_value)?),
            None => None,
        };
        values.push((spec.name, value));
    }

    Ok(Properties {
        provider: provider.to_string(),
        values,
    })
}

fn coerce_checked(
    provider: &str,
    spec: &PropertySpec,
    raw: &Value,
) -> Result<PropertyValue, ConfigError> {
    let type_error = |reason: String| ConfigError::PropertyType {
        provider: provider.to_string(),
        name: spec.name.to_string(),
        raw: raw.to_string(),
        reason,
    };

    let value = PropertyValue::coerce(spec.kind, raw).map_err(type_error)?;
    if let (PropertyValue::Integer(v), Some(min)) = (&value, spec.min) {
        if *v < min {
            return Err(type_error(format!("must be at least {min}")));
        }
    }
    Ok(value)
}
