//! Primitives for loading configuration and querying it by key.
//!
//! Configuration is layered from YAML/JSON files, prefixed environment variables, and in-memory values, and can be
//! queried either as a whole ([`GenericConfiguration::as_typed`]) or one key at a time
//! ([`GenericConfiguration::try_get_typed`]). Unlike a one-shot loader, the resulting configuration keeps its sources
//! around so it can be [reloaded][GenericConfiguration::reload] when the host signals a property change.
#![deny(warnings)]
#![deny(missing_docs)]

use std::{
    borrow::Cow,
    collections::HashSet,
    path::PathBuf,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard},
};

use figment::{
    error::Kind,
    value::{Num, Value},
    Figment,
};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use snafu::Snafu;
use tracing::debug;

pub mod error;
pub use self::error::{ErrorContext, GenericError};

mod provider;
use self::provider::{EnvValues, ResolvedProvider, Source};

/// A configuration error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum ConfigurationError {
    /// Environment variable prefix was empty.
    #[snafu(display("Environment variable prefix must not be empty."))]
    EmptyPrefix,

    /// Requested field was missing from the configuration.
    #[snafu(display("Missing field '{}' in configuration. {}", field, help_text))]
    MissingField {
        /// Help text describing how to set the missing field.
        help_text: String,

        /// Name of the missing field.
        field: Cow<'static, str>,
    },

    /// Requested field was present, but not of the expected type.
    #[snafu(display(
        "Expected value for field '{}' to be '{}', got '{}' instead.",
        field,
        expected_ty,
        actual_ty
    ))]
    InvalidFieldType {
        /// Period-separated path to the invalid field.
        field: String,

        /// Expected data type.
        expected_ty: String,

        /// Actual data type.
        actual_ty: String,
    },

    /// A configuration source could not be resolved.
    #[snafu(display("Failed to load configuration from {}: {}", source_name, source))]
    Load {
        /// Description of the source that failed.
        source_name: String,

        /// Error source.
        source: figment::Error,
    },

    /// Generic configuration error.
    #[snafu(display("Failed to query configuration: {}", source))]
    Generic {
        /// Error source.
        source: GenericError,
    },
}

impl From<figment::Error> for ConfigurationError {
    fn from(e: figment::Error) -> Self {
        from_figment_error(&HashSet::new(), e)
    }
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
enum LookupSource {
    /// The key is looked up in a form suitable for environment variables.
    Environment { prefix: String },
}

impl LookupSource {
    fn transform_key(&self, key: &str) -> String {
        match self {
            // The prefix is already uppercased with a trailing underscore.
            LookupSource::Environment { prefix } => format!("{}{}", prefix, key.replace('.', "_").to_uppercase()),
        }
    }
}

/// A configuration loader that pulls from various sources.
///
/// Sources are layered in the order they are added: sources added later take precedence over sources added earlier.
///
/// # Supported sources
///
/// - YAML file
/// - JSON file
/// - environment variables (must be prefixed; see [`from_environment`][Self::from_environment])
/// - in-memory JSON values
#[derive(Default)]
pub struct ConfigurationLoader {
    sources: Vec<Source>,
    lookup_sources: HashSet<LookupSource>,
}

impl ConfigurationLoader {
    /// Adds the given YAML configuration file.
    ///
    /// The file is required: if it cannot be read or parsed when the configuration is resolved (or reloaded), an error
    /// is returned.
    pub fn from_yaml<P>(mut self, path: P) -> Self
    where
        P: Into<PathBuf>,
    {
        self.sources.push(Source::Yaml {
            path: path.into(),
            required: true,
        });
        self
    }

    /// Adds the given YAML configuration file, ignoring it if it cannot be read or parsed.
    pub fn try_from_yaml<P>(mut self, path: P) -> Self
    where
        P: Into<PathBuf>,
    {
        self.sources.push(Source::Yaml {
            path: path.into(),
            required: false,
        });
        self
    }

    /// Adds the given JSON configuration file.
    ///
    /// The file is required: if it cannot be read or parsed when the configuration is resolved (or reloaded), an error
    /// is returned.
    pub fn from_json<P>(mut self, path: P) -> Self
    where
        P: Into<PathBuf>,
    {
        self.sources.push(Source::Json {
            path: path.into(),
            required: true,
        });
        self
    }

    /// Adds the given JSON configuration file, ignoring it if it cannot be read or parsed.
    pub fn try_from_json<P>(mut self, path: P) -> Self
    where
        P: Into<PathBuf>,
    {
        self.sources.push(Source::Json {
            path: path.into(),
            required: false,
        });
        self
    }

    /// Adds environment variables with the given prefix.
    ///
    /// An underscore is appended to the prefix if it does not already end with one, so a prefix of `app` matches any
    /// variable starting with `APP_`. The prefix is case-insensitive.
    ///
    /// # Errors
    ///
    /// If the prefix is empty, an error will be returned.
    pub fn from_environment(mut self, prefix: &str) -> Result<Self, ConfigurationError> {
        if prefix.is_empty() {
            return Err(ConfigurationError::EmptyPrefix);
        }

        let prefix = if prefix.ends_with('_') {
            prefix.to_uppercase()
        } else {
            format!("{}_", prefix.to_uppercase())
        };

        self.sources.push(Source::Environment { prefix: prefix.clone() });
        self.lookup_sources.insert(LookupSource::Environment { prefix });
        Ok(self)
    }

    /// Adds in-memory values.
    ///
    /// `values` should be a JSON object. Nested objects map to dotted keys: `{"a": {"b": 1}}` sets `a.b`.
    pub fn with_values(mut self, values: JsonValue) -> Self {
        self.sources.push(Source::Values(values));
        self
    }

    /// Consumes the loader, resolving every source, and deserializes the result as `T`.
    ///
    /// # Errors
    ///
    /// If a required source cannot be resolved, or the merged configuration cannot be deserialized into `T`, an error
    /// will be returned.
    pub fn into_typed<'a, T>(self) -> Result<T, ConfigurationError>
    where
        T: Deserialize<'a>,
    {
        let figment = resolve_sources(&self.sources)?.parsed;
        figment
            .extract()
            .map_err(|e| from_figment_error(&self.lookup_sources, e))
    }

    /// Consumes the loader, resolving every source, and wraps the result in a [`GenericConfiguration`].
    ///
    /// # Errors
    ///
    /// If a required source cannot be resolved, an error will be returned.
    pub fn into_generic(self) -> Result<GenericConfiguration, ConfigurationError> {
        let base = resolve_sources(&self.sources)?;

        Ok(GenericConfiguration {
            inner: Arc::new(Inner {
                sources: self.sources,
                lookup_sources: self.lookup_sources,
                state: RwLock::new(State {
                    merged: base.clone(),
                    base,
                    overrides: None,
                }),
            }),
        })
    }
}

/// Merged sources, in two forms that differ only in how environment variables are read.
#[derive(Clone)]
struct Layers {
    // Environment values parsed into typed values. Typed lookups read from this.
    parsed: Figment,

    // Environment values as their exact text. String lookups read from this.
    verbatim: Figment,

    // Each source on its own, lowest precedence first.
    each: Vec<Figment>,
}

impl Layers {
    fn with_overrides(&self, overrides: Option<&JsonValue>) -> Result<Self, ConfigurationError> {
        let Some(values) = overrides else {
            return Ok(self.clone());
        };

        let provider =
            ResolvedProvider::from_values(values, "runtime overrides").map_err(|e| ConfigurationError::Load {
                source_name: "runtime overrides".to_string(),
                source: e,
            })?;

        let mut each = self.each.clone();
        each.push(Figment::from(provider.clone()));
        Ok(Self {
            parsed: self.parsed.clone().admerge(provider.clone()),
            verbatim: self.verbatim.clone().admerge(provider),
            each,
        })
    }

    /// Returns the spelling of `key` set by the highest-precedence source that sets it.
    ///
    /// Environment variables don't nest, so a key like `foo.bar` sourced from the environment lands as `foo_bar`.
    fn spelling(&self, key: &str) -> String {
        let flat = key.replace('.', "_");
        for layer in self.each.iter().rev() {
            if layer.contains(key) {
                break;
            }
            if layer.contains(&flat) {
                return flat;
            }
        }
        key.to_string()
    }
}

fn resolve_sources(sources: &[Source]) -> Result<Layers, ConfigurationError> {
    let mut parsed = Figment::new();
    let mut verbatim = Figment::new();
    let mut each = Vec::with_capacity(sources.len());
    for source in sources {
        let resolved = ResolvedProvider::resolve(source, EnvValues::Parsed).and_then(|provider| {
            let verbatim_provider = match source {
                Source::Environment { .. } => ResolvedProvider::resolve(source, EnvValues::Verbatim)?,
                _ => provider.clone(),
            };
            Ok((provider, verbatim_provider))
        });

        match resolved {
            Ok((provider, verbatim_provider)) => {
                each.push(Figment::from(provider.clone()));
                parsed = parsed.admerge(provider);
                verbatim = verbatim.admerge(verbatim_provider);
            }
            Err(e) if !source.is_required() => {
                debug!(error = %e, source = %source.describe(), "Unable to load optional configuration source. Ignoring.");
            }
            Err(e) => {
                return Err(ConfigurationError::Load {
                    source_name: source.describe(),
                    source: e,
                })
            }
        }
    }

    Ok(Layers { parsed, verbatim, each })
}

struct State {
    // Merged view of every registered source.
    base: Layers,

    // Runtime override layer, merged on top of `base`.
    overrides: Option<JsonValue>,

    // `base` with `overrides` applied. This is what lookups read from.
    merged: Layers,
}

struct Inner {
    sources: Vec<Source>,
    lookup_sources: HashSet<LookupSource>,
    state: RwLock<State>,
}

/// A generic configuration object.
///
/// This represents the merged configuration derived from [`ConfigurationLoader`] in its raw form. Values are queried by
/// key, where keys take the form `a.b.c` and periods indicate nesting.
///
/// Cloning is cheap, and all clones observe the same underlying configuration: a [`reload`][Self::reload] or
/// [`set_override`][Self::set_override] through one clone is visible to every other.
#[derive(Clone)]
pub struct GenericConfiguration {
    inner: Arc<Inner>,
}

impl GenericConfiguration {
    fn state(&self) -> RwLockReadGuard<'_, State> {
        self.inner.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn get<'a, T>(&self, key: &str) -> Result<T, ConfigurationError>
    where
        T: Deserialize<'a>,
    {
        let state = self.state();
        state
            .merged
            .parsed
            .extract_inner(&state.merged.spelling(key))
            .map_err(|e| from_figment_error(&self.inner.lookup_sources, e))
    }

    /// Gets a configuration value by key.
    ///
    /// # Errors
    ///
    /// If the key does not exist, or its value could not be deserialized into `T`, an error will be returned.
    pub fn get_typed<'a, T>(&self, key: &str) -> Result<T, ConfigurationError>
    where
        T: Deserialize<'a>,
    {
        self.get(key)
    }

    /// Gets a configuration value by key, or the default value of `T` if the key is missing or invalid.
    ///
    /// This swallows deserialization errors and should be used sparingly.
    pub fn get_typed_or_default<'a, T>(&self, key: &str) -> T
    where
        T: Default + Deserialize<'a>,
    {
        self.get(key).unwrap_or_default()
    }

    /// Gets a configuration value by key, if it exists.
    ///
    /// # Errors
    ///
    /// If the key exists but its value could not be deserialized into `T`, an error will be returned.
    pub fn try_get_typed<'a, T>(&self, key: &str) -> Result<Option<T>, ConfigurationError>
    where
        T: Deserialize<'a>,
    {
        match self.get(key) {
            Ok(value) => Ok(Some(value)),
            Err(ConfigurationError::MissingField { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Gets a configuration value by key as a string, if it exists.
    ///
    /// Any scalar is accepted: numbers and booleans from files are rendered as text, and values sourced from
    /// environment variables are returned exactly as set, so `APP_PASSWORD=0123` yields `"0123"`. An explicit null is
    /// treated as missing.
    ///
    /// # Errors
    ///
    /// If the key exists but holds an array or a map, an error will be returned.
    pub fn try_get_string(&self, key: &str) -> Result<Option<String>, ConfigurationError> {
        let value = {
            let state = self.state();
            match state.merged.verbatim.find_value(&state.merged.spelling(key)) {
                Ok(value) => value,
                Err(e) if matches!(e.kind, Kind::MissingField(_)) => return Ok(None),
                Err(e) => return Err(from_figment_error(&self.inner.lookup_sources, e)),
            }
        };

        match value {
            Value::String(_, s) => Ok(Some(s)),
            Value::Char(_, c) => Ok(Some(c.to_string())),
            Value::Bool(_, b) => Ok(Some(b.to_string())),
            Value::Num(_, num) => Ok(Some(render_num(num))),
            Value::Empty(..) => Ok(None),
            value @ (Value::Dict(..) | Value::Array(..)) => Err(ConfigurationError::InvalidFieldType {
                field: key.to_string(),
                expected_ty: "a string".to_string(),
                actual_ty: value.to_actual().to_string(),
            }),
        }
    }

    /// Deserializes the entire configuration as `T`.
    ///
    /// # Errors
    ///
    /// If the configuration could not be deserialized into `T`, an error will be returned.
    pub fn as_typed<'a, T>(&self) -> Result<T, ConfigurationError>
    where
        T: Deserialize<'a>,
    {
        self.state()
            .merged
            .parsed
            .extract()
            .map_err(|e| from_figment_error(&self.inner.lookup_sources, e))
    }

    /// Re-resolves every source the configuration was loaded from.
    ///
    /// The override layer, if any, is kept and re-applied on top. On failure, the current configuration is left
    /// untouched.
    ///
    /// # Errors
    ///
    /// If a required source can no longer be resolved, an error will be returned.
    pub fn reload(&self) -> Result<(), ConfigurationError> {
        let base = resolve_sources(&self.inner.sources)?;

        let mut state = self.inner.state.write().unwrap_or_else(PoisonError::into_inner);
        let merged = base.with_overrides(state.overrides.as_ref())?;
        state.base = base;
        state.merged = merged;

        debug!(sources = self.inner.sources.len(), "Reloaded configuration.");
        Ok(())
    }

    /// Replaces the runtime override layer.
    ///
    /// Overrides take precedence over every other source and survive [`reload`][Self::reload]. Passing `None` removes
    /// the layer.
    ///
    /// # Errors
    ///
    /// If `overrides` is not a JSON object, an error will be returned and the current configuration is left untouched.
    pub fn set_override(&self, overrides: Option<JsonValue>) -> Result<(), ConfigurationError> {
        let mut state = self.inner.state.write().unwrap_or_else(PoisonError::into_inner);
        let merged = state.base.with_overrides(overrides.as_ref())?;
        state.overrides = overrides;
        state.merged = merged;
        Ok(())
    }
}

fn render_num(num: Num) -> String {
    match num {
        Num::U8(v) => v.to_string(),
        Num::U16(v) => v.to_string(),
        Num::U32(v) => v.to_string(),
        Num::U64(v) => v.to_string(),
        Num::U128(v) => v.to_string(),
        Num::USize(v) => v.to_string(),
        Num::I8(v) => v.to_string(),
        Num::I16(v) => v.to_string(),
        Num::I32(v) => v.to_string(),
        Num::I64(v) => v.to_string(),
        Num::I128(v) => v.to_string(),
        Num::ISize(v) => v.to_string(),
        Num::F32(v) => v.to_string(),
        Num::F64(v) => v.to_string(),
    }
}

fn from_figment_error(lookup_sources: &HashSet<LookupSource>, e: figment::Error) -> ConfigurationError {
    match e.kind {
        Kind::MissingField(field) => {
            let mut valid_keys = lookup_sources
                .iter()
                .map(|source| source.transform_key(&field))
                .collect::<Vec<_>>();

            // Always specify the original key as a valid key to try.
            valid_keys.insert(0, field.to_string());

            let help_text = format!("Try setting `{}`.", valid_keys.join("` or `"));

            ConfigurationError::MissingField { help_text, field }
        }
        Kind::InvalidType(actual_ty, expected_ty) => ConfigurationError::InvalidFieldType {
            field: e.path.join("."),
            expected_ty,
            actual_ty: actual_ty.to_string(),
        },
        _ => ConfigurationError::Generic { source: e.into() },
    }
}
