use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Json, Serialized, Yaml},
    value::{Dict, Map},
    Error, Figment, Metadata, Profile, Provider,
};
use serde_json::Value as JsonValue;

/// A configuration source, as registered with the loader.
///
/// Sources are kept in their unresolved form so that the configuration can be reloaded: reloading resolves every
/// source again, picking up changes made to files or the environment since the last resolution.
#[derive(Clone, Debug)]
pub(crate) enum Source {
    Yaml { path: PathBuf, required: bool },
    Json { path: PathBuf, required: bool },
    Environment { prefix: String },
    Values(JsonValue),
}

impl Source {
    /// Returns `true` if failing to resolve this source should fail the whole resolution.
    pub fn is_required(&self) -> bool {
        match self {
            Self::Yaml { required, .. } | Self::Json { required, .. } => *required,
            Self::Environment { .. } | Self::Values(_) => true,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Yaml { path, .. } => format!("YAML file '{}'", path.display()),
            Self::Json { path, .. } => format!("JSON file '{}'", path.display()),
            Self::Environment { prefix } => format!("environment variables with prefix '{}'", prefix),
            Self::Values(_) => "in-memory values".to_string(),
        }
    }
}

/// How values read from environment variables are interpreted.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum EnvValues {
    /// Values are parsed into numbers, booleans, arrays, and dictionaries where they look like one.
    Parsed,

    /// Values are kept as the exact text of the variable.
    Verbatim,
}

/// A provider whose data has been read and parsed up front.
///
/// Resolving eagerly means that I/O and parse errors surface at load time, and that the resulting provider is
/// `Send + Sync` regardless of what the underlying source was.
#[derive(Clone)]
pub(crate) struct ResolvedProvider {
    data: Map<Profile, Dict>,
    metadata: Metadata,
}

impl ResolvedProvider {
    pub fn resolve(source: &Source, env_values: EnvValues) -> Result<Self, Error> {
        match source {
            Source::Yaml { path, .. } => Self::from_file::<Yaml>(path, "YAML file"),
            Source::Json { path, .. } => Self::from_file::<Json>(path, "JSON file"),
            Source::Environment { prefix } => Ok(Self {
                data: match env_values {
                    EnvValues::Parsed => Env::prefixed(prefix).data()?,
                    EnvValues::Verbatim => verbatim_environment(prefix)?,
                },
                metadata: Metadata::named(format!("environment variables ({}*)", prefix)),
            }),
            Source::Values(values) => Ok(Self {
                data: Serialized::defaults(values).data()?,
                metadata: Metadata::named("in-memory values"),
            }),
        }
    }

    pub fn from_values(values: &JsonValue, name: &'static str) -> Result<Self, Error> {
        Ok(Self {
            data: Serialized::defaults(values).data()?,
            metadata: Metadata::named(name),
        })
    }

    fn from_file<F: Format>(path: &Path, kind: &'static str) -> Result<Self, Error> {
        let file_data = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
        let data = F::string(&file_data).data()?;

        Ok(Self {
            data,
            metadata: Metadata::from(kind, path),
        })
    }
}

fn verbatim_environment(prefix: &str) -> Result<Map<Profile, Dict>, Error> {
    let mut figment = Figment::new();
    for (key, value) in Env::prefixed(prefix).iter() {
        figment = figment.merge(Serialized::default(key.as_str(), value));
    }
    figment.data()
}

impl Provider for ResolvedProvider {
    fn metadata(&self) -> Metadata {
        self.metadata.clone()
    }

    fn data(&self) -> Result<Map<Profile, Dict>, Error> {
        Ok(self.data.clone())
    }
}
