use std::{fmt, str::FromStr};

use geoevent_config::{ConfigurationError, GenericConfiguration};
use snafu::{ResultExt as _, Snafu};

/// Configuration key for the store server address.
pub const HOST_KEY: &str = "mongodb.host";

/// Configuration key for the store server port.
pub const PORT_KEY: &str = "mongodb.port";

/// Configuration key for the logical database to bind.
pub const DATABASE_NAME_KEY: &str = "mongodb.database_name";

/// Configuration key for the authentication principal.
pub const USER_NAME_KEY: &str = "mongodb.user_name";

/// Configuration key for the authentication secret.
pub const PASSWORD_KEY: &str = "mongodb.password";

/// Configuration key for the target collection.
pub const COLLECTION_NAME_KEY: &str = "mongodb.collection_name";

/// Configuration key for the write acknowledgement level.
pub const WRITE_ACKNOWLEDGEMENT_KEY: &str = "mongodb.write_acknowledgement";

pub(crate) const DEFAULT_HOST: &str = "localhost";
pub(crate) const DEFAULT_PORT: u16 = 27017;
pub(crate) const DEFAULT_DATABASE_NAME: &str = "db";
pub(crate) const DEFAULT_COLLECTION_NAME: &str = "GeoEvents";

/// A transport configuration error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum TransportConfigError {
    /// A property could not be read from the configuration source.
    #[snafu(display("Failed to read transport configuration: {}", source))]
    Lookup {
        /// Error source.
        source: ConfigurationError,
    },

    /// The port is outside of the valid TCP port range.
    #[snafu(display("Invalid value for '{}': port must be between 1 and 65535, got {}.", PORT_KEY, port))]
    InvalidPort {
        /// Configured port.
        port: i64,
    },

    /// A property that must name something was empty.
    #[snafu(display("Invalid value for '{}': must not be empty.", key))]
    EmptyValue {
        /// Key of the empty property.
        key: &'static str,
    },

    /// The write acknowledgement level is not one the store understands.
    #[snafu(display(
        "Invalid value for '{}': unknown write acknowledgement level '{}'.",
        WRITE_ACKNOWLEDGEMENT_KEY,
        value
    ))]
    UnknownWriteAcknowledgement {
        /// Configured value.
        value: String,
    },
}

/// Write acknowledgement level.
///
/// The durability guarantee requested from the store for each insert. Names follow the store's named write concerns,
/// and are parsed case-insensitively (legacy aliases such as `safe` and `fsync_safe` are accepted).
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum WriteAcknowledgement {
    /// Fire-and-forget: the store does not acknowledge writes (`w: 0`).
    Unacknowledged,

    /// Acknowledged by the primary (`w: 1`).
    Acknowledged,

    /// Acknowledged by two members of the replica set (`w: 2`).
    W2,

    /// Acknowledged by three members of the replica set (`w: 3`).
    W3,

    /// Acknowledged by the primary after being written to its journal (`w: 1, j: true`).
    Journaled,

    /// Acknowledged by a majority of the replica set (`w: "majority"`).
    Majority,
}

impl WriteAcknowledgement {
    /// Returns the canonical name of this level.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unacknowledged => "unacknowledged",
            Self::Acknowledged => "acknowledged",
            Self::W2 => "w2",
            Self::W3 => "w3",
            Self::Journaled => "journaled",
            Self::Majority => "majority",
        }
    }
}

impl fmt::Display for WriteAcknowledgement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WriteAcknowledgement {
    type Err = TransportConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unacknowledged" | "normal" | "none" | "errors_ignored" => Ok(Self::Unacknowledged),
            "acknowledged" | "safe" | "w1" => Ok(Self::Acknowledged),
            "w2" => Ok(Self::W2),
            "w3" => Ok(Self::W3),
            "journaled" | "journal_safe" | "fsynced" | "fsync_safe" => Ok(Self::Journaled),
            "majority" | "replicas_safe" => Ok(Self::Majority),
            _ => Err(TransportConfigError::UnknownWriteAcknowledgement { value: s.to_string() }),
        }
    }
}

/// Authentication credentials.
///
/// The password is never included in the `Debug` representation.
#[derive(Clone, Default, Eq, PartialEq)]
pub struct Credentials {
    user_name: String,
    password: String,
}

impl Credentials {
    /// Creates a new `Credentials`.
    pub fn new(user_name: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user_name: user_name.into(),
            password: password.into(),
        }
    }

    /// Returns the user name.
    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    /// Returns the password.
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Returns `true` if both a user name and a password are set.
    ///
    /// Authentication is only attempted with complete credentials: a user name on its own is ignored.
    pub fn is_complete(&self) -> bool {
        !self.user_name.is_empty() && !self.password.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user_name", &self.user_name)
            .field("password", &if self.password.is_empty() { "" } else { "<redacted>" })
            .finish()
    }
}

/// Network location of the store.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Creates a new `Endpoint`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Returns the host.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the port.
    pub const fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// MongoDB outbound transport configuration.
///
/// An immutable snapshot: a transport reads a complete `MongoOutboundConfiguration` and applies it as a whole, never
/// field by field.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MongoOutboundConfiguration {
    endpoint: Endpoint,
    database_name: String,
    credentials: Credentials,
    collection_name: String,
    write_acknowledgement: Option<WriteAcknowledgement>,
}

impl MongoOutboundConfiguration {
    /// Creates a new `MongoOutboundConfiguration` from the given configuration.
    ///
    /// Every property is optional, and falls back to its default when missing. Names and credentials are read as
    /// text even when they look like numbers.
    ///
    /// # Errors
    ///
    /// If a property is present but has the wrong type or an invalid value, an error is returned.
    pub fn from_configuration(config: &GenericConfiguration) -> Result<Self, TransportConfigError> {
        let port = config.try_get_typed::<i64>(PORT_KEY).context(Lookup)?;
        let port = match port {
            None => DEFAULT_PORT,
            Some(port) => u16::try_from(port)
                .ok()
                .filter(|port| *port != 0)
                .ok_or(TransportConfigError::InvalidPort { port })?,
        };

        let write_acknowledgement = config
            .try_get_string(WRITE_ACKNOWLEDGEMENT_KEY)
            .context(Lookup)?
            .filter(|value| !value.trim().is_empty())
            .map(|value| value.parse::<WriteAcknowledgement>())
            .transpose()?;

        Ok(Self {
            endpoint: Endpoint::new(required_name(config, HOST_KEY, DEFAULT_HOST)?, port),
            database_name: required_name(config, DATABASE_NAME_KEY, DEFAULT_DATABASE_NAME)?,
            credentials: Credentials::new(
                config.try_get_string(USER_NAME_KEY).context(Lookup)?.unwrap_or_default(),
                config.try_get_string(PASSWORD_KEY).context(Lookup)?.unwrap_or_default(),
            ),
            collection_name: required_name(config, COLLECTION_NAME_KEY, DEFAULT_COLLECTION_NAME)?,
            write_acknowledgement,
        })
    }

    /// Returns the store endpoint.
    pub const fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Returns the name of the database to bind.
    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    /// Returns the authentication credentials.
    pub const fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Returns the name of the collection events are inserted into.
    pub fn collection_name(&self) -> &str {
        &self.collection_name
    }

    /// Returns the write acknowledgement level, if one was configured.
    ///
    /// `None` means the store client's own default applies.
    pub const fn write_acknowledgement(&self) -> Option<WriteAcknowledgement> {
        self.write_acknowledgement
    }
}

impl Default for MongoOutboundConfiguration {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::new(DEFAULT_HOST, DEFAULT_PORT),
            database_name: DEFAULT_DATABASE_NAME.to_string(),
            credentials: Credentials::default(),
            collection_name: DEFAULT_COLLECTION_NAME.to_string(),
            write_acknowledgement: None,
        }
    }
}

fn required_name(
    config: &GenericConfiguration, key: &'static str, default: &str,
) -> Result<String, TransportConfigError> {
    let value = config
        .try_get_string(key)
        .context(Lookup)?
        .unwrap_or_else(|| default.to_string());

    if value.trim().is_empty() {
        return Err(TransportConfigError::EmptyValue { key });
    }

    Ok(value)
}
