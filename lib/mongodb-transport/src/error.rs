use snafu::Snafu;

use crate::{config::Endpoint, store::StoreError, TransportConfigError};

/// A connection acquisition error.
///
/// Each variant identifies the step of acquisition that failed. None of them ever carry the password.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)), visibility(pub(crate)))]
pub enum ConnectionError {
    /// The store could not be reached.
    #[snafu(display("Failed to connect to MongoDB at {}: {}", endpoint, source))]
    Connect {
        /// Endpoint that was dialed.
        endpoint: Endpoint,

        /// Error source.
        source: StoreError,
    },

    /// The database could not be bound.
    #[snafu(display("Failed to bind database '{}' on {}: {}", database, endpoint, source))]
    BindDatabase {
        /// Database name.
        database: String,

        /// Endpoint of the store.
        endpoint: Endpoint,

        /// Error source.
        source: StoreError,
    },

    /// The store rejected the configured credentials.
    ///
    /// The message never includes the underlying store error.
    #[snafu(display("Failed to authenticate to MongoDB at {} as user '{}'.", endpoint, user_name))]
    Authentication {
        /// Endpoint of the store.
        endpoint: Endpoint,

        /// User name that was rejected.
        user_name: String,

        /// Error source.
        source: StoreError,
    },

    /// The collection could not be resolved.
    #[snafu(display("Failed to resolve collection '{}' in database '{}': {}", collection, database, source))]
    ResolveCollection {
        /// Collection name.
        collection: String,

        /// Database name.
        database: String,

        /// Error source.
        source: StoreError,
    },
}

/// A lifecycle error.
///
/// Returned when starting or reconfiguring a transport leaves it in the `ERROR` state.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)), visibility(pub(crate)))]
pub enum LifecycleError {
    /// The transport configuration could not be read.
    #[snafu(display("{}", source))]
    Configuration {
        /// Error source.
        source: TransportConfigError,
    },

    /// A connection could not be acquired.
    #[snafu(display("{}", source))]
    Connection {
        /// Error source.
        source: ConnectionError,
    },
}
