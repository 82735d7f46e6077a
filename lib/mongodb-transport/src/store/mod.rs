//! Document store seam.
//!
//! The transport talks to its store through a small set of traits mirroring the steps of acquiring a connection:
//! connect a session, bind a database, optionally authenticate against it, and resolve a collection. The
//! [`MongoStore`] implementation drives the MongoDB driver. [`MemoryStore`] is an in-process stand-in.

use std::sync::Arc;

use mongodb::bson::Document;
use snafu::Snafu;

use crate::config::{Credentials, Endpoint, WriteAcknowledgement};

pub mod memory;
pub use self::memory::MemoryStore;

mod mongo;
pub use self::mongo::MongoStore;

/// A store error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)), visibility(pub))]
pub enum StoreError {
    /// The store could not be reached.
    #[snafu(display("Store at {} is unreachable: {}", endpoint, reason))]
    Unreachable {
        /// Endpoint that was dialed.
        endpoint: Endpoint,

        /// Reason given by the driver.
        reason: String,
    },

    /// The store rejected the supplied credentials.
    #[snafu(display("Store rejected authentication: {}", reason))]
    AuthenticationRejected {
        /// Reason given by the store.
        reason: String,
    },

    /// The store rejected a write.
    #[snafu(display("Store rejected write: {}", reason))]
    WriteRejected {
        /// Reason given by the store.
        reason: String,
    },

    /// The session this resource belongs to has been closed.
    #[snafu(display("Store session is closed."))]
    Closed,

    /// Any other driver failure.
    #[snafu(display("Store driver error: {}", source))]
    Driver {
        /// Error source.
        source: mongodb::error::Error,
    },
}

/// A document store.
pub trait DocumentStore: Send + Sync {
    /// Opens a client session to the store at `endpoint`.
    ///
    /// `write_acknowledgement` applies to every write made through the session. `None` leaves the store client's
    /// default in place.
    ///
    /// # Errors
    ///
    /// If the store cannot be reached, an error is returned.
    fn connect(
        &self, endpoint: &Endpoint, write_acknowledgement: Option<WriteAcknowledgement>,
    ) -> Result<Box<dyn StoreSession>, StoreError>;
}

/// A client session.
pub trait StoreSession: Send + Sync {
    /// Binds the database called `name`.
    ///
    /// # Errors
    ///
    /// If the session is closed, or the database cannot be bound, an error is returned.
    fn database(&self, name: &str) -> Result<Box<dyn StoreDatabase>, StoreError>;

    /// Closes the session, releasing its connections.
    ///
    /// Closing is idempotent. Databases and collections resolved from a closed session fail any further operation.
    fn close(&self);
}

/// A database bound through a session.
pub trait StoreDatabase: Send + Sync {
    /// Authenticates against this database.
    ///
    /// # Errors
    ///
    /// If the store rejects the credentials, [`StoreError::AuthenticationRejected`] is returned.
    fn authenticate(&mut self, credentials: &Credentials) -> Result<(), StoreError>;

    /// Resolves the collection called `name`.
    ///
    /// # Errors
    ///
    /// If the session is closed, or the collection cannot be resolved, an error is returned.
    fn collection(&self, name: &str) -> Result<Arc<dyn StoreCollection>, StoreError>;
}

/// A collection documents can be inserted into.
pub trait StoreCollection: Send + Sync {
    /// Returns the namespace of this collection, in `database.collection` form.
    fn namespace(&self) -> &str;

    /// Inserts a single document.
    ///
    /// # Errors
    ///
    /// If the write fails or is rejected, an error is returned. Writes are never retried.
    fn insert(&self, document: Document) -> Result<(), StoreError>;
}
