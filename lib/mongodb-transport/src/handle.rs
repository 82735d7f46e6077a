use std::sync::Arc;

use mongodb::bson::Document;
use snafu::ResultExt as _;
use tracing::debug;

use crate::{
    config::MongoOutboundConfiguration,
    error::{Authentication, BindDatabase, Connect, ConnectionError, ResolveCollection},
    store::{DocumentStore, StoreCollection, StoreError, StoreSession},
};

/// The live resources of one connection.
///
/// A handle owns a client session to one endpoint, bound to one database and resolved to one collection. It is
/// immutable once acquired: reconfiguring means releasing the handle and acquiring a new one.
pub struct ConnectionHandle {
    session: Box<dyn StoreSession>,
    collection: Arc<dyn StoreCollection>,
}

impl ConnectionHandle {
    /// Acquires a connection from `store` for the given configuration.
    ///
    /// Acquisition connects, binds the database, authenticates if the credentials are complete, and resolves the
    /// collection, in that order. If any step fails, the session opened by the first step is closed before the error
    /// is returned.
    ///
    /// # Errors
    ///
    /// If any acquisition step fails, an error identifying the step is returned.
    pub fn acquire(store: &dyn DocumentStore, config: &MongoOutboundConfiguration) -> Result<Self, ConnectionError> {
        let endpoint = config.endpoint();
        let session = store
            .connect(endpoint, config.write_acknowledgement())
            .context(Connect {
                endpoint: endpoint.clone(),
            })?;

        match bind(session.as_ref(), config) {
            Ok(collection) => {
                debug!(%endpoint, collection = collection.namespace(), "Acquired connection.");
                Ok(Self { session, collection })
            }
            Err(e) => {
                session.close();
                Err(e)
            }
        }
    }

    /// Returns the namespace of the bound collection.
    pub fn namespace(&self) -> &str {
        self.collection.namespace()
    }

    /// Inserts a document into the bound collection.
    ///
    /// # Errors
    ///
    /// If the insert fails, or the handle has been released, an error is returned.
    pub fn insert(&self, document: Document) -> Result<(), StoreError> {
        self.collection.insert(document)
    }

    /// Releases the connection.
    ///
    /// Releasing is idempotent. Inserts through a released handle fail.
    pub fn release(&self) {
        self.session.close();
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.release();
    }
}

fn bind(
    session: &dyn StoreSession, config: &MongoOutboundConfiguration,
) -> Result<Arc<dyn StoreCollection>, ConnectionError> {
    let endpoint = config.endpoint();
    let mut database = session.database(config.database_name()).context(BindDatabase {
        database: config.database_name(),
        endpoint: endpoint.clone(),
    })?;

    let credentials = config.credentials();
    if credentials.is_complete() {
        database.authenticate(credentials).context(Authentication {
            endpoint: endpoint.clone(),
            user_name: credentials.user_name(),
        })?;
    }

    database.collection(config.collection_name()).context(ResolveCollection {
        collection: config.collection_name(),
        database: config.database_name(),
    })
}
