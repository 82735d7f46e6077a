use std::{
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};

use mongodb::{
    bson::{doc, Document},
    error::{Error as DriverError, ErrorKind},
    options::{Acknowledgment, ClientOptions, Credential, ServerAddress, WriteConcern},
    sync::Client,
};
use tracing::debug;

use super::{DocumentStore, StoreCollection, StoreDatabase, StoreError, StoreSession};
use crate::config::{Credentials, Endpoint, WriteAcknowledgement};

const DEFAULT_APP_NAME: &str = "geoevent-mongodb-outbound";
const DEFAULT_SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(10);
const AUTHENTICATION_FAILED_CODE: i32 = 18;

/// A MongoDB-backed document store.
///
/// Sessions are driven by the driver's blocking client. Connecting issues a `ping` so that an unreachable server is
/// reported when the connection is acquired, not on the first insert.
#[derive(Clone, Debug)]
pub struct MongoStore {
    app_name: String,
    server_selection_timeout: Duration,
}

impl MongoStore {
    /// Creates a new `MongoStore` with default client settings.
    pub fn new() -> Self {
        Self {
            app_name: DEFAULT_APP_NAME.to_string(),
            server_selection_timeout: DEFAULT_SERVER_SELECTION_TIMEOUT,
        }
    }

    /// Sets the application name reported to the server.
    ///
    /// Defaults to `geoevent-mongodb-outbound`.
    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    /// Sets how long the client waits for a suitable server before failing an operation.
    ///
    /// Defaults to 10 seconds.
    pub fn with_server_selection_timeout(mut self, timeout: Duration) -> Self {
        self.server_selection_timeout = timeout;
        self
    }

    fn client_options(&self, endpoint: &Endpoint, write_acknowledgement: Option<WriteAcknowledgement>) -> ClientOptions {
        let mut options = ClientOptions::default();
        options.hosts = vec![ServerAddress::Tcp {
            host: endpoint.host().to_string(),
            port: Some(endpoint.port()),
        }];
        options.app_name = Some(self.app_name.clone());
        options.server_selection_timeout = Some(self.server_selection_timeout);
        options.write_concern = write_acknowledgement.map(write_concern);
        options
    }
}

impl Default for MongoStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore for MongoStore {
    fn connect(
        &self, endpoint: &Endpoint, write_acknowledgement: Option<WriteAcknowledgement>,
    ) -> Result<Box<dyn StoreSession>, StoreError> {
        let options = self.client_options(endpoint, write_acknowledgement);
        let client = Client::with_options(options.clone()).map_err(|e| connect_error(endpoint, e))?;

        // Any database answers `ping`, and `admin` needs no particular privileges to do so.
        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .run()
            .map_err(|e| connect_error(endpoint, e))?;

        debug!(%endpoint, "Connected to MongoDB.");

        Ok(Box::new(MongoSession {
            shared: Arc::new(SessionShared {
                endpoint: endpoint.clone(),
                options,
                client: RwLock::new(Some(client)),
            }),
        }))
    }
}

struct SessionShared {
    endpoint: Endpoint,
    options: ClientOptions,
    client: RwLock<Option<Client>>,
}

impl SessionShared {
    fn client(&self) -> Result<Client, StoreError> {
        self.client
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(StoreError::Closed)
    }
}

struct MongoSession {
    shared: Arc<SessionShared>,
}

impl StoreSession for MongoSession {
    fn database(&self, name: &str) -> Result<Box<dyn StoreDatabase>, StoreError> {
        // Binding only validates that the session is still open: the driver resolves databases lazily.
        let _ = self.shared.client()?;

        Ok(Box::new(MongoDatabase {
            shared: Arc::clone(&self.shared),
            name: name.to_string(),
        }))
    }

    fn close(&self) {
        let client = self.shared.client.write().unwrap_or_else(PoisonError::into_inner).take();
        if client.is_some() {
            debug!(endpoint = %self.shared.endpoint, "Closed MongoDB session.");
        }
    }
}

struct MongoDatabase {
    shared: Arc<SessionShared>,
    name: String,
}

impl StoreDatabase for MongoDatabase {
    fn authenticate(&mut self, credentials: &Credentials) -> Result<(), StoreError> {
        // The driver authenticates per client, so an authenticated session is a new client carrying the credential,
        // with this database as its authentication source.
        let mut options = self.shared.options.clone();
        let mut credential = Credential::default();
        credential.username = Some(credentials.user_name().to_string());
        credential.password = Some(credentials.password().to_string());
        credential.source = Some(self.name.clone());
        options.credential = Some(credential);

        let client = Client::with_options(options).map_err(authentication_error)?;
        client
            .database(&self.name)
            .run_command(doc! { "ping": 1 })
            .run()
            .map_err(authentication_error)?;

        let mut current = self.shared.client.write().unwrap_or_else(PoisonError::into_inner);
        if current.is_none() {
            return Err(StoreError::Closed);
        }
        *current = Some(client);

        Ok(())
    }

    fn collection(&self, name: &str) -> Result<Arc<dyn StoreCollection>, StoreError> {
        let _ = self.shared.client()?;

        Ok(Arc::new(MongoCollection {
            shared: Arc::clone(&self.shared),
            database_name: self.name.clone(),
            collection_name: name.to_string(),
            namespace: format!("{}.{}", self.name, name),
        }))
    }
}

struct MongoCollection {
    shared: Arc<SessionShared>,
    database_name: String,
    collection_name: String,
    namespace: String,
}

impl StoreCollection for MongoCollection {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn insert(&self, document: Document) -> Result<(), StoreError> {
        // The read guard is held for the whole insert so that closing the session waits for in-flight writes.
        let guard = self.shared.client.read().unwrap_or_else(PoisonError::into_inner);
        let client = guard.as_ref().ok_or(StoreError::Closed)?;

        client
            .database(&self.database_name)
            .collection::<Document>(&self.collection_name)
            .insert_one(document)
            .run()
            .map(|_| ())
            .map_err(write_error)
    }
}

fn write_concern(level: WriteAcknowledgement) -> WriteConcern {
    let mut concern = WriteConcern::default();
    match level {
        WriteAcknowledgement::Unacknowledged => concern.w = Some(Acknowledgment::Nodes(0)),
        WriteAcknowledgement::Acknowledged => concern.w = Some(Acknowledgment::Nodes(1)),
        WriteAcknowledgement::W2 => concern.w = Some(Acknowledgment::Nodes(2)),
        WriteAcknowledgement::W3 => concern.w = Some(Acknowledgment::Nodes(3)),
        WriteAcknowledgement::Journaled => {
            concern.w = Some(Acknowledgment::Nodes(1));
            concern.journal = Some(true);
        }
        WriteAcknowledgement::Majority => concern.w = Some(Acknowledgment::Majority),
    }
    concern
}

fn is_authentication_failure(error: &DriverError) -> bool {
    match &*error.kind {
        ErrorKind::Authentication { .. } => true,
        ErrorKind::Command(command) => command.code == AUTHENTICATION_FAILED_CODE,
        _ => false,
    }
}

fn connect_error(endpoint: &Endpoint, error: DriverError) -> StoreError {
    if is_authentication_failure(&error) {
        return StoreError::AuthenticationRejected {
            reason: error.to_string(),
        };
    }

    match &*error.kind {
        ErrorKind::ServerSelection { .. } | ErrorKind::Io(_) | ErrorKind::DnsResolve { .. } => {
            StoreError::Unreachable {
                endpoint: endpoint.clone(),
                reason: error.to_string(),
            }
        }
        _ => StoreError::Driver { source: error },
    }
}

fn authentication_error(error: DriverError) -> StoreError {
    if is_authentication_failure(&error) {
        StoreError::AuthenticationRejected {
            reason: error.to_string(),
        }
    } else {
        StoreError::Driver { source: error }
    }
}

fn write_error(error: DriverError) -> StoreError {
    match &*error.kind {
        ErrorKind::Write(_) => StoreError::WriteRejected {
            reason: error.to_string(),
        },
        _ => StoreError::Driver { source: error },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_concern_levels() {
        let cases = [
            (WriteAcknowledgement::Unacknowledged, Acknowledgment::Nodes(0), None),
            (WriteAcknowledgement::Acknowledged, Acknowledgment::Nodes(1), None),
            (WriteAcknowledgement::W2, Acknowledgment::Nodes(2), None),
            (WriteAcknowledgement::W3, Acknowledgment::Nodes(3), None),
            (WriteAcknowledgement::Journaled, Acknowledgment::Nodes(1), Some(true)),
            (WriteAcknowledgement::Majority, Acknowledgment::Majority, None),
        ];

        for (level, expected_w, expected_journal) in cases {
            let concern = write_concern(level);
            assert_eq!(concern.w, Some(expected_w), "level: {}", level);
            assert_eq!(concern.journal, expected_journal, "level: {}", level);
        }
    }

    #[test]
    fn client_options_target_endpoint() {
        let store = MongoStore::new()
            .with_app_name("test-app")
            .with_server_selection_timeout(Duration::from_millis(250));
        let options = store.client_options(&Endpoint::new("mongo.internal", 27999), None);

        assert_eq!(
            options.hosts,
            vec![ServerAddress::Tcp {
                host: "mongo.internal".to_string(),
                port: Some(27999),
            }]
        );
        assert_eq!(options.app_name.as_deref(), Some("test-app"));
        assert_eq!(options.server_selection_timeout, Some(Duration::from_millis(250)));
        assert!(options.write_concern.is_none());
        assert!(options.credential.is_none());
    }

    #[test]
    fn client_options_carry_write_concern() {
        let options =
            MongoStore::new().client_options(&Endpoint::new("localhost", 27017), Some(WriteAcknowledgement::Majority));
        let concern = options.write_concern.expect("write concern should be set");
        assert_eq!(concern.w, Some(Acknowledgment::Majority));
    }
}
