//! In-process document store.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use mongodb::bson::Document;

use super::{DocumentStore, StoreCollection, StoreDatabase, StoreError, StoreSession};
use crate::config::{Credentials, Endpoint, WriteAcknowledgement};

#[derive(Default)]
struct MemoryState {
    unreachable: bool,
    reject_writes: bool,
    users: HashMap<String, String>,
    documents: HashMap<String, Vec<Document>>,
    connects: usize,
    authentications: usize,
    releases: usize,
    open_sessions: usize,
    last_endpoint: Option<Endpoint>,
    last_write_acknowledgement: Option<WriteAcknowledgement>,
}

/// An in-process document store.
///
/// Documents are kept in memory, grouped by namespace. Every connect, authentication, and release is counted, and
/// failures can be injected, which makes it suitable for dry runs and for exercising a transport without a server.
///
/// Cloning is cheap, and all clones share the same underlying store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    /// Creates a new, empty `MemoryStore`.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a user that authentication will accept.
    pub fn add_user(&self, user_name: impl Into<String>, password: impl Into<String>) {
        self.state().users.insert(user_name.into(), password.into());
    }

    /// Sets whether connection attempts should fail as if the store were unreachable.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state().unreachable = unreachable;
    }

    /// Sets whether inserts should be rejected.
    pub fn set_reject_writes(&self, reject: bool) {
        self.state().reject_writes = reject;
    }

    /// Returns the documents inserted into `collection` of `database`, in insertion order.
    pub fn documents(&self, database: &str, collection: &str) -> Vec<Document> {
        self.state()
            .documents
            .get(&namespace(database, collection))
            .cloned()
            .unwrap_or_default()
    }

    /// Returns the total number of documents inserted, across all namespaces.
    pub fn document_count(&self) -> usize {
        self.state().documents.values().map(Vec::len).sum()
    }

    /// Returns the number of sessions that have been opened.
    pub fn connects(&self) -> usize {
        self.state().connects
    }

    /// Returns the number of authentication attempts, successful or not.
    pub fn authentications(&self) -> usize {
        self.state().authentications
    }

    /// Returns the number of sessions that have been closed.
    pub fn releases(&self) -> usize {
        self.state().releases
    }

    /// Returns the number of sessions currently open.
    pub fn open_sessions(&self) -> usize {
        self.state().open_sessions
    }

    /// Returns the endpoint of the most recent connection attempt.
    pub fn last_endpoint(&self) -> Option<Endpoint> {
        self.state().last_endpoint.clone()
    }

    /// Returns the write acknowledgement level of the most recently opened session.
    pub fn last_write_acknowledgement(&self) -> Option<WriteAcknowledgement> {
        self.state().last_write_acknowledgement
    }
}

impl DocumentStore for MemoryStore {
    fn connect(
        &self, endpoint: &Endpoint, write_acknowledgement: Option<WriteAcknowledgement>,
    ) -> Result<Box<dyn StoreSession>, StoreError> {
        let mut state = self.state();
        state.last_endpoint = Some(endpoint.clone());
        if state.unreachable {
            return Err(StoreError::Unreachable {
                endpoint: endpoint.clone(),
                reason: "connection refused".to_string(),
            });
        }

        state.connects += 1;
        state.open_sessions += 1;
        state.last_write_acknowledgement = write_acknowledgement;

        Ok(Box::new(MemorySession {
            store: self.clone(),
            open: Arc::new(AtomicBool::new(true)),
        }))
    }
}

struct MemorySession {
    store: MemoryStore,
    open: Arc<AtomicBool>,
}

impl StoreSession for MemorySession {
    fn database(&self, name: &str) -> Result<Box<dyn StoreDatabase>, StoreError> {
        if !self.open.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }

        Ok(Box::new(MemoryDatabase {
            store: self.store.clone(),
            open: Arc::clone(&self.open),
            name: name.to_string(),
        }))
    }

    fn close(&self) {
        let mut state = self.store.state();
        if self.open.swap(false, Ordering::AcqRel) {
            state.releases += 1;
            state.open_sessions -= 1;
        }
    }
}

struct MemoryDatabase {
    store: MemoryStore,
    open: Arc<AtomicBool>,
    name: String,
}

impl StoreDatabase for MemoryDatabase {
    fn authenticate(&mut self, credentials: &Credentials) -> Result<(), StoreError> {
        let mut state = self.store.state();
        state.authentications += 1;

        match state.users.get(credentials.user_name()) {
            Some(password) if password == credentials.password() => Ok(()),
            _ => Err(StoreError::AuthenticationRejected {
                reason: "Authentication failed.".to_string(),
            }),
        }
    }

    fn collection(&self, name: &str) -> Result<Arc<dyn StoreCollection>, StoreError> {
        if !self.open.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }

        Ok(Arc::new(MemoryCollection {
            store: self.store.clone(),
            open: Arc::clone(&self.open),
            namespace: namespace(&self.name, name),
        }))
    }
}

struct MemoryCollection {
    store: MemoryStore,
    open: Arc<AtomicBool>,
    namespace: String,
}

impl StoreCollection for MemoryCollection {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn insert(&self, document: Document) -> Result<(), StoreError> {
        let mut state = self.store.state();
        if !self.open.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }

        if state.reject_writes {
            return Err(StoreError::WriteRejected {
                reason: "write rejected by store".to_string(),
            });
        }

        state.documents.entry(self.namespace.clone()).or_default().push(document);
        Ok(())
    }
}

fn namespace(database: &str, collection: &str) -> String {
    format!("{}.{}", database, collection)
}
