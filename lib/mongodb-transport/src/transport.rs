use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use arc_swap::{ArcSwap, ArcSwapOption};
use bytes::BytesMut;
use geoevent_config::GenericConfiguration;
use mongodb::bson::Document;
use snafu::ResultExt as _;
use tracing::{debug, error, info, warn};

use crate::{
    config::{MongoOutboundConfiguration, TransportConfigError},
    decoder::Utf8Decoder,
    document::{parse_document, ParseError},
    error::{Configuration, Connection, LifecycleError},
    handle::ConnectionHandle,
    state::{AtomicRunningState, RunningState},
    store::DocumentStore,
    telemetry::{StatisticsSnapshot, TransportStatistics},
};

/// An outbound transport.
///
/// Lifecycle operations (`apply_configuration`, `start`, and `stop`) are serialized against each other. `receive` may
/// be called concurrently from any number of threads, including while a lifecycle operation is running, and never
/// waits on one.
pub trait OutboundTransport: Send + Sync {
    /// Returns the identifier of this transport instance.
    fn component_id(&self) -> &str;

    /// Re-reads the transport configuration from its configuration source.
    ///
    /// If the transport is started, the current connection is released and a new one is acquired from the new
    /// configuration. Otherwise, the configuration is recorded and used by the next [`start`][Self::start].
    ///
    /// # Errors
    ///
    /// If the configuration cannot be read, or a started transport fails to reconnect, the transport moves to
    /// [`RunningState::Error`] and an error is returned.
    fn apply_configuration(&self) -> Result<(), LifecycleError>;

    /// Starts the transport.
    ///
    /// Starting a transport that is already starting or started does nothing.
    ///
    /// # Errors
    ///
    /// If a connection cannot be acquired, the transport moves to [`RunningState::Error`] and an error is returned.
    fn start(&self) -> Result<(), LifecycleError>;

    /// Stops the transport, releasing its connection.
    ///
    /// Stopping always succeeds, and stopping a stopped transport does nothing more than clear its status.
    fn stop(&self);

    /// Handles an inbound event.
    ///
    /// Events are dropped when the transport is not started, or when they fail to decode, parse, or insert. Failures
    /// are logged, never returned. The buffer is cleared when it cannot be decoded, and left untouched otherwise.
    fn receive(&self, buffer: &mut BytesMut, channel_id: &str);

    /// Returns the current lifecycle state.
    fn running_state(&self) -> RunningState;

    /// Returns the message of the last lifecycle failure, or an empty string when healthy.
    fn status_details(&self) -> String;

    /// Returns a snapshot of the ingest statistics.
    fn statistics(&self) -> StatisticsSnapshot;
}

/// MongoDB outbound transport.
///
/// Inserts every inbound JSON event as one document in the configured collection.
pub struct MongoDbOutboundTransport {
    component_id: String,
    config_source: GenericConfiguration,
    store: Arc<dyn DocumentStore>,
    decoder: Utf8Decoder,

    // Lifecycle lock, guarding the applied configuration snapshot.
    applied: Mutex<MongoOutboundConfiguration>,

    // Written only while holding the lifecycle lock.
    state: AtomicRunningState,
    handle: ArcSwapOption<ConnectionHandle>,
    status: ArcSwap<String>,

    statistics: TransportStatistics,
}

impl MongoDbOutboundTransport {
    /// Creates a new `MongoDbOutboundTransport`.
    ///
    /// The configuration is read once from `config_source` and recorded. The transport starts out stopped, and does not
    /// connect to `store` until it is started.
    ///
    /// # Errors
    ///
    /// If the configuration cannot be read, an error is returned.
    pub fn new(
        component_id: impl Into<String>, config_source: GenericConfiguration, store: Arc<dyn DocumentStore>,
    ) -> Result<Self, TransportConfigError> {
        let component_id = component_id.into();
        let applied = MongoOutboundConfiguration::from_configuration(&config_source)?;
        let statistics = TransportStatistics::new(&component_id);

        Ok(Self {
            component_id,
            config_source,
            store,
            decoder: Utf8Decoder::new(),
            applied: Mutex::new(applied),
            state: AtomicRunningState::new(RunningState::Stopped),
            handle: ArcSwapOption::empty(),
            status: ArcSwap::from_pointee(String::new()),
            statistics,
        })
    }

    /// Returns the configuration snapshot currently applied.
    pub fn configuration(&self) -> MongoOutboundConfiguration {
        self.lifecycle().clone()
    }

    fn lifecycle(&self) -> MutexGuard<'_, MongoOutboundConfiguration> {
        self.applied.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // The following must only be called while holding the lifecycle lock.

    fn connect(&self, config: &MongoOutboundConfiguration) -> Result<(), LifecycleError> {
        self.state.store(RunningState::Starting);
        self.cleanup();

        match ConnectionHandle::acquire(self.store.as_ref(), config) {
            Ok(handle) => {
                info!(
                    component_id = %self.component_id,
                    endpoint = %config.endpoint(),
                    collection = handle.namespace(),
                    "Transport started."
                );
                self.handle.store(Some(Arc::new(handle)));
                self.status.store(Arc::new(String::new()));
                self.state.store(RunningState::Started);
                Ok(())
            }
            Err(e) => {
                self.fail(e.to_string());
                Err(e).context(Connection)
            }
        }
    }

    fn fail(&self, message: String) {
        self.cleanup();
        error!(component_id = %self.component_id, error = %message, "Transport failed.");
        self.status.store(Arc::new(message));
        self.state.store(RunningState::Error);
    }

    fn cleanup(&self) {
        if let Some(handle) = self.handle.swap(None) {
            handle.release();
            debug!(component_id = %self.component_id, "Released connection.");
        }
    }

    fn insert(&self, handle: &ConnectionHandle, document: Document, channel_id: &str) {
        match handle.insert(document) {
            Ok(()) => self.statistics.document_inserted(),
            Err(e) => {
                self.statistics.insert_error();
                error!(
                    component_id = %self.component_id,
                    channel_id,
                    collection = handle.namespace(),
                    error = %e,
                    "Failed to insert event."
                );
            }
        }
    }
}

impl OutboundTransport for MongoDbOutboundTransport {
    fn component_id(&self) -> &str {
        &self.component_id
    }

    fn apply_configuration(&self) -> Result<(), LifecycleError> {
        let mut applied = self.lifecycle();

        let config = match MongoOutboundConfiguration::from_configuration(&self.config_source) {
            Ok(config) => config,
            Err(e) => {
                self.fail(e.to_string());
                return Err(e).context(Configuration);
            }
        };

        debug!(component_id = %self.component_id, endpoint = %config.endpoint(), "Applying configuration.");
        *applied = config;

        if self.state.load() == RunningState::Started {
            self.connect(&applied)
        } else {
            Ok(())
        }
    }

    fn start(&self) -> Result<(), LifecycleError> {
        let applied = self.lifecycle();
        if self.state.load().is_running() {
            return Ok(());
        }

        debug!(component_id = %self.component_id, "Starting transport.");
        self.connect(&applied)
    }

    fn stop(&self) {
        let _applied = self.lifecycle();

        self.state.store(RunningState::Stopping);
        self.cleanup();
        self.status.store(Arc::new(String::new()));
        self.state.store(RunningState::Stopped);

        info!(component_id = %self.component_id, "Transport stopped.");
    }

    fn receive(&self, buffer: &mut BytesMut, channel_id: &str) {
        self.statistics.event_received();

        if self.state.load() != RunningState::Started {
            self.statistics.event_dropped_not_started();
            return;
        }

        let Some(handle) = self.handle.load_full() else {
            self.statistics.event_dropped_not_started();
            return;
        };

        let parsed = match self.decoder.decode(buffer) {
            Ok(text) => parse_document(text),
            Err(e) => {
                self.statistics.decode_error();
                debug!(
                    component_id = %self.component_id,
                    channel_id,
                    encoding = e.encoding(),
                    valid_up_to = e.valid_up_to(),
                    error_len = ?e.error_len(),
                    len = buffer.len(),
                    error = %e,
                    "Failed to decode event."
                );
                buffer.clear();
                return;
            }
        };

        match parsed {
            Ok(document) => self.insert(&handle, document, channel_id),
            Err(e) => {
                self.statistics.parse_error();
                let kind = match &e {
                    ParseError::Syntax { .. } => "syntax",
                    ParseError::NotADocument { .. } => "not_a_document",
                    ParseError::ExtendedJson { .. } => "extended_json",
                };
                warn!(component_id = %self.component_id, channel_id, kind, error = %e, "Failed to parse event.");
            }
        }
    }

    fn running_state(&self) -> RunningState {
        self.state.load()
    }

    fn status_details(&self) -> String {
        self.status.load().as_str().to_string()
    }

    fn statistics(&self) -> StatisticsSnapshot {
        self.statistics.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use geoevent_config::ConfigurationLoader;
    use mongodb::bson::doc;
    use proptest::prelude::*;
    use serde_json::{json, Value as JsonValue};

    use super::*;
    use crate::store::MemoryStore;

    struct Harness {
        transport: MongoDbOutboundTransport,
        store: MemoryStore,
        config: GenericConfiguration,
    }

    impl Harness {
        fn new(values: JsonValue) -> Self {
            let config = ConfigurationLoader::default().with_values(values).into_generic().unwrap();
            let store = MemoryStore::new();
            let transport = MongoDbOutboundTransport::new("mongodb_out", config.clone(), Arc::new(store.clone())).unwrap();
            Self {
                transport,
                store,
                config,
            }
        }

        fn default_config() -> Self {
            Self::new(json!({}))
        }

        fn reconfigure(&self, values: JsonValue) -> Result<(), LifecycleError> {
            self.config.set_override(Some(values)).unwrap();
            self.transport.apply_configuration()
        }

        fn send(&self, event: &[u8]) -> BytesMut {
            let mut buffer = BytesMut::from(event);
            self.transport.receive(&mut buffer, "channel-1");
            buffer
        }
    }

    #[test]
    fn start_then_stop() {
        let harness = Harness::default_config();
        harness.transport.start().unwrap();
        assert_eq!(harness.transport.running_state(), RunningState::Started);

        harness.transport.stop();
        assert_eq!(harness.transport.running_state(), RunningState::Stopped);
        assert_eq!(harness.transport.status_details(), "");
        assert_eq!(harness.store.open_sessions(), 0);
    }

    #[test]
    fn start_is_idempotent() {
        let harness = Harness::default_config();
        harness.transport.start().unwrap();
        harness.transport.start().unwrap();

        assert_eq!(harness.store.connects(), 1);
        assert_eq!(harness.store.open_sessions(), 1);
    }

    #[test]
    fn stop_twice() {
        let harness = Harness::default_config();
        harness.transport.stop();
        harness.transport.start().unwrap();
        harness.transport.stop();
        harness.transport.stop();

        assert_eq!(harness.transport.running_state(), RunningState::Stopped);
        assert_eq!(harness.store.releases(), 1);
    }

    #[test]
    fn receive_while_stopped_touches_nothing() {
        let harness = Harness::default_config();
        let buffer = harness.send(br#"{"id":1}"#);

        assert_eq!(&buffer[..], br#"{"id":1}"#);
        assert_eq!(harness.transport.running_state(), RunningState::Stopped);
        assert_eq!(harness.store.connects(), 0);
        assert_eq!(harness.store.document_count(), 0);

        let statistics = harness.transport.statistics();
        assert_eq!(statistics.events_received, 1);
        assert_eq!(statistics.events_dropped_not_started, 1);
    }

    #[test]
    fn default_configuration_scenario() {
        let harness = Harness::default_config();
        harness.transport.start().unwrap();

        harness.send(br#"{"id":1,"val":"a"}"#);
        harness.send(b"not-json");

        assert_eq!(harness.transport.running_state(), RunningState::Started);
        assert_eq!(
            harness.store.documents("db", "GeoEvents"),
            vec![doc! { "id": 1, "val": "a" }]
        );

        let statistics = harness.transport.statistics();
        assert_eq!(statistics.documents_inserted, 1);
        assert_eq!(statistics.parse_errors, 1);
        assert_eq!(statistics.decode_errors, 0);
    }

    #[test]
    fn malformed_bytes_are_dropped_and_cleared() {
        let harness = Harness::default_config();
        harness.transport.start().unwrap();

        let buffer = harness.send(&[b'{', 0xFF, 0xFE, b'}']);

        assert!(buffer.is_empty());
        assert_eq!(harness.transport.running_state(), RunningState::Started);
        assert_eq!(harness.store.document_count(), 0);
        assert_eq!(harness.transport.statistics().decode_errors, 1);
    }

    #[test]
    fn parse_failure_leaves_buffer_untouched() {
        let harness = Harness::default_config();
        harness.transport.start().unwrap();

        let buffer = harness.send(b"[1,2,3]");
        assert_eq!(&buffer[..], b"[1,2,3]");
        assert_eq!(harness.transport.statistics().parse_errors, 1);
    }

    #[test]
    fn insert_failure_keeps_transport_started() {
        let harness = Harness::default_config();
        harness.transport.start().unwrap();
        harness.store.set_reject_writes(true);

        harness.send(br#"{"id":1}"#);
        assert_eq!(harness.transport.running_state(), RunningState::Started);
        assert_eq!(harness.transport.statistics().insert_errors, 1);

        harness.store.set_reject_writes(false);
        harness.send(br#"{"id":2}"#);
        assert_eq!(harness.store.documents("db", "GeoEvents"), vec![doc! { "id": 2 }]);
    }

    #[test]
    fn no_authentication_without_password() {
        let harness = Harness::new(json!({ "mongodb": { "user_name": "writer" } }));
        harness.transport.start().unwrap();

        assert_eq!(harness.transport.running_state(), RunningState::Started);
        assert_eq!(harness.store.authentications(), 0);
    }

    #[test]
    fn authenticates_with_complete_credentials() {
        let harness = Harness::new(json!({ "mongodb": { "user_name": "writer", "password": "hunter2" } }));
        harness.store.add_user("writer", "hunter2");
        harness.transport.start().unwrap();

        assert_eq!(harness.transport.running_state(), RunningState::Started);
        assert_eq!(harness.store.authentications(), 1);
    }

    #[test]
    fn rejected_credentials() {
        let harness = Harness::new(json!({
            "mongodb": { "host": "mongo.internal", "user_name": "writer", "password": "hunter2" }
        }));

        let result = harness.transport.start();
        assert!(matches!(result, Err(LifecycleError::Connection { .. })));
        assert_eq!(harness.transport.running_state(), RunningState::Error);

        let status = harness.transport.status_details();
        assert!(status.contains("mongo.internal"), "status: {}", status);
        assert!(status.contains("writer"), "status: {}", status);
        assert!(!status.contains("hunter2"), "status: {}", status);
        assert_eq!(harness.store.open_sessions(), 0);

        harness.send(br#"{"id":1}"#);
        assert_eq!(harness.store.document_count(), 0);
    }

    #[test]
    fn start_from_error_retries() {
        let harness = Harness::default_config();
        harness.store.set_unreachable(true);
        assert!(harness.transport.start().is_err());
        assert_eq!(harness.transport.running_state(), RunningState::Error);
        assert!(!harness.transport.status_details().is_empty());

        harness.store.set_unreachable(false);
        harness.transport.start().unwrap();
        assert_eq!(harness.transport.running_state(), RunningState::Started);
        assert_eq!(harness.transport.status_details(), "");
    }

    #[test]
    fn stop_clears_error() {
        let harness = Harness::default_config();
        harness.store.set_unreachable(true);
        assert!(harness.transport.start().is_err());

        harness.transport.stop();
        assert_eq!(harness.transport.running_state(), RunningState::Stopped);
        assert_eq!(harness.transport.status_details(), "");
    }

    #[test]
    fn reconfigure_while_started_switches_collection() {
        let harness = Harness::default_config();
        harness.transport.start().unwrap();
        harness.send(br#"{"id":1}"#);

        harness.reconfigure(json!({ "mongodb": { "collection_name": "Tracks" } })).unwrap();
        assert_eq!(harness.transport.running_state(), RunningState::Started);
        harness.send(br#"{"id":2}"#);

        assert_eq!(harness.store.documents("db", "GeoEvents"), vec![doc! { "id": 1 }]);
        assert_eq!(harness.store.documents("db", "Tracks"), vec![doc! { "id": 2 }]);
        assert_eq!(harness.store.connects(), 2);
        assert_eq!(harness.store.open_sessions(), 1);
    }

    #[test]
    fn reconfigure_while_stopped_defers_connection() {
        let harness = Harness::default_config();
        harness.reconfigure(json!({ "mongodb": { "host": "mongo.internal" } })).unwrap();

        assert_eq!(harness.transport.running_state(), RunningState::Stopped);
        assert_eq!(harness.store.connects(), 0);
        assert_eq!(harness.transport.configuration().endpoint().host(), "mongo.internal");

        harness.transport.start().unwrap();
        assert_eq!(harness.store.last_endpoint().unwrap().host(), "mongo.internal");
    }

    #[test]
    fn reconfigure_failure_moves_to_error() {
        let harness = Harness::default_config();
        harness.transport.start().unwrap();
        harness.store.add_user("writer", "correct");

        let result = harness.reconfigure(json!({ "mongodb": { "user_name": "writer", "password": "wrong" } }));
        assert!(matches!(result, Err(LifecycleError::Connection { .. })));
        assert_eq!(harness.transport.running_state(), RunningState::Error);
        assert_eq!(harness.store.open_sessions(), 0);
    }

    #[test]
    fn invalid_configuration_change() {
        let harness = Harness::default_config();
        harness.transport.start().unwrap();

        let result = harness.reconfigure(json!({ "mongodb": { "port": 70000 } }));
        assert!(matches!(result, Err(LifecycleError::Configuration { .. })));
        assert_eq!(harness.transport.running_state(), RunningState::Error);
        assert!(harness.transport.status_details().contains("port"));
        assert_eq!(harness.store.open_sessions(), 0);
        assert_eq!(harness.transport.configuration(), MongoOutboundConfiguration::default());
    }

    #[test]
    fn invalid_initial_configuration() {
        let config = ConfigurationLoader::default()
            .with_values(json!({ "mongodb": { "write_acknowledgement": "eventually" } }))
            .into_generic()
            .unwrap();

        let result = MongoDbOutboundTransport::new("mongodb_out", config, Arc::new(MemoryStore::new()));
        assert!(matches!(
            result,
            Err(TransportConfigError::UnknownWriteAcknowledgement { .. })
        ));
    }

    #[test]
    fn concurrent_receive_during_reconfiguration() {
        let harness = Harness::default_config();
        harness.transport.start().unwrap();

        let harness = &harness;
        let done = &AtomicBool::new(false);
        let sent = std::thread::scope(|scope| {
            let workers = (0..4)
                .map(|worker| {
                    scope.spawn(move || {
                        let mut sent = 0u64;
                        while !done.load(Ordering::Acquire) {
                            let event = format!(r#"{{"worker":{},"seq":{}}}"#, worker, sent);
                            harness.send(event.as_bytes());
                            sent += 1;
                        }
                        sent
                    })
                })
                .collect::<Vec<_>>();

            for i in 0..20 {
                let collection = if i % 2 == 0 { "Tracks" } else { "GeoEvents" };
                harness
                    .reconfigure(json!({ "mongodb": { "collection_name": collection } }))
                    .unwrap();
            }
            done.store(true, Ordering::Release);

            workers.into_iter().map(|worker| worker.join().unwrap()).sum::<u64>()
        });

        let statistics = harness.transport.statistics();
        assert_eq!(harness.transport.running_state(), RunningState::Started);
        assert_eq!(harness.store.open_sessions(), 1);
        assert_eq!(statistics.events_received, sent);
        assert_eq!(statistics.documents_inserted, harness.store.document_count() as u64);
        assert_eq!(
            statistics.documents_inserted + statistics.insert_errors + statistics.events_dropped_not_started,
            sent
        );
        assert_eq!(statistics.parse_errors + statistics.decode_errors, 0);
    }

    fn arb_json_object() -> impl Strategy<Value = serde_json::Map<String, JsonValue>> {
        let leaf = prop_oneof![
            Just(JsonValue::Null),
            any::<bool>().prop_map(JsonValue::Bool),
            any::<i32>().prop_map(JsonValue::from),
            "[a-z0-9 ]{0,12}".prop_map(JsonValue::String),
        ];
        let value = leaf.prop_recursive(3, 16, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(JsonValue::Array),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                    .prop_map(|entries| JsonValue::Object(entries.into_iter().collect())),
            ]
        });
        prop::collection::btree_map("[a-z]{1,6}", value, 0..6).prop_map(|entries| entries.into_iter().collect())
    }

    proptest! {
        #[test]
        fn property_invalid_utf8_never_inserts(mut bytes in prop::collection::vec(any::<u8>(), 0..64), at in any::<prop::sample::Index>()) {
            // Splice in a byte that can never appear in UTF-8.
            let position = at.index(bytes.len() + 1);
            bytes.insert(position, 0xFF);

            let harness = Harness::default_config();
            harness.transport.start().unwrap();
            let buffer = harness.send(&bytes);

            prop_assert!(buffer.is_empty());
            prop_assert_eq!(harness.store.document_count(), 0);
            prop_assert_eq!(harness.transport.running_state(), RunningState::Started);
        }

        #[test]
        fn property_objects_insert_exactly_once(object in arb_json_object()) {
            let harness = Harness::default_config();
            harness.transport.start().unwrap();

            let text = serde_json::to_string(&object).unwrap();
            harness.send(text.as_bytes());

            let expected = Document::try_from(object).unwrap();
            prop_assert_eq!(harness.store.documents("db", "GeoEvents"), vec![expected]);
        }
    }
}
