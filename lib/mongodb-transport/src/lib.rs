//! MongoDB outbound transport.
//!
//! Takes a stream of JSON events, one buffer at a time, and inserts each as a document into a MongoDB collection.
//! Events are decoded as UTF-8, parsed as JSON (with MongoDB Extended JSON conversions), and inserted with the
//! configured write acknowledgement level. A failure on any one event is logged and the event dropped: it never
//! affects the transport's lifecycle state, or any other event.
//!
//! The transport's lifecycle (start, stop, and reconfiguration) is driven by its host, and is independent of the ingest
//! path: events can be handed to [`OutboundTransport::receive`] from any number of threads at any time.
#![deny(warnings)]
#![deny(missing_docs)]

mod config;
pub use self::config::{
    Credentials, Endpoint, MongoOutboundConfiguration, TransportConfigError, WriteAcknowledgement, COLLECTION_NAME_KEY,
    DATABASE_NAME_KEY, HOST_KEY, PASSWORD_KEY, PORT_KEY, USER_NAME_KEY, WRITE_ACKNOWLEDGEMENT_KEY,
};

mod decoder;
pub use self::decoder::{DecodeError, Utf8Decoder};

mod document;
pub use self::document::{parse_document, ParseError};

mod error;
pub use self::error::{ConnectionError, LifecycleError};

mod handle;
pub use self::handle::ConnectionHandle;

pub mod service;

mod state;
pub use self::state::RunningState;

pub mod store;

mod telemetry;
pub use self::telemetry::{StatisticsSnapshot, TransportStatistics};

mod transport;
pub use self::transport::{MongoDbOutboundTransport, OutboundTransport};
