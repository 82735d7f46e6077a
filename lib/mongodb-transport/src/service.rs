//! Transport service and definition.

use std::sync::Arc;

use geoevent_config::GenericConfiguration;
use serde::Serialize;

use crate::{
    config::{
        TransportConfigError, COLLECTION_NAME_KEY, DATABASE_NAME_KEY, DEFAULT_COLLECTION_NAME, DEFAULT_DATABASE_NAME,
        DEFAULT_HOST, DEFAULT_PORT, HOST_KEY, PASSWORD_KEY, PORT_KEY, USER_NAME_KEY, WRITE_ACKNOWLEDGEMENT_KEY,
    },
    store::DocumentStore,
    transport::{MongoDbOutboundTransport, OutboundTransport},
};

const WRITE_ACKNOWLEDGEMENT_CHOICES: &[&str] =
    &["unacknowledged", "acknowledged", "w2", "w3", "journaled", "majority"];

/// Kind of value a property holds.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "choices")]
pub enum PropertyKind {
    /// Free-form text.
    String,

    /// An integer.
    Integer,

    /// A secret. Never displayed.
    Password,

    /// One of a fixed set of values.
    Choice(&'static [&'static str]),
}

/// A configurable property of a transport.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct PropertyDefinition {
    /// Configuration key.
    pub key: &'static str,

    /// Human-readable name.
    pub label: &'static str,

    /// What the property controls.
    pub description: &'static str,

    /// Kind of value.
    pub kind: PropertyKind,

    /// Default value, if any.
    pub default: Option<String>,
}

/// Direction events flow through a transport.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportDirection {
    /// Events flow from the platform out to an external system.
    Outbound,
}

/// Static description of a transport and its properties.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct TransportDefinition {
    /// Unique name.
    pub name: &'static str,

    /// Human-readable name.
    pub label: &'static str,

    /// What the transport does.
    pub description: &'static str,

    /// Direction of the transport.
    pub direction: TransportDirection,

    /// Configurable properties.
    pub properties: Vec<PropertyDefinition>,
}

impl TransportDefinition {
    /// Returns the definition of the property with the given key, if any.
    pub fn property(&self, key: &str) -> Option<&PropertyDefinition> {
        self.properties.iter().find(|property| property.key == key)
    }
}

/// Factory for MongoDB outbound transports.
pub struct MongoDbOutboundTransportService {
    definition: TransportDefinition,
}

impl MongoDbOutboundTransportService {
    /// Creates a new `MongoDbOutboundTransportService`.
    pub fn new() -> Self {
        Self {
            definition: mongodb_outbound_definition(),
        }
    }

    /// Returns the transport definition.
    pub fn definition(&self) -> &TransportDefinition {
        &self.definition
    }

    /// Creates a new transport, reading its configuration from `config` and writing to `store`.
    ///
    /// # Errors
    ///
    /// If the configuration cannot be read, an error is returned.
    pub fn create_transport(
        &self, component_id: impl Into<String>, config: GenericConfiguration, store: Arc<dyn DocumentStore>,
    ) -> Result<Box<dyn OutboundTransport>, TransportConfigError> {
        let transport = MongoDbOutboundTransport::new(component_id, config, store)?;
        Ok(Box::new(transport))
    }
}

impl Default for MongoDbOutboundTransportService {
    fn default() -> Self {
        Self::new()
    }
}

fn mongodb_outbound_definition() -> TransportDefinition {
    TransportDefinition {
        name: "MongoDB",
        label: "MongoDB Outbound Transport",
        description: "Inserts each JSON event as a document into a MongoDB collection.",
        direction: TransportDirection::Outbound,
        properties: vec![
            PropertyDefinition {
                key: HOST_KEY,
                label: "Host",
                description: "MongoDB server address.",
                kind: PropertyKind::String,
                default: Some(DEFAULT_HOST.to_string()),
            },
            PropertyDefinition {
                key: PORT_KEY,
                label: "Port",
                description: "MongoDB server port.",
                kind: PropertyKind::Integer,
                default: Some(DEFAULT_PORT.to_string()),
            },
            PropertyDefinition {
                key: DATABASE_NAME_KEY,
                label: "Database Name",
                description: "Database to insert documents into.",
                kind: PropertyKind::String,
                default: Some(DEFAULT_DATABASE_NAME.to_string()),
            },
            PropertyDefinition {
                key: USER_NAME_KEY,
                label: "User Name",
                description: "User to authenticate as. Authentication is skipped unless both user name and password are set.",
                kind: PropertyKind::String,
                default: None,
            },
            PropertyDefinition {
                key: PASSWORD_KEY,
                label: "Password",
                description: "Password to authenticate with.",
                kind: PropertyKind::Password,
                default: None,
            },
            PropertyDefinition {
                key: COLLECTION_NAME_KEY,
                label: "Collection Name",
                description: "Collection to insert documents into.",
                kind: PropertyKind::String,
                default: Some(DEFAULT_COLLECTION_NAME.to_string()),
            },
            PropertyDefinition {
                key: WRITE_ACKNOWLEDGEMENT_KEY,
                label: "Write Acknowledgement",
                description: "Durability guarantee requested for each insert. Unset uses the client default.",
                kind: PropertyKind::Choice(WRITE_ACKNOWLEDGEMENT_CHOICES),
                default: None,
            },
        ],
    }
}

#[cfg(test)]
mod tests {
    use geoevent_config::ConfigurationLoader;
    use serde_json::json;

    use super::*;
    use crate::{config::WriteAcknowledgement, state::RunningState, store::MemoryStore};

    #[test]
    fn definition_lists_every_property() {
        let service = MongoDbOutboundTransportService::new();
        let definition = service.definition();

        let keys = definition.properties.iter().map(|property| property.key).collect::<Vec<_>>();
        assert_eq!(
            keys,
            vec![
                HOST_KEY,
                PORT_KEY,
                DATABASE_NAME_KEY,
                USER_NAME_KEY,
                PASSWORD_KEY,
                COLLECTION_NAME_KEY,
                WRITE_ACKNOWLEDGEMENT_KEY
            ]
        );
        assert_eq!(definition.property(PORT_KEY).unwrap().default.as_deref(), Some("27017"));
        assert_eq!(definition.property(PASSWORD_KEY).unwrap().kind, PropertyKind::Password);
    }

    #[test]
    fn write_acknowledgement_choices_parse() {
        for choice in WRITE_ACKNOWLEDGEMENT_CHOICES {
            let level = choice.parse::<WriteAcknowledgement>().unwrap();
            assert_eq!(level.as_str(), *choice);
        }
    }

    #[test]
    fn created_transport_starts_stopped() {
        let config = ConfigurationLoader::default()
            .with_values(json!({ "mongodb": { "collection_name": "Tracks" } }))
            .into_generic()
            .unwrap();
        let store = MemoryStore::new();

        let transport = MongoDbOutboundTransportService::new()
            .create_transport("mongodb_out", config, Arc::new(store.clone()))
            .unwrap();
        assert_eq!(transport.component_id(), "mongodb_out");
        assert_eq!(transport.running_state(), RunningState::Stopped);

        transport.start().unwrap();
        let mut buffer = bytes::BytesMut::from(&br#"{"id":1}"#[..]);
        transport.receive(&mut buffer, "channel-1");
        assert_eq!(store.documents("db", "Tracks").len(), 1);
    }

    #[test]
    fn definition_serializes() {
        let rendered = serde_json::to_value(MongoDbOutboundTransportService::new().definition()).unwrap();
        assert_eq!(rendered["name"], "MongoDB");
        assert_eq!(rendered["direction"], "outbound");
        assert_eq!(rendered["properties"][6]["kind"]["type"], "choice");
    }
}
