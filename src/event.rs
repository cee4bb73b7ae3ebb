//! Event wire model.
//!
//! Events carry a `strmMeta` metadata block next to arbitrary payload
//! fields. The gateway fills in the sequence nonce and timestamp
//! server-side; the client always sends them as zero.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The kind of schema an event declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaKind {
    /// An Avro schema; events are serialized as binary Avro datums.
    Avro,
    /// A JSON schema; events are serialized as JSON.
    Json,
}

/// A schema declaration for outbound events: the reference the gateway
/// resolves, the declared kind, and the schema definition itself.
#[derive(Debug, Clone)]
pub struct EventSchema {
    /// Symbolic schema reference, e.g. `strmprivacy/example/1.3.0`.
    pub schema_ref: String,
    pub kind: SchemaKind,
    /// The schema definition. Required for Avro; ignored for JSON.
    pub definition: Option<Value>,
}

impl EventSchema {
    pub fn avro(schema_ref: impl Into<String>, definition: Value) -> Self {
        Self {
            schema_ref: schema_ref.into(),
            kind: SchemaKind::Avro,
            definition: Some(definition),
        }
    }

    pub fn json(schema_ref: impl Into<String>) -> Self {
        Self {
            schema_ref: schema_ref.into(),
            kind: SchemaKind::Json,
            definition: None,
        }
    }
}

/// Metadata block present on every event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    /// Schema reference, set by the sender before serialization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_ref: Option<String>,
    /// Event contract the event is published under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_contract_ref: Option<String>,
    /// Sequence nonce, filled in by the gateway. Always sent as zero.
    #[serde(default)]
    pub nonce: i64,
    /// Ingestion timestamp, filled in by the gateway. Always sent as zero.
    #[serde(default)]
    pub timestamp: i64,
    /// Consent levels granted for this event.
    #[serde(default)]
    pub consent_levels: Vec<i32>,
}

/// A structured event, as sent to and received from the gateway.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrmEvent {
    #[serde(rename = "strmMeta", default)]
    pub strm_meta: EventMetadata,
    /// Schema-specific payload fields, flattened beside `strmMeta`.
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl StrmEvent {
    /// Create an event with the given consent levels and payload fields.
    pub fn new(consent_levels: Vec<i32>, payload: Map<String, Value>) -> Self {
        Self {
            strm_meta: EventMetadata {
                consent_levels,
                ..EventMetadata::default()
            },
            payload,
        }
    }

    /// Returns a copy enriched for sending: schema reference attached,
    /// nonce and timestamp zeroed for the gateway to fill in.
    pub(crate) fn enriched(&self, schema_ref: &str) -> StrmEvent {
        let mut event = self.clone();
        event.strm_meta.schema_ref = Some(schema_ref.to_string());
        event.strm_meta.nonce = 0;
        event.strm_meta.timestamp = 0;
        event
    }
}
