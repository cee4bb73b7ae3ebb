//! Compiled Avro codec for single-datum payloads.
//!
//! The gateway and the egress socket carry bare Avro datums (Confluent-style
//! framing), not object-container files, so encode/decode go through
//! `to_avro_datum`/`from_avro_datum`.

use apache_avro::types::Value as AvroValue;
use apache_avro::{from_avro_datum, to_avro_datum, Schema};
use serde_json::Value as JsonValue;

use crate::error::SerializationError;

/// A compiled encoder/decoder for one schema.
#[derive(Debug, Clone)]
pub struct Codec {
    schema: Schema,
}

impl Codec {
    /// Compile a schema definition.
    ///
    /// # Errors
    ///
    /// Returns an error if the definition is not a valid Avro schema.
    pub fn compile(definition: &str) -> Result<Self, SerializationError> {
        let schema = Schema::parse_str(definition)?;
        Ok(Self { schema })
    }

    /// Encode one event to a bare Avro datum.
    pub fn encode(&self, event: &JsonValue) -> Result<Vec<u8>, SerializationError> {
        let value = AvroValue::from(event.clone());
        // JSON objects arrive as maps; resolving coerces them to the
        // schema's record/union shapes.
        let value = value.resolve(&self.schema)?;
        let bytes = to_avro_datum(&self.schema, value)?;
        Ok(bytes)
    }

    /// Decode one bare Avro datum into a JSON value.
    pub fn decode(&self, payload: &[u8]) -> Result<JsonValue, SerializationError> {
        let mut reader = payload;
        let value = from_avro_datum(&self.schema, &mut reader, None)?;
        let json = JsonValue::try_from(value)?;
        Ok(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SCHEMA: &str = r#"{
        "type": "record",
        "name": "TestEvent",
        "fields": [
            {"name": "eventType", "type": "string"},
            {"name": "conversion", "type": "int"}
        ]
    }"#;

    #[test]
    fn compile_rejects_invalid_definitions() {
        assert!(Codec::compile("not a schema").is_err());
        assert!(Codec::compile(r#"{"type": "nonsense"}"#).is_err());
    }

    #[test]
    fn encode_then_decode_preserves_fields() {
        let codec = Codec::compile(SCHEMA).unwrap();
        let event = json!({"eventType": "button x clicked", "conversion": 1});

        let bytes = codec.encode(&event).unwrap();
        assert!(!bytes.is_empty());

        let decoded = codec.decode(&bytes).unwrap();
        assert_eq!(decoded["eventType"], "button x clicked");
        assert_eq!(decoded["conversion"], 1);
    }

    #[test]
    fn encode_rejects_mismatched_events() {
        let codec = Codec::compile(SCHEMA).unwrap();
        let event = json!({"eventType": "click"});
        assert!(codec.encode(&event).is_err());
    }

    #[test]
    fn decode_rejects_truncated_payloads() {
        let codec = Codec::compile(SCHEMA).unwrap();
        assert!(codec.decode(&[0x02]).is_err());
    }
}
