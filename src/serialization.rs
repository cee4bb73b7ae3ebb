//! Event serialization strategies and their per-reference registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::debug;

use crate::error::SerializationError;
use crate::event::{EventSchema, SchemaKind};
use crate::schema::Codec;

/// How an event is serialized on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerializationType {
    AvroBinary,
    AvroJson,
    Json,
}

impl SerializationType {
    /// Value of the `Strm-Serialization-Type` request header.
    pub fn header_value(&self) -> &'static str {
        match self {
            SerializationType::AvroBinary => "application/x-avro-binary",
            SerializationType::AvroJson => "application/x-avro-json",
            SerializationType::Json => "application/json",
        }
    }

    /// The serialization used for events of a given schema kind.
    pub(crate) fn for_kind(kind: SchemaKind) -> Self {
        match kind {
            SchemaKind::Avro => SerializationType::AvroBinary,
            SchemaKind::Json => SerializationType::Json,
        }
    }
}

impl fmt::Display for SerializationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.header_value())
    }
}

/// A serialization strategy bound to one schema.
pub trait EventSerializer: Send + Sync {
    /// Serialize one event to its wire bytes.
    fn serialize(
        &self,
        event: &Value,
        serialization_type: SerializationType,
    ) -> Result<Vec<u8>, SerializationError>;
}

struct AvroEventSerializer {
    codec: Codec,
}

impl EventSerializer for AvroEventSerializer {
    fn serialize(
        &self,
        event: &Value,
        serialization_type: SerializationType,
    ) -> Result<Vec<u8>, SerializationError> {
        match serialization_type {
            SerializationType::AvroBinary => self.codec.encode(event),
            SerializationType::AvroJson => {
                Err(SerializationError::Unsupported("AVRO_JSON".to_string()))
            }
            other => Err(SerializationError::InvalidType {
                kind: "AVRO",
                serialization_type: other.to_string(),
            }),
        }
    }
}

struct JsonEventSerializer;

impl EventSerializer for JsonEventSerializer {
    fn serialize(
        &self,
        event: &Value,
        serialization_type: SerializationType,
    ) -> Result<Vec<u8>, SerializationError> {
        if serialization_type != SerializationType::Json {
            return Err(SerializationError::InvalidType {
                kind: "JSON",
                serialization_type: serialization_type.to_string(),
            });
        }
        let bytes = serde_json::to_vec(event)?;
        Ok(bytes)
    }
}

/// Per-reference cache of serialization strategies.
///
/// A strategy is built lazily on the first event for a reference (compiling
/// the Avro schema where needed) and reused for the lifetime of the process.
#[derive(Default)]
pub struct SerializerRegistry {
    entries: Mutex<HashMap<String, Arc<dyn EventSerializer>>>,
}

impl SerializerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The strategy for a schema, creating and caching it on first use.
    pub fn serializer_for(
        &self,
        schema: &EventSchema,
    ) -> Result<Arc<dyn EventSerializer>, SerializationError> {
        let mut entries = self.entries.lock().unwrap();
        if let Some(serializer) = entries.get(&schema.schema_ref) {
            return Ok(serializer.clone());
        }

        let serializer = Self::create(schema)?;
        entries.insert(schema.schema_ref.clone(), serializer.clone());
        debug!(schema_ref = %schema.schema_ref, kind = ?schema.kind, "serializer created");
        Ok(serializer)
    }

    fn create(schema: &EventSchema) -> Result<Arc<dyn EventSerializer>, SerializationError> {
        match schema.kind {
            SchemaKind::Avro => {
                let definition = schema.definition.as_ref().ok_or_else(|| {
                    SerializationError::MissingDefinition {
                        schema_ref: schema.schema_ref.clone(),
                    }
                })?;
                let codec = Codec::compile(&definition.to_string())?;
                Ok(Arc::new(AvroEventSerializer { codec }))
            }
            SchemaKind::Json => Ok(Arc::new(JsonEventSerializer)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn avro_schema() -> EventSchema {
        EventSchema::avro(
            "strmprivacy/example/1.3.0",
            json!({
                "type": "record",
                "name": "TestEvent",
                "fields": [{"name": "eventType", "type": "string"}]
            }),
        )
    }

    #[test]
    fn avro_serializer_encodes_binary() {
        let registry = SerializerRegistry::new();
        let serializer = registry.serializer_for(&avro_schema()).unwrap();

        let bytes = serializer
            .serialize(&json!({"eventType": "click"}), SerializationType::AvroBinary)
            .unwrap();
        assert!(!bytes.is_empty());
    }

    #[test]
    fn avro_json_is_unsupported() {
        let registry = SerializerRegistry::new();
        let serializer = registry.serializer_for(&avro_schema()).unwrap();

        let err = serializer
            .serialize(&json!({"eventType": "click"}), SerializationType::AvroJson)
            .unwrap_err();
        assert!(matches!(err, SerializationError::Unsupported(_)));
    }

    #[test]
    fn json_serializer_rejects_avro_types() {
        let registry = SerializerRegistry::new();
        let schema = EventSchema::json("strmprivacy/json-example/1.0.0");
        let serializer = registry.serializer_for(&schema).unwrap();

        assert!(serializer
            .serialize(&json!({"a": 1}), SerializationType::Json)
            .is_ok());
        assert!(serializer
            .serialize(&json!({"a": 1}), SerializationType::AvroBinary)
            .is_err());
    }

    #[test]
    fn serializers_are_cached_per_reference() {
        let registry = SerializerRegistry::new();
        let first = registry.serializer_for(&avro_schema()).unwrap();
        let second = registry.serializer_for(&avro_schema()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn avro_without_definition_is_an_error() {
        let registry = SerializerRegistry::new();
        let schema = EventSchema {
            schema_ref: "strmprivacy/example/1.3.0".to_string(),
            kind: SchemaKind::Avro,
            definition: None,
        };
        let err = registry.serializer_for(&schema).err().unwrap();
        assert!(matches!(err, SerializationError::MissingDefinition { .. }));
    }
}
