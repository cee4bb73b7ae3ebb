//! Error types for the strm-client library.
//!
//! This module provides a unified error type with explicit variants for
//! transport, authentication, API, schema, and serialization errors.

use std::fmt;
use thiserror::Error;

/// The unified error type for strm-client operations.
///
/// This error type covers all possible failure modes in the library,
/// with explicit variants to allow callers to handle specific cases.
#[derive(Debug, Error)]
pub enum Error {
    /// Network transport errors (DNS, TLS, connection, timeout).
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Authentication errors (expired token, missing session).
    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Non-2xx responses from the identity endpoint or the gateway.
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// Schema registry fetch or schema compilation errors.
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Event serialization or frame decode errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] SerializationError),

    /// Input validation errors (invalid endpoint URL).
    #[error("invalid input: {0}")]
    InvalidInput(#[from] InvalidInputError),
}

/// Transport-level errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Network connection failed.
    #[error("connection failed: {message}")]
    Connection { message: String },

    /// Request timed out.
    #[error("request timed out")]
    Timeout,

    /// WebSocket-level failure on the egress socket.
    #[error("websocket error: {message}")]
    WebSocket { message: String },

    /// Generic HTTP error.
    #[error("HTTP error: {message}")]
    Http { message: String },
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_connect() {
            TransportError::Connection {
                message: err.to_string(),
            }
        } else {
            TransportError::Http {
                message: err.to_string(),
            }
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Transport(TransportError::from(err))
    }
}

/// Authentication-related errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// A freshly issued credential is already within the safety margin of
    /// its expiry. Surfaced synchronously from `connect()`, never retried.
    #[error("token expired")]
    TokenExpired,

    /// An operation that requires a live session was attempted without one.
    #[error("not connected")]
    NotConnected,
}

/// A non-2xx response from the identity endpoint or the gateway.
#[derive(Debug)]
pub struct ApiError {
    /// HTTP status code.
    pub status: u16,
    /// Response body, if any was readable.
    pub body: Option<String>,
}

impl ApiError {
    pub fn new(status: u16, body: Option<String>) -> Self {
        Self { status, body }
    }

    /// Whether this response is a fatal refresh classification.
    ///
    /// Retrying with a rejected (401) or malformed (400) grant cannot
    /// succeed, so these statuses terminate the refresh loop immediately.
    pub fn is_fatal(&self) -> bool {
        self.status == 401 || self.status == 400
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP {}", self.status)?;
        if let Some(ref body) = self.body {
            write!(f, ": {}", body)?;
        }
        Ok(())
    }
}

impl std::error::Error for ApiError {}

/// Schema registry or schema compilation errors.
///
/// Clone-able because it travels through the shared in-flight future of the
/// schema cache, where every coalesced waiter receives the same failure.
#[derive(Debug, Clone, Error)]
#[error("schema {id}: {message}")]
pub struct SchemaError {
    /// The registry id the failure is scoped to.
    pub id: u32,
    pub message: String,
}

impl SchemaError {
    pub fn fetch(id: u32, message: impl Into<String>) -> Self {
        Self {
            id,
            message: format!("fetch failed: {}", message.into()),
        }
    }

    pub fn compile(id: u32, message: impl Into<String>) -> Self {
        Self {
            id,
            message: format!("compile failed: {}", message.into()),
        }
    }
}

/// Event serialization and frame decode errors.
#[derive(Debug, Error)]
pub enum SerializationError {
    /// The serialization type is not valid for the schema kind.
    #[error("invalid serialization type {serialization_type} for {kind} schema")]
    InvalidType {
        kind: &'static str,
        serialization_type: String,
    },

    /// The serialization type is recognized but not implemented.
    #[error("{0} is not yet supported")]
    Unsupported(String),

    /// An Avro schema reference was declared without a schema definition.
    #[error("no schema definition for '{schema_ref}'")]
    MissingDefinition { schema_ref: String },

    /// Avro encode/decode failure.
    #[error("avro: {0}")]
    Avro(String),

    /// JSON encode/decode failure.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// An inbound frame is too short or otherwise malformed.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
}

impl From<apache_avro::Error> for SerializationError {
    fn from(err: apache_avro::Error) -> Self {
        SerializationError::Avro(err.to_string())
    }
}

/// Input validation errors.
#[derive(Debug, Error)]
pub enum InvalidInputError {
    /// Invalid endpoint URL format.
    #[error("invalid endpoint URL '{value}': {reason}")]
    EndpointUrl { value: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification_covers_unauthorized_and_bad_request() {
        assert!(ApiError::new(401, None).is_fatal());
        assert!(ApiError::new(400, None).is_fatal());
        assert!(!ApiError::new(500, None).is_fatal());
        assert!(!ApiError::new(503, None).is_fatal());
    }

    #[test]
    fn api_error_display_includes_body() {
        let err = ApiError::new(400, Some("bad grant".to_string()));
        assert_eq!(err.to_string(), "HTTP 400: bad grant");
    }
}
