//! Outbound event delivery over a reused, authenticated connection.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use reqwest::header::{HeaderValue, CONTENT_TYPE};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument};

use crate::auth::{AuthSession, SessionEvent};
use crate::config::SenderConfig;
use crate::error::{ApiError, AuthError, Error, SerializationError};
use crate::event::{EventSchema, StrmEvent};
use crate::serialization::{SerializationType, SerializerRegistry};

/// Header carrying the wire serialization of the event body.
const SERIALIZATION_TYPE_HEADER: &str = "Strm-Serialization-Type";
/// Header carrying the schema reference the gateway resolves.
const SCHEMA_REF_HEADER: &str = "Strm-Schema-Ref";

/// The gateway's reply to one delivered event.
///
/// `204` carries no body; `200` resolves as sent with a body.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub status: u16,
    pub body: Option<String>,
}

/// A persistent connection to the gateway.
///
/// Wraps a pooled HTTP client so repeated sends skip per-event connection
/// setup. Never reused once idle-expired; the accessor replaces it lazily.
struct TransportConnection {
    client: reqwest::Client,
    last_used: Instant,
}

impl TransportConnection {
    fn open(idle_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("strm-client/", env!("CARGO_PKG_VERSION")))
            .pool_idle_timeout(idle_timeout)
            .build()
            .expect("failed to build HTTP client");

        Self {
            client,
            last_used: Instant::now(),
        }
    }

    fn is_idle_expired(&self, idle_timeout: Duration) -> bool {
        self.last_used.elapsed() >= idle_timeout
    }
}

/// Delivers events to the gateway, one per call, attaching the current
/// bearer credential.
///
/// Cheap to clone; clones share the session, the serializer cache, and the
/// transport connection.
#[derive(Clone)]
pub struct Sender {
    inner: Arc<SenderInner>,
}

struct SenderInner {
    config: SenderConfig,
    session: AuthSession,
    serializers: SerializerRegistry,
    transport: Mutex<Option<TransportConnection>>,
    idle_timeout: Duration,
}

impl Sender {
    /// How long an unused transport connection is kept before replacement.
    pub const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

    pub fn new(config: SenderConfig) -> Self {
        let session = AuthSession::new(config.client.clone());
        Self::with_session(config, session)
    }

    /// Create a sender over an existing session.
    pub fn with_session(config: SenderConfig, session: AuthSession) -> Self {
        Self {
            inner: Arc::new(SenderInner {
                config,
                session,
                serializers: SerializerRegistry::new(),
                transport: Mutex::new(None),
                idle_timeout: Self::IDLE_TIMEOUT,
            }),
        }
    }

    /// Connect the auth session and open the gateway connection.
    pub async fn connect(&self) -> Result<(), Error> {
        self.inner.session.connect().await?;
        // Prime the connection so the first send skips setup cost.
        let _ = self.transport_client();
        Ok(())
    }

    /// Disconnect the auth session and close the gateway connection.
    pub fn disconnect(&self) {
        self.inner.session.disconnect();
        *self.inner.transport.lock().unwrap() = None;
    }

    /// Subscribe to session lifecycle notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.session.subscribe()
    }

    /// Deliver one event to the gateway.
    ///
    /// The event's metadata block is enriched with the schema reference;
    /// nonce and timestamp are sent as zero for the gateway to fill in.
    ///
    /// # Errors
    ///
    /// A failed send surfaces to the caller; the session itself stays
    /// connected.
    #[instrument(skip(self, event), fields(schema_ref = %schema.schema_ref))]
    pub async fn send(
        &self,
        event: &StrmEvent,
        schema: &EventSchema,
    ) -> Result<GatewayResponse, Error> {
        if !self.inner.session.is_connected() {
            return Err(Error::Auth(AuthError::NotConnected));
        }

        let enriched = event.enriched(&schema.schema_ref);
        let value = serde_json::to_value(&enriched).map_err(SerializationError::from)?;

        let serializer = self.inner.serializers.serializer_for(schema)?;
        let serialization_type = SerializationType::for_kind(schema.kind);
        let body = serializer.serialize(&value, serialization_type)?;

        let url = self.inner.config.gateway_url.endpoint("/event");
        debug!(bytes = body.len(), %url, "sending event");

        let response = self
            .transport_client()
            .post(&url)
            .headers(self.inner.session.auth_headers())
            .header(CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"))
            .header(SERIALIZATION_TYPE_HEADER, serialization_type.header_value())
            .header(SCHEMA_REF_HEADER, &schema.schema_ref)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        match status.as_u16() {
            204 => Ok(GatewayResponse {
                status: 204,
                body: None,
            }),
            200 => {
                let body = response.text().await.ok().filter(|b| !b.is_empty());
                Ok(GatewayResponse { status: 200, body })
            }
            code => {
                let body = response.text().await.ok().filter(|b| !b.is_empty());
                Err(Error::Api(ApiError::new(code, body)))
            }
        }
    }

    /// The current transport connection, opened or replaced lazily.
    ///
    /// Check-and-create happens under the lock with no suspension point, so
    /// concurrent sends cannot open two connections for one idle accessor
    /// evaluation.
    fn transport_client(&self) -> reqwest::Client {
        let mut transport = self.inner.transport.lock().unwrap();
        match transport.as_mut() {
            Some(conn) if !conn.is_idle_expired(self.inner.idle_timeout) => {
                conn.last_used = Instant::now();
                conn.client.clone()
            }
            _ => {
                info!("opening gateway connection");
                let conn = TransportConnection::open(self.inner.idle_timeout);
                let client = conn.client.clone();
                *transport = Some(conn);
                client
            }
        }
    }
}

impl std::fmt::Debug for Sender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sender")
            .field("gateway_url", &self.inner.config.gateway_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_connection_expires_after_idle_timeout() {
        let timeout = Duration::from_secs(60);
        let mut conn = TransportConnection::open(timeout);
        assert!(!conn.is_idle_expired(timeout));

        conn.last_used = Instant::now() - Duration::from_secs(61);
        assert!(conn.is_idle_expired(timeout));
    }

    #[test]
    fn serialization_header_values() {
        assert_eq!(
            SerializationType::AvroBinary.header_value(),
            "application/x-avro-binary"
        );
        assert_eq!(SerializationType::Json.header_value(), "application/json");
    }
}
