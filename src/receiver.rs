//! Inbound event decoding from the egress streaming socket.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures_util::{SinkExt, Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::auth::{AuthSession, SessionEvent};
use crate::config::ReceiverConfig;
use crate::error::{Error, SerializationError, TransportError};
use crate::event::StrmEvent;
use crate::schema::SchemaCache;

/// Offset of the big-endian schema id within a frame.
const FRAME_ID_OFFSET: usize = 1;
/// Offset of the serialized payload within a frame.
const FRAME_PAYLOAD_OFFSET: usize = 5;

/// Split one inbound frame into its schema id and payload.
///
/// Frames are self-describing: byte 0 is the format marker (skipped),
/// bytes 1-4 the big-endian u32 schema id, the rest the serialized payload.
fn parse_frame(frame: &[u8]) -> Result<(u32, &[u8]), SerializationError> {
    if frame.len() < FRAME_PAYLOAD_OFFSET {
        return Err(SerializationError::MalformedFrame(format!(
            "{} bytes, need at least {}",
            frame.len(),
            FRAME_PAYLOAD_OFFSET
        )));
    }
    let id = u32::from_be_bytes(
        frame[FRAME_ID_OFFSET..FRAME_PAYLOAD_OFFSET]
            .try_into()
            .expect("slice is four bytes"),
    );
    Ok((id, &frame[FRAME_PAYLOAD_OFFSET..]))
}

/// Decode one inbound frame into a structured event, resolving its schema
/// through the cache.
pub async fn decode_frame(cache: &SchemaCache, frame: &[u8]) -> Result<StrmEvent, Error> {
    let (id, payload) = parse_frame(frame)?;
    let codec = cache.resolve(id).await?;
    let value = codec.decode(payload)?;
    let event: StrmEvent = serde_json::from_value(value).map_err(SerializationError::from)?;
    Ok(event)
}

/// A stream of decoded inbound events.
///
/// Error items are scoped to a single frame; the stream keeps going. The
/// stream ends only on socket close, a socket-level error, or session
/// disconnect.
pub struct EventStream {
    inner: Pin<Box<dyn Stream<Item = Result<StrmEvent, Error>> + Send>>,
}

impl EventStream {
    fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<StrmEvent, Error>> + Send + 'static,
    {
        Self {
            inner: Box::pin(stream),
        }
    }
}

impl Stream for EventStream {
    type Item = Result<StrmEvent, Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

/// Receives events from the egress streaming socket, decoding each frame
/// with its registry schema.
#[derive(Clone)]
pub struct Receiver {
    inner: Arc<ReceiverInner>,
}

struct ReceiverInner {
    config: ReceiverConfig,
    session: AuthSession,
    cache: SchemaCache,
}

impl Receiver {
    pub fn new(config: ReceiverConfig) -> Self {
        let session = AuthSession::new(config.client.clone());
        Self::with_session(config, session)
    }

    /// Create a receiver over an existing session.
    pub fn with_session(config: ReceiverConfig, session: AuthSession) -> Self {
        let cache = SchemaCache::new(config.schema_registry_url.clone(), session.clone());
        Self {
            inner: Arc::new(ReceiverInner {
                config,
                session,
                cache,
            }),
        }
    }

    /// Connect the auth session and the egress socket, returning the
    /// decoded event stream.
    #[instrument(skip(self), fields(egress = %self.inner.config.egress_url))]
    pub async fn connect(&self) -> Result<EventStream, Error> {
        self.inner.session.connect().await?;

        let ws_url = self.inner.config.egress_url.websocket("/ws");
        info!(url = %ws_url, "connecting to egress socket");

        let mut request =
            ws_url
                .clone()
                .into_client_request()
                .map_err(|e| TransportError::WebSocket {
                    message: e.to_string(),
                })?;
        if let Some(bearer) = self.inner.session.bearer_header() {
            let value = HeaderValue::from_str(&bearer).map_err(|e| TransportError::WebSocket {
                message: e.to_string(),
            })?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (ws_stream, _) =
            connect_async(request)
                .await
                .map_err(|e| TransportError::Connection {
                    message: e.to_string(),
                })?;

        debug!("egress socket connected, listening for frames");

        let cache = self.inner.cache.clone();
        let mut notifications = self.inner.session.subscribe();

        let stream = async_stream::stream! {
            let (mut write, mut read) = ws_stream.split();

            loop {
                tokio::select! {
                    msg = read.next() => match msg {
                        Some(Ok(Message::Binary(data))) => {
                            yield decode_frame(&cache, &data).await;
                        }
                        Some(Ok(Message::Text(text))) => {
                            // Text frames carry the same wire format, base64-encoded.
                            match BASE64.decode(text.as_bytes()) {
                                Ok(data) => yield decode_frame(&cache, &data).await,
                                Err(e) => yield Err(SerializationError::MalformedFrame(
                                    format!("invalid base64 frame: {}", e),
                                ).into()),
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            trace!("received ping");
                            if let Err(e) = write.send(Message::Pong(data)).await {
                                warn!(error = %e, "failed to send pong");
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            info!(?frame, "egress socket closed by server");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            error!(error = %e, "egress socket error");
                            yield Err(TransportError::WebSocket {
                                message: e.to_string(),
                            }.into());
                            break;
                        }
                        None => break,
                    },
                    event = notifications.recv() => match event {
                        Ok(SessionEvent::Disconnected) => {
                            debug!("session disconnected, closing event stream");
                            break;
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Closed) => break,
                        Err(broadcast::error::RecvError::Lagged(_)) => {}
                    },
                }
            }
        };

        Ok(EventStream::new(stream))
    }

    /// Disconnect the auth session; the event stream ends.
    pub fn disconnect(&self) {
        self.inner.session.disconnect();
    }

    /// Subscribe to session lifecycle notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.session.subscribe()
    }

    /// The schema cache backing this receiver's decode pipeline.
    pub fn schema_cache(&self) -> &SchemaCache {
        &self.inner.cache
    }
}

impl std::fmt::Debug for Receiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Receiver")
            .field("egress_url", &self.inner.config.egress_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_frame_extracts_id_and_payload() {
        let frame = [0x00, 0x00, 0x00, 0x00, 0x05, 0xde, 0xad, 0xbe, 0xef];
        let (id, payload) = parse_frame(&frame).unwrap();
        assert_eq!(id, 5);
        assert_eq!(payload, &[0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn parse_frame_allows_empty_payload() {
        let frame = [0x00, 0x00, 0x00, 0x01, 0x00];
        let (id, payload) = parse_frame(&frame).unwrap();
        assert_eq!(id, 256);
        assert!(payload.is_empty());
    }

    #[test]
    fn parse_frame_rejects_short_frames() {
        assert!(parse_frame(&[]).is_err());
        assert!(parse_frame(&[0x00, 0x00, 0x00, 0x05]).is_err());
    }

    #[test]
    fn parse_frame_ignores_the_marker_byte() {
        let frame = [0xff, 0x00, 0x00, 0x00, 0x07, 0x01];
        let (id, _) = parse_frame(&frame).unwrap();
        assert_eq!(id, 7);
    }
}
