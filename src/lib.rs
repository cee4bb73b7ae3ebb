//! strm-client - Client SDK for the STRM event gateway.
//!
//! This library maintains an authenticated session against the identity
//! endpoint, keeps it alive via scheduled token refresh, and moves
//! structured events to and from the gateway with schema-aware
//! serialization.
//!
//! # Example
//!
//! ```no_run
//! use strm_client::{ClientConfig, EndpointUrl, EventSchema, Sender, SenderConfig, StrmEvent};
//!
//! # async fn example() -> Result<(), strm_client::Error> {
//! let config = SenderConfig {
//!     client: ClientConfig::new(
//!         EndpointUrl::new("https://auth.strmprivacy.io")?,
//!         "billing-id",
//!         "client-id",
//!         "client-secret",
//!     ),
//!     gateway_url: EndpointUrl::new("https://in.strmprivacy.io")?,
//! };
//!
//! let sender = Sender::new(config);
//! sender.connect().await?;
//!
//! let schema = EventSchema::json("strmprivacy/example/1.3.0");
//! let event = StrmEvent::new(vec![0, 1], serde_json::Map::new());
//! let response = sender.send(&event, &schema).await?;
//! println!("sent: {}", response.status);
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod event;
pub mod receiver;
pub mod schema;
pub mod sender;
pub mod serialization;

// Re-export primary types at crate root for convenience
pub use auth::{AuthSession, Credential, HttpIdentityProvider, IdentityProvider, SessionEvent};
pub use config::{ClientConfig, EndpointUrl, ReceiverConfig, SenderConfig};
pub use error::Error;
pub use event::{EventMetadata, EventSchema, SchemaKind, StrmEvent};
pub use receiver::{decode_frame, EventStream, Receiver};
pub use schema::{Codec, SchemaCache};
pub use sender::{GatewayResponse, Sender};
pub use serialization::{EventSerializer, SerializationType, SerializerRegistry};

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;
