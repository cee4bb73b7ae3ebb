//! Client configuration types.

use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

use crate::error::{Error, InvalidInputError};

/// A validated service endpoint URL.
///
/// Ensures the URL is absolute, uses HTTPS (or HTTP for localhost), and is
/// normalized for path construction.
///
/// # Example
///
/// ```
/// use strm_client::EndpointUrl;
///
/// let auth = EndpointUrl::new("https://auth.strmprivacy.io").unwrap();
/// assert_eq!(auth.endpoint("/auth"), "https://auth.strmprivacy.io/auth");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EndpointUrl(Url);

impl EndpointUrl {
    /// Create a new endpoint URL from a string, validating the format.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is not absolute, or uses a scheme other
    /// than HTTPS (HTTP is allowed for localhost).
    pub fn new(s: impl AsRef<str>) -> Result<Self, Error> {
        let s = s.as_ref();
        let url = Url::parse(s).map_err(|e| InvalidInputError::EndpointUrl {
            value: s.to_string(),
            reason: e.to_string(),
        })?;

        Self::validate(&url, s)?;

        Ok(Self(url))
    }

    /// Returns the full URL for a path on this endpoint.
    pub fn endpoint(&self, path: &str) -> String {
        // The URL crate adds a trailing slash to root paths.
        let base = self.0.as_str().trim_end_matches('/');
        format!("{}{}", base, path)
    }

    /// Returns the same endpoint with a websocket scheme (`ws`/`wss`).
    pub fn websocket(&self, path: &str) -> String {
        let base = self.endpoint(path);
        if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base
        }
    }

    /// Returns the base URL as a string.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    fn validate(url: &Url, original: &str) -> Result<(), Error> {
        if url.cannot_be_a_base() {
            return Err(InvalidInputError::EndpointUrl {
                value: original.to_string(),
                reason: "must be an absolute URL".to_string(),
            }
            .into());
        }

        let is_localhost = url
            .host_str()
            .is_some_and(|h| h == "localhost" || h == "127.0.0.1" || h == "::1");

        match url.scheme() {
            "https" => Ok(()),
            "http" if is_localhost => Ok(()),
            scheme => Err(InvalidInputError::EndpointUrl {
                value: original.to_string(),
                reason: format!("scheme '{}' is not allowed", scheme),
            }
            .into()),
        }
    }
}

impl fmt::Display for EndpointUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for EndpointUrl {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<EndpointUrl> for String {
    fn from(value: EndpointUrl) -> Self {
        value.0.into()
    }
}

/// Values needed to authenticate with the identity endpoint.
///
/// # Security
///
/// The secret is never exposed in Debug output to prevent accidental logging.
#[derive(Clone)]
pub struct ClientConfig {
    /// Base URL of the identity endpoint.
    pub auth_url: EndpointUrl,
    /// Billing account identifier.
    pub billing_id: String,
    /// Client identifier issued for one stream.
    pub client_id: String,
    /// Client secret issued alongside the client id.
    pub secret: String,
}

impl ClientConfig {
    pub fn new(
        auth_url: EndpointUrl,
        billing_id: impl Into<String>,
        client_id: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            auth_url,
            billing_id: billing_id.into(),
            client_id: client_id.into(),
            secret: secret.into(),
        }
    }
}

// Intentionally hide the secret in Debug output.
impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("auth_url", &self.auth_url)
            .field("billing_id", &self.billing_id)
            .field("client_id", &self.client_id)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Configuration for a [`Sender`](crate::Sender).
#[derive(Debug, Clone)]
pub struct SenderConfig {
    pub client: ClientConfig,
    /// Base URL of the gateway ingestion endpoint.
    pub gateway_url: EndpointUrl,
}

/// Configuration for a [`Receiver`](crate::Receiver).
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    pub client: ClientConfig,
    /// Base URL of the egress streaming socket.
    pub egress_url: EndpointUrl,
    /// Base URL of the schema registry.
    pub schema_registry_url: EndpointUrl,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_url_builds_paths_without_double_slash() {
        let url = EndpointUrl::new("https://in.strmprivacy.io").unwrap();
        assert_eq!(url.endpoint("/event"), "https://in.strmprivacy.io/event");

        let url = EndpointUrl::new("https://in.strmprivacy.io/").unwrap();
        assert_eq!(url.endpoint("/event"), "https://in.strmprivacy.io/event");
    }

    #[test]
    fn endpoint_url_rejects_relative_and_bad_schemes() {
        assert!(EndpointUrl::new("not a url").is_err());
        assert!(EndpointUrl::new("ftp://example.com").is_err());
        assert!(EndpointUrl::new("http://example.com").is_err());
    }

    #[test]
    fn endpoint_url_allows_http_localhost() {
        assert!(EndpointUrl::new("http://127.0.0.1:8080").is_ok());
        assert!(EndpointUrl::new("http://localhost:8080").is_ok());
    }

    #[test]
    fn websocket_url_swaps_scheme() {
        let url = EndpointUrl::new("https://out.strmprivacy.io").unwrap();
        assert_eq!(url.websocket("/ws"), "wss://out.strmprivacy.io/ws");

        let url = EndpointUrl::new("http://localhost:8080").unwrap();
        assert_eq!(url.websocket("/ws"), "ws://localhost:8080/ws");
    }

    #[test]
    fn client_config_hides_secret_in_debug() {
        let config = ClientConfig::new(
            EndpointUrl::new("https://auth.strmprivacy.io").unwrap(),
            "billing",
            "client",
            "super-secret",
        );
        let debug = format!("{:?}", config);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
