//! Schema registry HTTP client.

use serde::Deserialize;
use tracing::{debug, instrument};

use crate::auth::AuthSession;
use crate::config::EndpointUrl;
use crate::error::SchemaError;

/// Response from `GET /schemas/ids/{id}`.
#[derive(Debug, Deserialize)]
struct SchemaResponse {
    schema: String,
}

/// Client for the schema registry, authenticated with the session bearer
/// credential.
#[derive(Debug, Clone)]
pub(crate) struct RegistryClient {
    registry_url: EndpointUrl,
    session: AuthSession,
    client: reqwest::Client,
}

impl RegistryClient {
    pub(crate) fn new(registry_url: EndpointUrl, session: AuthSession) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("strm-client/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("failed to build HTTP client");

        Self {
            registry_url,
            session,
            client,
        }
    }

    /// Fetch the schema definition published under a registry id.
    #[instrument(skip(self), fields(registry = %self.registry_url))]
    pub(crate) async fn fetch(&self, id: u32) -> Result<String, SchemaError> {
        let url = self.registry_url.endpoint(&format!("/schemas/ids/{}", id));
        debug!("fetching schema");

        let response = self
            .client
            .get(&url)
            .headers(self.session.auth_headers())
            .send()
            .await
            .map_err(|e| SchemaError::fetch(id, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SchemaError::fetch(id, format!("HTTP {}", status.as_u16())));
        }

        let body: SchemaResponse = response
            .json()
            .await
            .map_err(|e| SchemaError::fetch(id, e.to_string()))?;

        debug!(bytes = body.schema.len(), "schema fetched");
        Ok(body.schema)
    }
}
