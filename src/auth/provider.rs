//! Identity endpoint client.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, instrument};

use crate::config::ClientConfig;
use crate::error::{ApiError, Error};

use super::token::Credential;

/// The exchange with the identity endpoint.
///
/// The session state machine talks to the identity endpoint only through
/// this trait, which keeps the refresh scheduling logic testable without
/// a network.
#[async_trait]
pub trait IdentityProvider: Send + Sync + 'static {
    /// Perform the initial authenticate exchange.
    async fn authenticate(&self, config: &ClientConfig) -> Result<Credential, Error>;

    /// Obtain the next credential using the current refresh value.
    async fn refresh(&self, config: &ClientConfig, refresh_value: &str)
        -> Result<Credential, Error>;
}

/// Request body for the authenticate exchange.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthRequest<'a> {
    billing_id: &'a str,
    client_id: &'a str,
    client_secret: &'a str,
}

/// Request body for the refresh exchange.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// HTTP implementation of [`IdentityProvider`].
#[derive(Debug, Clone)]
pub struct HttpIdentityProvider {
    client: reqwest::Client,
}

impl HttpIdentityProvider {
    /// Per-request deadline on identity exchanges.
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("strm-client/", env!("CARGO_PKG_VERSION")))
            .timeout(Self::REQUEST_TIMEOUT)
            .build()
            .expect("failed to build HTTP client");

        Self { client }
    }

    async fn post_credential<B>(&self, url: &str, body: &B) -> Result<Credential, Error>
    where
        B: Serialize + Sync,
    {
        let response = self.client.post(url).json(body).send().await?;

        let status = response.status();
        if status.is_success() {
            let credential = response.json::<Credential>().await?;
            Ok(credential)
        } else {
            let body = response.text().await.ok().filter(|b| !b.is_empty());
            Err(Error::Api(ApiError::new(status.as_u16(), body)))
        }
    }
}

impl Default for HttpIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    #[instrument(skip(self, config), fields(auth_url = %config.auth_url, client_id = %config.client_id))]
    async fn authenticate(&self, config: &ClientConfig) -> Result<Credential, Error> {
        let url = config.auth_url.endpoint("/auth");
        debug!("authenticating");

        let request = AuthRequest {
            billing_id: &config.billing_id,
            client_id: &config.client_id,
            client_secret: &config.secret,
        };

        self.post_credential(&url, &request).await
    }

    #[instrument(skip_all, fields(auth_url = %config.auth_url))]
    async fn refresh(
        &self,
        config: &ClientConfig,
        refresh_value: &str,
    ) -> Result<Credential, Error> {
        let url = config.auth_url.endpoint("/refresh");
        debug!("refreshing credential");

        let request = RefreshRequest {
            refresh_token: refresh_value,
        };

        self.post_credential(&url, &request).await
    }
}
