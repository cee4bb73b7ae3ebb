//! Session lifecycle management.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::config::ClientConfig;
use crate::error::{AuthError, Error};

use super::provider::{HttpIdentityProvider, IdentityProvider};
use super::token::Credential;

/// Lifecycle notifications emitted by an [`AuthSession`].
///
/// Background refresh has no synchronous caller, so irrecoverable refresh
/// failures are surfaced here; a consumer that does not watch for errors
/// still observes termination via [`SessionEvent::Disconnected`].
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The initial authenticate exchange succeeded.
    Authenticated,
    /// Background refresh failed irrecoverably. Followed by `Disconnected`.
    Error(Arc<Error>),
    /// The session ended, either by `disconnect()` or after a fatal
    /// refresh failure.
    Disconnected,
}

/// Session state, mutated only by `connect()`, `disconnect()` and the
/// refresh loop.
#[derive(Debug)]
enum SessionState {
    /// No credential held.
    Empty,
    /// An authenticate exchange is in flight.
    Authenticating,
    /// A credential is held and a refresh is scheduled. `attempt` counts
    /// zero-delay retries within the current refresh cycle.
    Scheduled { credential: Credential, attempt: u32 },
    /// Disconnected; any in-flight exchange result is dropped on arrival.
    Disconnected,
}

/// An authenticated session against the identity endpoint.
///
/// The session obtains a [`Credential`] on [`connect()`](AuthSession::connect)
/// and keeps it alive indefinitely by refreshing it ahead of expiry, until
/// [`disconnect()`](AuthSession::disconnect) or an irrecoverable refresh
/// failure.
///
/// # Thread safety
///
/// Sessions are cheap to clone (internal `Arc`) and safe to share. The
/// credential is replaced as a whole by the refresh loop; readers take a
/// snapshot per call.
#[derive(Clone)]
pub struct AuthSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: ClientConfig,
    provider: Arc<dyn IdentityProvider>,
    safety_margin: Duration,
    state: Mutex<SessionState>,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
    /// Serializes `connect()` calls; at most one authenticate exchange
    /// runs at a time, and at most one refresh loop is ever spawned.
    connect_gate: AsyncMutex<()>,
    events: broadcast::Sender<SessionEvent>,
}

impl AuthSession {
    /// Lead time before expiry at which the proactive refresh fires.
    pub const SAFETY_MARGIN: Duration = Duration::from_secs(60);

    /// Zero-delay retries allowed per refresh cycle after the first attempt.
    pub const MAX_RETRY_ATTEMPTS: u32 = 3;

    /// Create a session talking to the identity endpoint over HTTP.
    pub fn new(config: ClientConfig) -> Self {
        Self::with_provider(config, HttpIdentityProvider::new())
    }

    /// Create a session with a custom [`IdentityProvider`].
    pub fn with_provider(config: ClientConfig, provider: impl IdentityProvider) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(SessionInner {
                config,
                provider: Arc::new(provider),
                safety_margin: Self::SAFETY_MARGIN,
                state: Mutex::new(SessionState::Empty),
                refresh_task: Mutex::new(None),
                connect_gate: AsyncMutex::new(()),
                events,
            }),
        }
    }

    /// Subscribe to lifecycle notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Authenticate and start the refresh scheduler.
    ///
    /// A no-op when already connected with a credential outside the safety
    /// margin. Concurrent calls are serialized: a caller arriving while an
    /// exchange is in flight waits for it and then observes the live
    /// session instead of starting a second exchange. A freshly issued
    /// credential that is already within the margin is a hard precondition
    /// failure ([`AuthError::TokenExpired`]), not retried.
    ///
    /// # Errors
    ///
    /// Authentication failures propagate to the caller; the session is left
    /// empty and a later `connect()` starts over.
    #[instrument(skip(self), fields(client_id = %self.inner.config.client_id))]
    pub async fn connect(&self) -> Result<(), Error> {
        let _gate = self.inner.connect_gate.lock().await;

        {
            let mut state = self.inner.state.lock().unwrap();
            if let SessionState::Scheduled { credential, .. } = &*state {
                if !credential.expires_within(self.inner.safety_margin) {
                    debug!("already connected");
                    return Ok(());
                }
            }
            *state = SessionState::Authenticating;
        }
        // A stale refresh loop must not outlive the credential it refreshes.
        self.abort_refresh_task();

        info!("authenticating");
        let credential = match self.inner.provider.authenticate(&self.inner.config).await {
            Ok(credential) => credential,
            Err(err) => {
                self.reset_if_authenticating();
                return Err(err);
            }
        };

        if credential.expires_within(self.inner.safety_margin) {
            self.reset_if_authenticating();
            return Err(Error::Auth(AuthError::TokenExpired));
        }

        {
            let mut state = self.inner.state.lock().unwrap();
            if matches!(*state, SessionState::Disconnected) {
                // disconnect() ran while the exchange was in flight and wins.
                return Err(Error::Auth(AuthError::NotConnected));
            }
            *state = SessionState::Scheduled {
                credential: credential.clone(),
                attempt: 0,
            };
            // Spawn and store under the same critical section as the state
            // transition; disconnect() sees either the stored handle or the
            // `Disconnected` state, never a gap between the two.
            let task = tokio::spawn(run_refresh_loop(self.inner.clone(), credential.clone()));
            if let Some(old) = self.inner.refresh_task.lock().unwrap().replace(task) {
                old.abort();
            }
        }

        let _ = self.inner.events.send(SessionEvent::Authenticated);
        info!(expires_at = credential.expires_at(), "session connected");

        Ok(())
    }

    /// End the session.
    ///
    /// Aborts any in-flight refresh exchange (its eventual completion is
    /// treated as cancelled), clears the pending refresh timer and the held
    /// credential, and emits [`SessionEvent::Disconnected`]. Idempotent.
    pub fn disconnect(&self) {
        {
            let mut state = self.inner.state.lock().unwrap();
            if matches!(*state, SessionState::Disconnected) {
                return;
            }
            *state = SessionState::Disconnected;
        }
        self.abort_refresh_task();
        let _ = self.inner.events.send(SessionEvent::Disconnected);
        info!("session disconnected");
    }

    /// The current `Authorization` header value, or `None` when no
    /// credential is held.
    pub fn bearer_header(&self) -> Option<String> {
        let state = self.inner.state.lock().unwrap();
        match &*state {
            SessionState::Scheduled { credential, .. } => {
                Some(format!("Bearer {}", credential.access_value()))
            }
            _ => None,
        }
    }

    /// Authorization headers for outbound requests; empty when no
    /// credential is held.
    pub(crate) fn auth_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(bearer) = self.bearer_header() {
            if let Ok(value) = HeaderValue::from_str(&bearer) {
                headers.insert(AUTHORIZATION, value);
            }
        }
        headers
    }

    /// Whether a credential is currently held.
    pub fn is_connected(&self) -> bool {
        matches!(
            &*self.inner.state.lock().unwrap(),
            SessionState::Scheduled { .. }
        )
    }

    fn abort_refresh_task(&self) {
        if let Some(task) = self.inner.refresh_task.lock().unwrap().take() {
            task.abort();
        }
    }

    fn reset_if_authenticating(&self) {
        let mut state = self.inner.state.lock().unwrap();
        if matches!(*state, SessionState::Authenticating) {
            *state = SessionState::Empty;
        }
    }
}

impl std::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession")
            .field("config", &self.inner.config)
            .field("state", &*self.inner.state.lock().unwrap())
            .finish()
    }
}

impl SessionInner {
    /// Terminal failure of the refresh loop: emit the error, then
    /// disconnect. Skipped entirely when `disconnect()` already won.
    fn fail(&self, err: Error) {
        {
            let mut state = self.state.lock().unwrap();
            if matches!(*state, SessionState::Disconnected) {
                return;
            }
            *state = SessionState::Disconnected;
        }
        let _ = self.events.send(SessionEvent::Error(Arc::new(err)));
        let _ = self.events.send(SessionEvent::Disconnected);
    }
}

/// The refresh scheduler.
///
/// One cycle per credential: sleep until `expiresAt − margin`, then attempt
/// the refresh exchange. Transient failures (anything but HTTP 400/401)
/// retry immediately, reusing the original refresh value, up to
/// [`AuthSession::MAX_RETRY_ATTEMPTS`] times; fatal failures and exhausted
/// retries emit one error and disconnect. Attempts are strictly sequential.
/// Aborting the task cancels any in-flight exchange.
async fn run_refresh_loop(inner: Arc<SessionInner>, mut credential: Credential) {
    let mut attempt: u32 = 0;
    loop {
        let delay = if attempt == 0 {
            credential.refresh_delay(inner.safety_margin)
        } else {
            Duration::ZERO
        };
        tokio::time::sleep(delay).await;

        debug!(attempt, "refreshing credential");
        let result = inner
            .provider
            .refresh(&inner.config, credential.refresh_value())
            .await;

        match result {
            Ok(next) => {
                {
                    let mut state = inner.state.lock().unwrap();
                    if matches!(*state, SessionState::Disconnected) {
                        // disconnect() won the race; drop the result.
                        return;
                    }
                    *state = SessionState::Scheduled {
                        credential: next.clone(),
                        attempt: 0,
                    };
                }
                debug!(expires_at = next.expires_at(), "credential refreshed");
                credential = next;
                attempt = 0;
            }
            Err(err) if is_fatal(&err) => {
                warn!(error = %err, "refresh rejected, disconnecting");
                inner.fail(err);
                return;
            }
            Err(err) if attempt < AuthSession::MAX_RETRY_ATTEMPTS => {
                attempt += 1;
                warn!(error = %err, attempt, "transient refresh failure, retrying");
                let mut state = inner.state.lock().unwrap();
                match &mut *state {
                    SessionState::Disconnected => return,
                    SessionState::Scheduled { attempt: a, .. } => *a = attempt,
                    _ => {}
                }
            }
            Err(err) => {
                warn!(error = %err, "refresh retries exhausted, disconnecting");
                inner.fail(err);
                return;
            }
        }
    }
}

fn is_fatal(err: &Error) -> bool {
    matches!(err, Error::Api(api) if api.is_fatal())
}
