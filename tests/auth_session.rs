//! Refresh-scheduling tests for the session state machine.
//!
//! These tests drive the scheduler with a mock identity provider and a
//! paused tokio clock, so timer behavior is observed deterministically
//! without a network.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use strm_client::error::{ApiError, AuthError};
use strm_client::{
    AuthSession, ClientConfig, Credential, EndpointUrl, Error, IdentityProvider, SessionEvent,
};
use tokio::sync::broadcast;
use tokio::time::advance;

#[derive(Clone, Copy)]
enum RefreshMode {
    Succeed,
    FailTransient,
    FailFatal(u16),
    /// Never resolves; stands in for an in-flight request.
    Hang,
}

struct MockState {
    /// Credential lifetime in seconds from issue.
    lifetime: i64,
    auth_failure: Mutex<Option<u16>>,
    refresh_mode: Mutex<RefreshMode>,
    auth_calls: Mutex<u32>,
    /// Refresh values used, one per refresh call.
    refresh_calls: Mutex<Vec<String>>,
}

#[derive(Clone)]
struct MockIdentity(Arc<MockState>);

impl MockIdentity {
    fn new(lifetime: i64) -> (Self, Arc<MockState>) {
        let state = Arc::new(MockState {
            lifetime,
            auth_failure: Mutex::new(None),
            refresh_mode: Mutex::new(RefreshMode::Succeed),
            auth_calls: Mutex::new(0),
            refresh_calls: Mutex::new(Vec::new()),
        });
        (Self(state.clone()), state)
    }
}

impl MockState {
    fn auth_calls(&self) -> u32 {
        *self.auth_calls.lock().unwrap()
    }

    fn refresh_calls(&self) -> Vec<String> {
        self.refresh_calls.lock().unwrap().clone()
    }

    fn set_refresh_mode(&self, mode: RefreshMode) {
        *self.refresh_mode.lock().unwrap() = mode;
    }
}

#[async_trait]
impl IdentityProvider for MockIdentity {
    async fn authenticate(&self, _config: &ClientConfig) -> Result<Credential, Error> {
        // Suspend once so interleaved callers can be observed.
        tokio::task::yield_now().await;
        *self.0.auth_calls.lock().unwrap() += 1;
        if let Some(status) = *self.0.auth_failure.lock().unwrap() {
            return Err(Error::Api(ApiError::new(status, None)));
        }
        let expires_at = chrono::Utc::now().timestamp() + self.0.lifetime;
        Ok(Credential::new("T1", "R1", expires_at))
    }

    async fn refresh(
        &self,
        _config: &ClientConfig,
        refresh_value: &str,
    ) -> Result<Credential, Error> {
        let n = {
            let mut calls = self.0.refresh_calls.lock().unwrap();
            calls.push(refresh_value.to_string());
            calls.len()
        };
        let mode = *self.0.refresh_mode.lock().unwrap();
        match mode {
            RefreshMode::Succeed => {
                let expires_at = chrono::Utc::now().timestamp() + self.0.lifetime;
                Ok(Credential::new(
                    format!("T{}", n + 1),
                    format!("R{}", n + 1),
                    expires_at,
                ))
            }
            RefreshMode::FailTransient => Err(Error::Api(ApiError::new(503, None))),
            RefreshMode::FailFatal(status) => Err(Error::Api(ApiError::new(status, None))),
            RefreshMode::Hang => {
                futures_util::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}

fn session_with(provider: MockIdentity) -> AuthSession {
    let config = ClientConfig::new(
        EndpointUrl::new("https://auth.strmprivacy.io").unwrap(),
        "billing",
        "client",
        "secret",
    );
    AuthSession::with_provider(config, provider)
}

/// Let spawned tasks run everything currently runnable.
async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

fn drain(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn count_errors_and_disconnects(events: &[SessionEvent]) -> (usize, usize) {
    let errors = events
        .iter()
        .filter(|e| matches!(e, SessionEvent::Error(_)))
        .count();
    let disconnects = events
        .iter()
        .filter(|e| matches!(e, SessionEvent::Disconnected))
        .count();
    (errors, disconnects)
}

#[tokio::test(start_paused = true)]
async fn refresh_fires_at_expiry_minus_safety_margin() {
    let (provider, state) = MockIdentity::new(3600);
    let session = session_with(provider);

    session.connect().await.unwrap();
    assert_eq!(state.auth_calls(), 1);
    assert_eq!(session.bearer_header().as_deref(), Some("Bearer T1"));

    // Let the scheduler arm its timer before moving the clock.
    settle().await;

    // Well before expiresAt - margin: no call yet.
    advance(Duration::from_secs(3538)).await;
    settle().await;
    assert!(state.refresh_calls().is_empty());

    // At expiresAt - margin: one call, using the original refresh value.
    advance(Duration::from_secs(2)).await;
    settle().await;
    assert_eq!(state.refresh_calls(), vec!["R1".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn successful_refresh_replaces_credential_and_reschedules() {
    let (provider, state) = MockIdentity::new(3600);
    let session = session_with(provider);

    session.connect().await.unwrap();
    settle().await;

    advance(Duration::from_secs(3540)).await;
    settle().await;
    assert_eq!(session.bearer_header().as_deref(), Some("Bearer T2"));

    // The next cycle runs against the new credential.
    advance(Duration::from_secs(3540)).await;
    settle().await;
    assert_eq!(state.refresh_calls(), vec!["R1".to_string(), "R2".to_string()]);
    assert_eq!(session.bearer_header().as_deref(), Some("Bearer T3"));
}

#[tokio::test(start_paused = true)]
async fn transient_failures_retry_three_times_then_disconnect() {
    let (provider, state) = MockIdentity::new(3600);
    let session = session_with(provider);
    let mut events = session.subscribe();

    session.connect().await.unwrap();
    state.set_refresh_mode(RefreshMode::FailTransient);
    settle().await;

    advance(Duration::from_secs(3540)).await;
    settle().await;

    // First scheduled attempt plus exactly three zero-delay retries, all
    // reusing the original refresh value.
    let calls = state.refresh_calls();
    assert_eq!(calls.len(), 4);
    assert!(calls.iter().all(|value| value == "R1"));

    let events = drain(&mut events);
    let (errors, disconnects) = count_errors_and_disconnects(&events);
    assert_eq!(errors, 1);
    assert_eq!(disconnects, 1);
    assert!(!session.is_connected());

    // No pending timer remains.
    advance(Duration::from_secs(7200)).await;
    settle().await;
    assert_eq!(state.refresh_calls().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn fatal_refresh_failure_is_never_retried() {
    for status in [401, 400] {
        let (provider, state) = MockIdentity::new(3600);
        let session = session_with(provider);
        let mut events = session.subscribe();

        session.connect().await.unwrap();
        state.set_refresh_mode(RefreshMode::FailFatal(status));
        settle().await;

        advance(Duration::from_secs(3540)).await;
        settle().await;

        assert_eq!(state.refresh_calls().len(), 1, "status {}", status);

        let events = drain(&mut events);
        let (errors, disconnects) = count_errors_and_disconnects(&events);
        assert_eq!(errors, 1);
        assert_eq!(disconnects, 1);
        assert!(!session.is_connected());

        advance(Duration::from_secs(7200)).await;
        settle().await;
        assert_eq!(state.refresh_calls().len(), 1);
    }
}

#[tokio::test(start_paused = true)]
async fn disconnect_during_inflight_refresh_is_silent() {
    let (provider, state) = MockIdentity::new(3600);
    let session = session_with(provider);
    let mut events = session.subscribe();

    session.connect().await.unwrap();
    state.set_refresh_mode(RefreshMode::Hang);
    settle().await;

    // Fire the refresh; the request stays in flight.
    advance(Duration::from_secs(3540)).await;
    settle().await;
    assert_eq!(state.refresh_calls().len(), 1);

    session.disconnect();
    settle().await;

    let events = drain(&mut events);
    let (errors, disconnects) = count_errors_and_disconnects(&events);
    assert_eq!(errors, 0);
    assert_eq!(disconnects, 1);

    // No timer remains from the cancelled cycle.
    advance(Duration::from_secs(7200)).await;
    settle().await;
    assert_eq!(state.refresh_calls().len(), 1);
    assert_eq!(session.bearer_header(), None);
}

#[tokio::test(start_paused = true)]
async fn connect_rejects_credential_already_inside_margin() {
    let (provider, state) = MockIdentity::new(30);
    let session = session_with(provider);
    let mut events = session.subscribe();

    let err = session.connect().await.unwrap_err();
    assert!(matches!(err, Error::Auth(AuthError::TokenExpired)));
    assert_eq!(state.auth_calls(), 1);
    assert!(!session.is_connected());
    assert!(drain(&mut events).is_empty());
}

#[tokio::test(start_paused = true)]
async fn connect_propagates_authentication_failure() {
    let (provider, state) = MockIdentity::new(3600);
    *state.auth_failure.lock().unwrap() = Some(403);
    let session = session_with(provider);

    let err = session.connect().await.unwrap_err();
    assert!(matches!(err, Error::Api(api) if api.status == 403));
    assert!(!session.is_connected());

    // The failure is not sticky.
    *state.auth_failure.lock().unwrap() = None;
    session.connect().await.unwrap();
    assert!(session.is_connected());
    assert_eq!(state.auth_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn disconnect_is_idempotent() {
    let (provider, _state) = MockIdentity::new(3600);
    let session = session_with(provider);
    let mut events = session.subscribe();

    session.connect().await.unwrap();
    session.disconnect();
    session.disconnect();

    let events = drain(&mut events);
    let (_, disconnects) = count_errors_and_disconnects(&events);
    assert_eq!(disconnects, 1);
}

#[tokio::test(start_paused = true)]
async fn reconnect_after_disconnect_reauthenticates() {
    let (provider, state) = MockIdentity::new(3600);
    let session = session_with(provider);

    session.connect().await.unwrap();
    session.disconnect();
    assert_eq!(session.bearer_header(), None);

    session.connect().await.unwrap();
    assert_eq!(state.auth_calls(), 2);
    assert!(session.is_connected());
}

#[tokio::test(start_paused = true)]
async fn concurrent_connects_share_one_refresh_loop() {
    let (provider, state) = MockIdentity::new(3600);
    let session = session_with(provider);
    let other = session.clone();

    let (first, second) = tokio::join!(session.connect(), other.connect());
    first.unwrap();
    second.unwrap();

    // The second caller waits out the in-flight exchange and reuses it.
    assert_eq!(state.auth_calls(), 1);
    settle().await;

    // One refresh per cycle, not one per connect() call.
    advance(Duration::from_secs(3540)).await;
    settle().await;
    assert_eq!(state.refresh_calls().len(), 1);

    // And no loop survives disconnect().
    session.disconnect();
    advance(Duration::from_secs(7200)).await;
    settle().await;
    assert_eq!(state.refresh_calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn connect_is_a_noop_while_credential_is_fresh() {
    let (provider, state) = MockIdentity::new(3600);
    let session = session_with(provider);

    session.connect().await.unwrap();
    session.connect().await.unwrap();
    assert_eq!(state.auth_calls(), 1);
}
