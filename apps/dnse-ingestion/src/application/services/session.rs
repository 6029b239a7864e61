//! Session Manager
//!
//! Owns the lifecycle of the single upstream session as an explicit state
//! machine driven by named transition handlers:
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> (lost) -> Reconnecting
//!                                   ^                       |
//!                                   +------- reconnect -----+
//! ```
//!
//! The connection driver reports transitions; the manager reconciles the
//! subscription registry on connect and, while reconnecting, watches for
//! recovery and refreshes the credential once the bounded wait runs out.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::application::ports::{AuthError, AuthPort, UpstreamPort};
use crate::application::services::registry::SubscriptionRegistry;
use crate::domain::credential::{Credential, CredentialStore, IdentityMismatch};
use crate::infrastructure::metrics::{self, RefreshOutcome};

// =============================================================================
// State
// =============================================================================

/// Upstream session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No session.
    #[default]
    Disconnected,
    /// Initial handshake in progress.
    Connecting,
    /// Session live; registry mutations apply immediately.
    Connected,
    /// Session lost; the driver is retrying.
    Reconnecting,
}

impl SessionState {
    /// State name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        }
    }

    /// Gauge value exported for this state.
    #[must_use]
    pub const fn as_gauge(self) -> f64 {
        match self {
            Self::Disconnected => 0.0,
            Self::Connecting => 1.0,
            Self::Connected => 2.0,
            Self::Reconnecting => 3.0,
        }
    }
}

// =============================================================================
// Refresh
// =============================================================================

/// Bounded wait before a reconnect cycle refreshes the credential.
#[derive(Debug, Clone, Copy)]
pub struct RefreshConfig {
    /// How long to wait for the session to recover on its own.
    pub timeout: Duration,
    /// How often to check for recovery during the wait.
    pub poll_interval: Duration,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// How a reconnect watch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    /// Session recovered within the wait; nothing changed.
    Recovered,
    /// Credential refreshed; the next retry uses the new token.
    Refreshed,
    /// Refresh failed; the stale credential stays in place.
    RefreshFailed,
    /// Shutdown requested during the wait.
    Cancelled,
}

/// Credential refresh errors.
#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    /// Token issuance or identity lookup failed.
    #[error(transparent)]
    Auth(#[from] AuthError),
    /// Fresh token belongs to another investor.
    #[error(transparent)]
    IdentityMismatch(#[from] IdentityMismatch),
}

/// Exchange account credentials for the process credential.
///
/// Runs once at startup; the resolved investor id is fixed from here on.
///
/// # Errors
///
/// Returns `AuthError` if either auth call fails.
pub async fn establish_credential(
    auth: &dyn AuthPort,
    username: &str,
    password: &str,
) -> Result<Credential, AuthError> {
    let token = auth.authenticate(username, password).await?;
    let investor_id = auth.resolve_identity(&token).await?;
    tracing::info!(investor_id = %investor_id, "Credential established");
    Ok(Credential {
        username: username.to_string(),
        password: password.to_string(),
        investor_id,
        token,
    })
}

// =============================================================================
// Session Manager
// =============================================================================

/// Coordinates the upstream session, the registry and the credential.
pub struct SessionManager {
    state: RwLock<SessionState>,
    upstream: RwLock<Option<Arc<dyn UpstreamPort>>>,
    registry: Arc<SubscriptionRegistry>,
    credentials: Arc<CredentialStore>,
    auth: Arc<dyn AuthPort>,
    refresh: RefreshConfig,
    watching: AtomicBool,
    reconnects: AtomicU64,
    cancel: CancellationToken,
}

impl SessionManager {
    /// Create a manager in the `Disconnected` state.
    #[must_use]
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        credentials: Arc<CredentialStore>,
        auth: Arc<dyn AuthPort>,
        refresh: RefreshConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            state: RwLock::new(SessionState::Disconnected),
            upstream: RwLock::new(None),
            registry,
            credentials,
            auth,
            refresh,
            watching: AtomicBool::new(false),
            reconnects: AtomicU64::new(0),
            cancel,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Reconnect attempts seen since startup.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    /// Shared credential store.
    #[must_use]
    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    /// Registry reconciled on every connect.
    #[must_use]
    pub const fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Install the upstream handle the driver publishes to.
    pub fn attach(&self, upstream: Arc<dyn UpstreamPort>) {
        *self.upstream.write() = Some(upstream);
    }

    /// Whether the session is `Connected` and the handle agrees.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live_upstream().is_some()
    }

    /// The upstream handle, only while the session is live.
    #[must_use]
    pub fn live_upstream(&self) -> Option<Arc<dyn UpstreamPort>> {
        if self.state() != SessionState::Connected {
            return None;
        }
        self.upstream
            .read()
            .as_ref()
            .filter(|upstream| upstream.is_connected())
            .cloned()
    }

    fn transition(&self, next: SessionState) -> SessionState {
        let previous = std::mem::replace(&mut *self.state.write(), next);
        metrics::set_session_state(next.as_gauge());
        if previous != next {
            tracing::debug!(from = previous.as_str(), to = next.as_str(), "Session state changed");
        }
        previous
    }

    // -------------------------------------------------------------------------
    // Transition handlers
    // -------------------------------------------------------------------------

    /// Initial handshake started.
    pub fn on_connecting(&self) {
        self.transition(SessionState::Connecting);
        tracing::info!("Connecting to upstream broker");
    }

    /// Handshake completed: re-assert every active symbol.
    ///
    /// Returns the number of subscribe calls issued.
    pub fn on_connected(&self) -> usize {
        self.transition(SessionState::Connected);
        tracing::info!("Connected to upstream broker");

        let upstream = self.upstream.read().clone();
        upstream.map_or(0, |upstream| self.registry.reconcile(upstream.as_ref()))
    }

    /// Session dropped. Recovery is left to the driver's reconnect loop.
    pub fn on_connection_lost(&self, reason: &str) {
        self.transition(SessionState::Disconnected);
        tracing::warn!(reason, "Upstream connection lost, will attempt to reconnect");
    }

    /// Driver is about to retry.
    ///
    /// Starts a refresh watch unless one is already running for this cycle.
    /// Returns whether a watch was started.
    pub fn on_reconnecting(self: &Arc<Self>, attempt: u32) -> bool {
        self.transition(SessionState::Reconnecting);
        self.reconnects.fetch_add(1, Ordering::Relaxed);
        metrics::record_reconnect();
        tracing::info!(attempt, "Reconnecting to upstream broker");

        if self
            .watching
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(attempt, "Refresh watch already running");
            return false;
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = this.watch_reconnect().await;
            this.watching.store(false, Ordering::Release);
            tracing::debug!(?outcome, "Refresh watch finished");
        });
        true
    }

    /// Session closed on shutdown.
    pub fn on_disconnected(&self) {
        self.transition(SessionState::Disconnected);
        tracing::info!("Upstream session closed");
    }

    // -------------------------------------------------------------------------
    // Credential refresh
    // -------------------------------------------------------------------------

    /// Wait up to the refresh timeout for recovery, then refresh.
    pub async fn watch_reconnect(&self) -> WatchOutcome {
        let deadline = Instant::now() + self.refresh.timeout;
        let mut poll = tokio::time::interval_at(
            Instant::now() + self.refresh.poll_interval,
            self.refresh.poll_interval,
        );
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return WatchOutcome::Cancelled,
                () = tokio::time::sleep_until(deadline) => break,
                _ = poll.tick() => {
                    if self.is_live() {
                        tracing::info!("Reconnected with existing credential");
                        return WatchOutcome::Recovered;
                    }
                }
            }
        }

        if self.is_live() {
            return WatchOutcome::Recovered;
        }

        tracing::info!(
            timeout_secs = self.refresh.timeout.as_secs(),
            "Reconnect timeout, refreshing credential"
        );
        match self.refresh_credentials().await {
            Ok(generation) => {
                tracing::info!(generation, "Credential refreshed, next retry uses new token");
                WatchOutcome::Refreshed
            }
            Err(e) => {
                tracing::error!(error = %e, "Credential refresh failed, keeping stale token");
                WatchOutcome::RefreshFailed
            }
        }
    }

    /// Issue a fresh token and swap it in if the identity matches.
    ///
    /// Returns the new credential generation.
    ///
    /// # Errors
    ///
    /// Returns `RefreshError` if the auth calls fail or the token resolves
    /// to a different investor. The stored token is unchanged on error.
    pub async fn refresh_credentials(&self) -> Result<u64, RefreshError> {
        let result = self.try_refresh().await;
        let outcome = match &result {
            Ok(_) => RefreshOutcome::Success,
            Err(RefreshError::Auth(_)) => RefreshOutcome::AuthFailed,
            Err(RefreshError::IdentityMismatch(_)) => RefreshOutcome::IdentityMismatch,
        };
        metrics::record_credential_refresh(outcome);
        result
    }

    async fn try_refresh(&self) -> Result<u64, RefreshError> {
        let (username, password) = self.credentials.login();
        tracing::info!(username = %username, "Authenticating for fresh token");

        let token = self.auth.authenticate(&username, &password).await?;
        let investor_id = self.auth.resolve_identity(&token).await?;
        Ok(self.credentials.rotate(&investor_id, token)?)
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("state", &self.state())
            .field("reconnects", &self.reconnect_attempts())
            .field("refresh", &self.refresh)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{MockAuthPort, UpstreamError};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct FakeUpstream {
        connected: AtomicBool,
        subscribed: Mutex<Vec<String>>,
    }

    impl UpstreamPort for FakeUpstream {
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn subscribe(&self, topic: &str) -> Result<(), UpstreamError> {
            self.subscribed.lock().push(topic.to_string());
            Ok(())
        }

        fn unsubscribe(&self, _topics: &[String]) -> Result<(), UpstreamError> {
            Ok(())
        }
    }

    fn credentials() -> Arc<CredentialStore> {
        Arc::new(CredentialStore::new(Credential {
            username: "user".to_string(),
            password: "pass".to_string(),
            investor_id: "inv-1".to_string(),
            token: "old".to_string(),
        }))
    }

    fn manager(auth: MockAuthPort, registry: Arc<SubscriptionRegistry>) -> Arc<SessionManager> {
        Arc::new(SessionManager::new(
            registry,
            credentials(),
            Arc::new(auth),
            RefreshConfig::default(),
            CancellationToken::new(),
        ))
    }

    #[test]
    fn not_live_until_connected() {
        let session = manager(MockAuthPort::new(), Arc::new(SubscriptionRegistry::new()));
        let upstream = Arc::new(FakeUpstream::default());
        upstream.connected.store(true, Ordering::SeqCst);
        session.attach(upstream);

        assert!(!session.is_live());
        session.on_connecting();
        assert!(!session.is_live());
        session.on_connected();
        assert!(session.is_live());
        session.on_connection_lost("io error");
        assert!(!session.is_live());
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[test]
    fn on_connected_reconciles_registry() {
        let registry = Arc::new(SubscriptionRegistry::seeded(["fpt", "vnm"]));
        let session = manager(MockAuthPort::new(), registry);
        let upstream = Arc::new(FakeUpstream::default());
        upstream.connected.store(true, Ordering::SeqCst);
        session.attach(Arc::clone(&upstream) as Arc<dyn UpstreamPort>);

        assert_eq!(session.on_connected(), 8);
        assert_eq!(upstream.subscribed.lock().len(), 8);
    }

    #[tokio::test]
    async fn refresh_swaps_token_on_matching_identity() {
        let mut auth = MockAuthPort::new();
        auth.expect_authenticate()
            .withf(|u, p| u == "user" && p == "pass")
            .times(1)
            .returning(|_, _| Ok("new".to_string()));
        auth.expect_resolve_identity()
            .withf(|t| t == "new")
            .times(1)
            .returning(|_| Ok("inv-1".to_string()));
        let session = manager(auth, Arc::new(SubscriptionRegistry::new()));

        assert_eq!(session.refresh_credentials().await.unwrap(), 1);
        assert_eq!(session.credentials().token(), "new");
    }

    #[tokio::test]
    async fn refresh_with_other_identity_keeps_token() {
        let mut auth = MockAuthPort::new();
        auth.expect_authenticate()
            .returning(|_, _| Ok("foreign".to_string()));
        auth.expect_resolve_identity()
            .returning(|_| Ok("inv-2".to_string()));
        let session = manager(auth, Arc::new(SubscriptionRegistry::new()));

        let err = session.refresh_credentials().await.unwrap_err();

        assert!(matches!(err, RefreshError::IdentityMismatch(_)));
        assert_eq!(session.credentials().token(), "old");
        assert_eq!(session.credentials().generation(), 0);
    }

    #[tokio::test]
    async fn refresh_auth_failure_keeps_token() {
        let mut auth = MockAuthPort::new();
        auth.expect_authenticate()
            .returning(|_, _| Err(AuthError::Status { endpoint: "/api/auth", status: 401 }));
        auth.expect_resolve_identity().never();
        let session = manager(auth, Arc::new(SubscriptionRegistry::new()));

        assert!(matches!(
            session.refresh_credentials().await,
            Err(RefreshError::Auth(_))
        ));
        assert_eq!(session.credentials().token(), "old");
    }

    #[tokio::test(start_paused = true)]
    async fn watch_exits_quietly_when_session_recovers() {
        let mut auth = MockAuthPort::new();
        auth.expect_authenticate().never();
        let session = manager(auth, Arc::new(SubscriptionRegistry::new()));
        let upstream = Arc::new(FakeUpstream::default());
        upstream.connected.store(true, Ordering::SeqCst);
        session.attach(upstream);
        session.on_connected();

        assert_eq!(session.watch_reconnect().await, WatchOutcome::Recovered);
        assert_eq!(session.credentials().token(), "old");
    }

    #[tokio::test(start_paused = true)]
    async fn watch_refreshes_after_timeout() {
        let mut auth = MockAuthPort::new();
        auth.expect_authenticate()
            .times(1)
            .returning(|_, _| Ok("new".to_string()));
        auth.expect_resolve_identity()
            .times(1)
            .returning(|_| Ok("inv-1".to_string()));
        let session = manager(auth, Arc::new(SubscriptionRegistry::new()));
        session.attach(Arc::new(FakeUpstream::default()));

        let started = Instant::now();
        let outcome = session.watch_reconnect().await;

        assert_eq!(outcome, WatchOutcome::Refreshed);
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert_eq!(session.credentials().token(), "new");
    }

    #[tokio::test(start_paused = true)]
    async fn one_watch_per_reconnect_cycle() {
        let mut auth = MockAuthPort::new();
        auth.expect_authenticate()
            .times(1)
            .returning(|_, _| Ok("new".to_string()));
        auth.expect_resolve_identity()
            .times(1)
            .returning(|_| Ok("inv-1".to_string()));
        let session = manager(auth, Arc::new(SubscriptionRegistry::new()));

        assert!(session.on_reconnecting(1));
        assert!(!session.on_reconnecting(2));
        assert_eq!(session.state(), SessionState::Reconnecting);
        assert_eq!(session.reconnect_attempts(), 2);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(session.credentials().token(), "new");
        assert!(session.on_reconnecting(3));
    }

    #[tokio::test]
    async fn establish_resolves_investor_from_first_token() {
        let mut auth = MockAuthPort::new();
        auth.expect_authenticate()
            .returning(|_, _| Ok("jwt".to_string()));
        auth.expect_resolve_identity()
            .withf(|t| t == "jwt")
            .returning(|_| Ok("inv-9".to_string()));

        let credential = establish_credential(&auth, "user", "pass").await.unwrap();

        assert_eq!(credential.investor_id, "inv-9");
        assert_eq!(credential.token, "jwt");
        assert_eq!(credential.username, "user");
    }

    #[tokio::test]
    async fn establish_fails_without_identity() {
        let mut auth = MockAuthPort::new();
        auth.expect_authenticate()
            .returning(|_, _| Ok("jwt".to_string()));
        auth.expect_resolve_identity()
            .returning(|_| Err(AuthError::EmptyField("investorId")));

        assert_eq!(
            establish_credential(&auth, "user", "pass").await.unwrap_err(),
            AuthError::EmptyField("investorId")
        );
    }
}
