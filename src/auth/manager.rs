use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::refresh::TokenRefresher;
use crate::error::ApiError;
use super::store::CredentialStore;
use super::types::{Actor, CredentialKind, LoginPayload, RenewOutcome, SessionPhase, SessionState};

/// How often the renewal timer checks for a lapsed access token.
/// One minute shorter than the access token TTL.
pub const RENEW_INTERVAL: Duration = Duration::from_secs(14 * 60);

/// Session controller
/// Sole owner of the signed-in state and of the token renewal policy
pub struct SessionController<R> {
    /// Exchanges refresh tokens for access tokens
    refresher: R,

    /// Access/refresh token slots
    store: Arc<dyn CredentialStore>,

    /// Profile and epoch of the current session
    session: StdMutex<SessionSlot>,

    /// True until the startup check resolves
    bootstrapping: AtomicBool,

    /// Held for the duration of a renewal; remembers the last outcome
    renewal: Mutex<Option<RenewOutcome>>,

    /// Number of renewals that have finished
    renewals_completed: AtomicU64,
}

/// Current profile, plus a counter bumped on every login and logout.
/// A renewal writes its result only under this lock and only if the
/// epoch it started with is still current.
#[derive(Default)]
struct SessionSlot {
    epoch: u64,
    actor: Option<Actor>,
}

impl<R: TokenRefresher> SessionController<R> {
    /// Create a controller in the bootstrapping state
    pub fn new(refresher: R, store: Arc<dyn CredentialStore>) -> Self {
        Self {
            refresher,
            store,
            session: StdMutex::new(SessionSlot::default()),
            bootstrapping: AtomicBool::new(true),
            renewal: Mutex::new(None),
            renewals_completed: AtomicU64::new(0),
        }
    }

    /// Bootstrap, then start the renewal timer
    pub async fn start(self: &Arc<Self>) -> RenewalTimer {
        self.bootstrap().await;
        self.spawn_renewal_timer(RENEW_INTERVAL)
    }

    /// One-time startup check of the stored credentials
    pub async fn bootstrap(&self) -> SessionPhase {
        if !self.bootstrapping.load(Ordering::Acquire) {
            return self.state().await.phase();
        }

        let has_access = self.store.get(CredentialKind::Access).is_some();
        let has_refresh = self.store.get(CredentialKind::Refresh).is_some();

        match (has_access, has_refresh) {
            (false, false) => tracing::info!("No stored credentials, starting signed out"),
            (true, _) => tracing::info!("Access token present, session restored"),
            (false, true) => {
                tracing::info!("Access token missing, renewing from refresh token...");
                self.renew().await;
            }
        }

        self.bootstrapping.store(false, Ordering::Release);

        let phase = self.state().await.phase();
        tracing::info!("Session bootstrap complete: {:?}", phase);
        phase
    }

    /// Exchange the stored refresh token for a new access token.
    ///
    /// Any failure signs the session out. Concurrent callers share one
    /// in-flight renewal and all receive its outcome. A result that arrives
    /// after a login or logout is dropped.
    pub async fn renew(&self) -> RenewOutcome {
        let seen = self.renewals_completed.load(Ordering::Acquire);
        let mut last_outcome = self.renewal.lock().await;

        // Another caller finished a renewal while we waited for the lock
        if self.renewals_completed.load(Ordering::Acquire) != seen {
            if let Some(outcome) = *last_outcome {
                tracing::debug!("Joined in-flight renewal: {:?}", outcome);
                return outcome;
            }
        }

        let outcome = self.renew_once().await;
        *last_outcome = Some(outcome);
        self.renewals_completed.fetch_add(1, Ordering::AcqRel);
        outcome
    }

    async fn renew_once(&self) -> RenewOutcome {
        let epoch = self.lock_session().epoch;
        let Some(refresh_token) = self.store.get(CredentialKind::Refresh) else {
            tracing::warn!("No refresh token available, signing out");
            self.logout().await;
            return RenewOutcome::SignedOut;
        };

        let result = self.refresher.refresh_access_token(&refresh_token).await;

        match self.apply_renewal(epoch, result) {
            Applied::Renewed => RenewOutcome::Renewed,
            Applied::Cleared => RenewOutcome::SignedOut,
            // Report whatever the newer session holds
            Applied::Discarded if self.access_token().is_some() => RenewOutcome::Renewed,
            Applied::Discarded => RenewOutcome::SignedOut,
        }
    }

    /// Write a renewal result back, unless a login or logout happened while
    /// it was in flight. Holds the epoch lock so neither can interleave.
    fn apply_renewal(&self, epoch: u64, result: Result<String, ApiError>) -> Applied {
        let mut session = self.lock_session();
        if session.epoch != epoch {
            tracing::info!("Session changed during renewal, discarding result");
            return Applied::Discarded;
        }

        match result {
            Ok(access_token) => {
                self.store.update_access_token(&access_token);
                tracing::info!("Access token renewed");
                Applied::Renewed
            }
            Err(e) => {
                tracing::warn!("Token refresh failed, signing out: {}", e);
                session.epoch += 1;
                self.store.clear_all();
                if let Some(actor) = session.actor.take() {
                    tracing::info!("Signed out {}", actor.email);
                }
                Applied::Cleared
            }
        }
    }

    fn lock_session(&self) -> std::sync::MutexGuard<'_, SessionSlot> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Timer body: renew only when the access token has lapsed
    pub async fn tick(&self) -> Option<RenewOutcome> {
        let has_access = self.store.get(CredentialKind::Access).is_some();
        let has_refresh = self.store.get(CredentialKind::Refresh).is_some();

        if !has_access && has_refresh {
            tracing::debug!("Access token lapsed, renewing");
            Some(self.renew().await)
        } else {
            tracing::trace!(has_access, has_refresh, "Renewal tick, nothing to do");
            None
        }
    }

    /// Store a server-issued token pair and profile
    pub async fn login(&self, payload: &LoginPayload) {
        let actor = Actor::from(&payload.user);
        tracing::info!("Signed in as {}", actor.email);

        let mut session = self.lock_session();
        session.epoch += 1;
        self.store
            .set_auth_tokens(&payload.tokens.access_token, &payload.tokens.refresh_token);
        session.actor = Some(actor);
    }

    /// Drop both tokens and the profile; safe to call repeatedly
    pub async fn logout(&self) {
        let previous = {
            let mut session = self.lock_session();
            session.epoch += 1;
            self.store.clear_all();
            session.actor.take()
        };
        if let Some(actor) = previous {
            tracing::info!("Signed out {}", actor.email);
        } else {
            tracing::debug!("Session cleared");
        }
    }

    /// Current session view, derived fresh from the store
    pub async fn state(&self) -> SessionState {
        let actor = self.lock_session().actor.clone();
        SessionState::derive(
            actor,
            self.store.get(CredentialKind::Access).is_some(),
            self.store.get(CredentialKind::Refresh).is_some(),
            self.bootstrapping.load(Ordering::Acquire),
        )
    }

    pub async fn is_authenticated(&self) -> bool {
        self.state().await.authenticated
    }

    pub fn is_bootstrapping(&self) -> bool {
        self.bootstrapping.load(Ordering::Acquire)
    }

    pub async fn actor(&self) -> Option<Actor> {
        self.lock_session().actor.clone()
    }

    /// Bearer token for authorizing API calls, if one is live
    pub fn access_token(&self) -> Option<String> {
        self.store.get(CredentialKind::Access)
    }

    /// Run `tick` every `period` until the returned handle is shut down
    pub fn spawn_renewal_timer(self: &Arc<Self>, period: Duration) -> RenewalTimer {
        let controller = Arc::clone(self);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::debug!("Renewal timer started (every {}s)", period.as_secs());
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        controller.tick().await;
                    }
                    _ = &mut shutdown_rx => {
                        tracing::debug!("Renewal timer stopped");
                        break;
                    }
                }
            }
        });

        RenewalTimer {
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        }
    }
}

/// What a finished refresh call did to the store
enum Applied {
    Renewed,
    Cleared,
    Discarded,
}

/// Handle to the background renewal task; dropping it aborts the task
pub struct RenewalTimer {
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl RenewalTimer {
    /// Stop the timer and wait for the task to exit
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::warn!("Renewal timer task ended abnormally: {}", e);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for RenewalTimer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::store::{Clock, ManualClock, MemoryCredentialStore};
    use crate::error::ApiError;
    use crate::models::auth::{TokenPair, UserRecord};
    use chrono::Utc;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;

    /// Refresher that answers from a script and records calls
    struct FakeRefresher {
        new_access_token: Option<String>,
        delay: Duration,
        calls: AtomicUsize,
        seen_tokens: StdMutex<Vec<String>>,
    }

    impl FakeRefresher {
        fn accepting(token: &str) -> Self {
            Self {
                new_access_token: Some(token.to_string()),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
                seen_tokens: StdMutex::new(Vec::new()),
            }
        }

        fn rejecting() -> Self {
            Self {
                new_access_token: None,
                ..Self::accepting("")
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl TokenRefresher for FakeRefresher {
        async fn refresh_access_token(&self, refresh_token: &str) -> Result<String, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_tokens
                .lock()
                .unwrap()
                .push(refresh_token.to_string());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.new_access_token
                .clone()
                .ok_or_else(|| ApiError::Service {
                    status: 401,
                    message: "Refresh token expired".to_string(),
                    errors: None,
                })
        }
    }

    fn controller(
        refresher: FakeRefresher,
    ) -> (
        Arc<SessionController<FakeRefresher>>,
        Arc<MemoryCredentialStore>,
        Arc<ManualClock>,
    ) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(MemoryCredentialStore::with_clock(clock.clone()));
        let controller = Arc::new(SessionController::new(refresher, store.clone()));
        (controller, store, clock)
    }

    /// Store that counts every write it receives
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryCredentialStore,
        puts: AtomicUsize,
        clears: AtomicUsize,
    }

    impl CredentialStore for CountingStore {
        fn put(&self, kind: CredentialKind, value: &str, ttl: chrono::Duration) {
            self.puts.fetch_add(1, Ordering::SeqCst);
            self.inner.put(kind, value, ttl);
        }

        fn get(&self, kind: CredentialKind) -> Option<String> {
            self.inner.get(kind)
        }

        fn clear(&self, kind: CredentialKind) {
            self.clears.fetch_add(1, Ordering::SeqCst);
            self.inner.clear(kind);
        }
    }

    fn payload() -> LoginPayload {
        LoginPayload {
            user: UserRecord {
                id: "65f0".to_string(),
                email: "ada@example.com".to_string(),
                email_is_verified: true,
                phone_is_verified: false,
                provider: "credentials".to_string(),
                status: "active".to_string(),
                created_at: None,
                updated_at: None,
            },
            tokens: TokenPair {
                access_token: "A1".to_string(),
                refresh_token: "R1".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_starts_bootstrapping() {
        let (controller, _store, _clock) = controller(FakeRefresher::accepting("A2"));
        let state = controller.state().await;
        assert!(state.bootstrapping);
        assert_eq!(state.phase(), SessionPhase::Bootstrapping);
    }

    #[tokio::test]
    async fn test_bootstrap_without_credentials() {
        let store = Arc::new(CountingStore::default());
        let controller = SessionController::new(FakeRefresher::accepting("A2"), store.clone());

        let phase = controller.bootstrap().await;

        assert_eq!(phase, SessionPhase::Unauthenticated);
        assert!(!controller.is_bootstrapping());
        assert_eq!(controller.refresher.calls(), 0);
        assert_eq!(store.puts.load(Ordering::SeqCst), 0);
        assert_eq!(store.clears.load(Ordering::SeqCst), 0);
        assert!(!store.has_any_token());
    }

    #[tokio::test]
    async fn test_bootstrap_with_access_token_skips_network() {
        let (controller, store, _clock) = controller(FakeRefresher::accepting("A2"));
        store.update_access_token("A1");

        assert_eq!(controller.bootstrap().await, SessionPhase::Authenticated);
        assert_eq!(controller.refresher.calls(), 0);
        assert!(controller.actor().await.is_none());
    }

    #[tokio::test]
    async fn test_bootstrap_renews_from_refresh_token() {
        let (controller, store, _clock) = controller(FakeRefresher::accepting("A2"));
        store.put(
            CredentialKind::Refresh,
            "R1",
            chrono::Duration::days(15),
        );

        assert_eq!(controller.bootstrap().await, SessionPhase::Authenticated);
        assert_eq!(store.get(CredentialKind::Access).as_deref(), Some("A2"));
        assert_eq!(store.get(CredentialKind::Refresh).as_deref(), Some("R1"));
        assert_eq!(*controller.refresher.seen_tokens.lock().unwrap(), vec!["R1"]);
    }

    #[tokio::test]
    async fn test_bootstrap_rejected_refresh_signs_out() {
        let (controller, store, _clock) = controller(FakeRefresher::rejecting());
        store.put(
            CredentialKind::Refresh,
            "R1",
            chrono::Duration::days(15),
        );

        assert_eq!(controller.bootstrap().await, SessionPhase::Unauthenticated);
        assert!(!store.has_any_token());
        assert!(!controller.is_bootstrapping());
    }

    #[tokio::test]
    async fn test_bootstrap_runs_once() {
        let (controller, store, _clock) = controller(FakeRefresher::accepting("A2"));
        store.put(
            CredentialKind::Refresh,
            "R1",
            chrono::Duration::days(15),
        );

        controller.bootstrap().await;
        store.clear(CredentialKind::Access);
        controller.bootstrap().await;

        assert_eq!(controller.refresher.calls(), 1);
    }

    #[tokio::test]
    async fn test_login_stores_tokens_and_actor() {
        let (controller, store, _clock) = controller(FakeRefresher::accepting("A2"));
        controller.bootstrap().await;

        controller.login(&payload()).await;

        assert!(controller.is_authenticated().await);
        assert_eq!(store.get(CredentialKind::Access).as_deref(), Some("A1"));
        assert_eq!(store.get(CredentialKind::Refresh).as_deref(), Some("R1"));
        assert_eq!(controller.access_token().as_deref(), Some("A1"));

        let actor = controller.actor().await.unwrap();
        assert_eq!(actor.id, "65f0");
        assert_eq!(actor.email, "ada@example.com");
        assert!(actor.email_is_verified);
        assert!(!actor.phone_is_verified);
        assert_eq!(actor.provider, "credentials");
        assert_eq!(actor.status, "active");
    }

    #[tokio::test]
    async fn test_login_token_ttls() {
        let (controller, store, clock) = controller(FakeRefresher::accepting("A2"));
        controller.login(&payload()).await;

        assert_eq!(
            store.expires_at(CredentialKind::Access),
            Some(clock.now() + chrono::Duration::minutes(15))
        );
        assert_eq!(
            store.expires_at(CredentialKind::Refresh),
            Some(clock.now() + chrono::Duration::days(15))
        );
    }

    #[tokio::test]
    async fn test_logout_is_idempotent() {
        let (controller, store, _clock) = controller(FakeRefresher::accepting("A2"));
        controller.login(&payload()).await;

        controller.logout().await;
        let once = controller.state().await;
        controller.logout().await;
        let twice = controller.state().await;

        assert_eq!(once, twice);
        assert!(!twice.authenticated);
        assert!(twice.actor.is_none());
        assert!(!store.has_any_token());
    }

    #[tokio::test]
    async fn test_logout_during_bootstrap() {
        let (controller, store, _clock) = controller(FakeRefresher::accepting("A2"));
        store.update_access_token("A1");

        controller.logout().await;

        let state = controller.state().await;
        assert!(!state.authenticated);
        assert!(state.bootstrapping);
    }

    #[tokio::test]
    async fn test_renew_without_refresh_token() {
        let (controller, store, _clock) = controller(FakeRefresher::accepting("A2"));
        store.update_access_token("A1");

        assert_eq!(controller.renew().await, RenewOutcome::SignedOut);
        assert_eq!(controller.refresher.calls(), 0);
        assert!(!controller.is_authenticated().await);
        assert!(!store.has_any_token());
    }

    #[tokio::test]
    async fn test_renew_keeps_refresh_token() {
        let (controller, store, _clock) = controller(FakeRefresher::accepting("A2"));
        controller.login(&payload()).await;

        assert_eq!(controller.renew().await, RenewOutcome::Renewed);
        assert_eq!(store.get(CredentialKind::Access).as_deref(), Some("A2"));
        assert_eq!(store.get(CredentialKind::Refresh).as_deref(), Some("R1"));
        assert!(controller.actor().await.is_some());
    }

    #[tokio::test]
    async fn test_failed_renew_clears_actor() {
        let (controller, store, _clock) = controller(FakeRefresher::rejecting());
        controller.login(&payload()).await;

        assert_eq!(controller.renew().await, RenewOutcome::SignedOut);
        assert!(controller.actor().await.is_none());
        assert!(!store.has_any_token());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_renewals_share_one_request() {
        let mut refresher = FakeRefresher::accepting("A2");
        refresher.delay = Duration::from_secs(2);
        let (controller, store, _clock) = controller(refresher);
        store.put(
            CredentialKind::Refresh,
            "R1",
            chrono::Duration::days(15),
        );

        let (a, b) = futures::join!(controller.renew(), controller.renew());

        assert_eq!(a, RenewOutcome::Renewed);
        assert_eq!(b, RenewOutcome::Renewed);
        assert_eq!(controller.refresher.calls(), 1);

        // A later renewal is a fresh request
        controller.renew().await;
        assert_eq!(controller.refresher.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_during_renewal_stays_signed_out() {
        let mut refresher = FakeRefresher::accepting("A2");
        refresher.delay = Duration::from_secs(2);
        let (controller, store, _clock) = controller(refresher);
        controller.login(&payload()).await;
        store.clear(CredentialKind::Access);

        let (outcome, ()) = futures::join!(controller.renew(), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            controller.logout().await;
        });

        assert_eq!(outcome, RenewOutcome::SignedOut);
        assert_eq!(controller.refresher.calls(), 1);
        assert!(!store.has_any_token());
        assert!(!controller.is_authenticated().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_during_failed_renewal_is_kept() {
        let mut refresher = FakeRefresher::rejecting();
        refresher.delay = Duration::from_secs(2);
        let (controller, store, _clock) = controller(refresher);
        store.put(
            CredentialKind::Refresh,
            "R-stale",
            chrono::Duration::days(1),
        );

        let (outcome, ()) = futures::join!(controller.renew(), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            controller.login(&payload()).await;
        });

        assert_eq!(outcome, RenewOutcome::Renewed);
        assert_eq!(store.get(CredentialKind::Access).as_deref(), Some("A1"));
        assert_eq!(store.get(CredentialKind::Refresh).as_deref(), Some("R1"));
        assert!(controller.actor().await.is_some());
    }

    #[tokio::test]
    async fn test_tick_only_renews_lapsed_access_token() {
        let (controller, store, clock) = controller(FakeRefresher::accepting("A2"));
        controller.login(&payload()).await;

        assert_eq!(controller.tick().await, None);
        assert_eq!(controller.refresher.calls(), 0);

        clock.advance(chrono::Duration::minutes(15));
        assert_eq!(controller.tick().await, Some(RenewOutcome::Renewed));
        assert_eq!(store.get(CredentialKind::Access).as_deref(), Some("A2"));

        controller.logout().await;
        assert_eq!(controller.tick().await, None);
        assert_eq!(controller.refresher.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_renewal_timer_fires_every_interval() {
        let (controller, store, _clock) = controller(FakeRefresher::accepting("A2"));
        store.put(
            CredentialKind::Refresh,
            "R1",
            chrono::Duration::days(15),
        );

        let timer = controller.spawn_renewal_timer(RENEW_INTERVAL);
        assert!(timer.is_running());

        tokio::time::sleep(RENEW_INTERVAL - Duration::from_secs(1)).await;
        assert_eq!(controller.refresher.calls(), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(controller.refresher.calls(), 1);
        assert_eq!(store.get(CredentialKind::Access).as_deref(), Some("A2"));

        // Access token is still live on the store clock, so the next tick is a no-op
        tokio::time::sleep(RENEW_INTERVAL).await;
        assert_eq!(controller.refresher.calls(), 1);

        timer.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_renewal_timer_stops_on_shutdown() {
        let (controller, store, _clock) = controller(FakeRefresher::accepting("A2"));
        store.put(
            CredentialKind::Refresh,
            "R1",
            chrono::Duration::days(15),
        );

        let timer = controller.spawn_renewal_timer(RENEW_INTERVAL);
        timer.shutdown().await;

        tokio::time::sleep(RENEW_INTERVAL * 3).await;
        assert_eq!(controller.refresher.calls(), 0);
        assert_eq!(Arc::strong_count(&controller), 1);
    }

    #[tokio::test]
    async fn test_start_bootstraps_then_runs_timer() {
        let (controller, store, _clock) = controller(FakeRefresher::accepting("A2"));
        store.put(
            CredentialKind::Refresh,
            "R1",
            chrono::Duration::days(15),
        );

        let timer = controller.start().await;

        assert!(!controller.is_bootstrapping());
        assert!(controller.is_authenticated().await);
        assert!(timer.is_running());
        timer.shutdown().await;
    }
}
