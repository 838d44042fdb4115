//! Access-token lifecycle: bootstrap, proactive refresh, deletion latch.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::bootstrap::{BootstrapClient, BootstrapResponse};
use crate::error::{ControlError, ControlResult};

/// Refresh at this fraction of the remaining token lifetime.
const REFRESH_FRACTION: f64 = 0.8;
/// Never schedule a refresh closer than this.
const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(30);
/// Retry delay after a transient refresh failure.
const TRANSIENT_RETRY_DELAY: Duration = Duration::from_secs(30);
/// Budget for an on-demand (blocking) refresh.
const FORCED_REFRESH_TIMEOUT: Duration = Duration::from_secs(10);

/// Token state guarded by the read-write lock.
#[derive(Debug, Default)]
struct TokenState {
    current_token: String,
    token_expiry: Option<Instant>,
    config_url: String,
    logs_url: String,
    deployment_deleted: bool,
}

/// Holds the current access token and keeps it fresh.
///
/// A single writer at a time (the refresh loop or a forced refresh) replaces
/// the token; readers take the lock briefly to copy out strings. Once the
/// deletion latch is set it stays set for the life of the process, and no
/// further control-plane calls are made for refresh.
pub struct TokenManager {
    client: BootstrapClient,
    bootstrap_token: String,
    state: RwLock<TokenState>,
    shutdown: watch::Sender<bool>,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("deployment_deleted", &self.is_deployment_deleted())
            .finish_non_exhaustive()
    }
}

impl TokenManager {
    /// Creates a manager for the given bootstrap token.
    #[must_use]
    pub fn new(bootstrap_token: impl Into<String>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            client: BootstrapClient::new(),
            bootstrap_token: bootstrap_token.into(),
            state: RwLock::new(TokenState::default()),
            shutdown,
            refresh_task: Mutex::new(None),
        }
    }

    /// Performs the initial bootstrap exchange.
    ///
    /// # Errors
    ///
    /// Propagates the exchange error. When it is permanent (HTTP 410) the
    /// deletion latch is set before returning, so the caller can continue in
    /// allow-all mode.
    pub async fn initialize(&self) -> ControlResult<()> {
        match self.client.bootstrap(&self.bootstrap_token).await {
            Ok(response) => {
                info!(
                    expires_in = response.expires_in,
                    config_url = %response.config_url,
                    "bootstrap successful"
                );
                self.apply(response);
                Ok(())
            }
            Err(err) => {
                if err.is_permanent() {
                    self.state.write().deployment_deleted = true;
                    warn!("deployment has been permanently deleted (410), switching to allow-all mode");
                }
                Err(err)
            }
        }
    }

    /// Spawns the background refresh loop.
    ///
    /// The timer is single-shot and rearming: each successful refresh
    /// reschedules at 80 % of the newly granted lifetime, a transient failure
    /// retries in 30 s, and a permanent failure latches and exits.
    pub fn start_refresh_loop(self: Arc<Self>) {
        if self.is_deployment_deleted() {
            debug!("not starting token refresh loop, deployment is deleted");
            return;
        }

        let manager = Arc::clone(&self);
        let mut shutdown_rx = self.shutdown.subscribe();

        let handle = tokio::spawn(async move {
            let mut delay = manager.refresh_delay();

            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow_and_update() {
                            return;
                        }
                    }
                    () = tokio::time::sleep(delay) => {
                        if manager.is_deployment_deleted() {
                            debug!("stopping token refresh loop, deployment has been deleted");
                            return;
                        }

                        match manager.refresh().await {
                            Ok(()) => delay = manager.refresh_delay(),
                            Err(err) if err.is_permanent() => {
                                warn!("deployment deleted during refresh, stopping refresh loop");
                                return;
                            }
                            Err(err) => {
                                error!(error = %err, "token refresh failed");
                                delay = TRANSIENT_RETRY_DELAY;
                            }
                        }
                    }
                }
            }
        });

        *self.refresh_task.lock() = Some(handle);
    }

    /// Stops the refresh loop.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
        let task = self.refresh_task.lock().take();
        if let Some(handle) = task {
            handle.abort();
        }
    }

    /// Current access token; empty before the first successful bootstrap.
    #[must_use]
    pub fn token(&self) -> String {
        self.state.read().current_token.clone()
    }

    /// Current config endpoint URL.
    #[must_use]
    pub fn config_url(&self) -> String {
        self.state.read().config_url.clone()
    }

    /// Current logs endpoint URL.
    #[must_use]
    pub fn logs_url(&self) -> String {
        self.state.read().logs_url.clone()
    }

    /// Whether the control plane has declared this deployment deleted.
    #[must_use]
    pub fn is_deployment_deleted(&self) -> bool {
        self.state.read().deployment_deleted
    }

    /// Time remaining before the current token expires.
    #[must_use]
    pub fn time_until_expiry(&self) -> Duration {
        self.state
            .read()
            .token_expiry
            .map_or(Duration::ZERO, |expiry| {
                expiry.saturating_duration_since(Instant::now())
            })
    }

    /// Returns a token valid for at least `min_validity`.
    ///
    /// Attempts a blocking refresh (10 s budget) when the held token expires
    /// sooner. Returns the currently held token regardless — possibly
    /// expired — plus the refresh error, if any. Shipping with a stale token
    /// beats shipping with none.
    pub async fn token_with_min_validity(
        &self,
        min_validity: Duration,
    ) -> (String, Option<ControlError>) {
        if self.time_until_expiry() > min_validity {
            return (self.token(), None);
        }

        debug!(
            remaining = ?self.time_until_expiry(),
            min_validity = ?min_validity,
            "token expiring soon, triggering refresh"
        );

        match self.force_refresh().await {
            Ok(()) => (self.token(), None),
            Err(err) => {
                warn!(error = %err, "token refresh failed, using existing token");
                (self.token(), Some(err))
            }
        }
    }

    /// Triggers an immediate refresh with a fixed budget.
    ///
    /// # Errors
    ///
    /// Returns the refresh error, or [`ControlError::RefreshTimeout`] when
    /// the exchange does not finish in time.
    pub async fn force_refresh(&self) -> ControlResult<()> {
        match tokio::time::timeout(FORCED_REFRESH_TIMEOUT, self.refresh()).await {
            Ok(result) => result,
            Err(_) => Err(ControlError::RefreshTimeout),
        }
    }

    /// One refresh exchange; latches on permanent failure.
    async fn refresh(&self) -> ControlResult<()> {
        match self.client.bootstrap(&self.bootstrap_token).await {
            Ok(response) => {
                debug!(expires_in = response.expires_in, "token refreshed");
                self.apply(response);
                Ok(())
            }
            Err(err) => {
                if err.is_permanent() {
                    self.state.write().deployment_deleted = true;
                }
                Err(err)
            }
        }
    }

    /// Stores a fresh token and endpoint URLs.
    fn apply(&self, response: BootstrapResponse) {
        let mut state = self.state.write();
        state.current_token = response.access_token;
        state.token_expiry = Some(Instant::now() + Duration::from_secs(response.expires_in));
        state.config_url = response.config_url;
        state.logs_url = response.logs_url;
    }

    /// Delay until the next scheduled refresh: 80 % of the remaining
    /// lifetime, floored at 30 s.
    fn refresh_delay(&self) -> Duration {
        let until_expiry = self.time_until_expiry();
        let at_fraction = until_expiry.mul_f64(REFRESH_FRACTION);
        at_fraction.max(MIN_REFRESH_INTERVAL)
    }
}

impl warden_logs::TokenProvider for TokenManager {
    fn token(&self) -> String {
        Self::token(self)
    }

    fn logs_url(&self) -> String {
        Self::logs_url(self)
    }
}
