//! Periodic EDL refresh publishing to the matcher.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use warden_matcher::Matcher;
use warden_metrics::EdlMetrics;

use crate::error::FeedResult;
use crate::fetcher::{Fetcher, FetcherConfig};

/// Updater settings.
#[derive(Debug, Clone)]
pub struct UpdaterConfig {
    /// Fetcher settings (URL, retry policy).
    pub fetcher: FetcherConfig,
    /// Interval between refresh cycles.
    pub update_frequency: Duration,
    /// Whether the deployment enforces the EDL at all.
    pub deployment_enabled: bool,
}

/// Snapshot of the updater's progress, used by health and readiness.
#[derive(Debug, Clone, Default)]
pub struct UpdateStatus {
    /// When the last successful update finished.
    pub last_update: Option<DateTime<Utc>>,
    /// Message of the most recent failure, cleared on success.
    pub last_error: Option<String>,
    /// Number of successful updates since start.
    pub update_count: i64,
    /// Entries behind the currently published set.
    pub entry_count: i64,
}

#[derive(Debug, Default)]
struct StatusInner {
    last_update: Option<DateTime<Utc>>,
    last_error: Option<String>,
    update_count: i64,
}

/// Drives the fetch-parse-swap cycle on a fixed schedule.
///
/// The first update is synchronous and its failure is fatal to the caller;
/// afterwards a background loop refreshes every `update_frequency`, logging
/// failures without ever tearing down the published set.
pub struct Updater {
    fetcher: Fetcher,
    matcher: Arc<Matcher>,
    metrics: EdlMetrics,
    update_frequency: Duration,
    deployment_enabled: bool,
    status: RwLock<StatusInner>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Updater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Updater")
            .field("update_frequency", &self.update_frequency)
            .field("deployment_enabled", &self.deployment_enabled)
            .finish_non_exhaustive()
    }
}

impl Updater {
    /// Creates an updater publishing into `matcher`.
    #[must_use]
    pub fn new(config: UpdaterConfig, matcher: Arc<Matcher>, metrics: EdlMetrics) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            fetcher: Fetcher::new(config.fetcher),
            matcher,
            metrics,
            update_frequency: config.update_frequency,
            deployment_enabled: config.deployment_enabled,
            status: RwLock::new(StatusInner::default()),
            shutdown,
            task: Mutex::new(None),
        }
    }

    /// Performs the initial update and spawns the refresh loop.
    ///
    /// Returns immediately when the deployment is disabled.
    ///
    /// # Errors
    ///
    /// The initial fetch failing is returned to the caller; the process
    /// should treat it as fatal since no policy has ever been loaded.
    pub async fn start(self: Arc<Self>) -> FeedResult<()> {
        if !self.deployment_enabled {
            return Ok(());
        }

        self.update_now().await?;

        let updater = Arc::clone(&self);
        let mut shutdown_rx = self.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + updater.update_frequency;
            let mut ticker = tokio::time::interval_at(start, updater.update_frequency);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow_and_update() {
                            return;
                        }
                    }
                    _ = ticker.tick() => {
                        if let Err(err) = updater.update_now().await {
                            error!(error = %err, "EDL update failed");
                        }
                    }
                }
            }
        });
        *self.task.lock() = Some(handle);

        Ok(())
    }

    /// Stops the refresh loop.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
        let task = self.task.lock().take();
        if let Some(handle) = task {
            handle.abort();
        }
    }

    /// One fetch-parse-swap cycle.
    ///
    /// # Errors
    ///
    /// Returns the fetch error after recording it in the status snapshot and
    /// the failure metric. The previously published set stays in place.
    pub async fn update_now(&self) -> FeedResult<()> {
        let started = Instant::now();
        let mut shutdown_rx = self.shutdown.subscribe();

        let (set, count) = match self.fetcher.fetch_with_retry(&mut shutdown_rx).await {
            Ok(result) => result,
            Err(err) => {
                self.status.write().last_error = Some(err.to_string());
                self.metrics.inc_update("failure");
                return Err(err);
            }
        };

        self.matcher.update(set, count);

        {
            let mut status = self.status.write();
            status.last_update = Some(Utc::now());
            status.last_error = None;
            status.update_count += 1;
        }

        let elapsed = started.elapsed();
        self.metrics.set_entries(count);
        self.metrics.inc_update("success");
        self.metrics.set_last_update_timestamp(Utc::now().timestamp());
        self.metrics.observe_update_duration(elapsed.as_secs_f64());

        if count == 0 {
            warn!(entries = 0, duration = ?elapsed, "EDL updated with empty list");
        } else {
            info!(entries = count, duration = ?elapsed, "EDL updated successfully");
        }

        Ok(())
    }

    /// Consistent snapshot of update progress.
    #[must_use]
    pub fn status(&self) -> UpdateStatus {
        let status = self.status.read();
        UpdateStatus {
            last_update: status.last_update,
            last_error: status.last_error.clone(),
            update_count: status.update_count,
            entry_count: self.matcher.count(),
        }
    }
}
