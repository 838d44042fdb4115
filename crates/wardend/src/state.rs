//! Shared state behind the HTTP handlers.

use std::path::PathBuf;
use std::sync::Arc;

use warden_control::EdlMode;
use warden_feed::Updater;
use warden_logs::LogShipper;
use warden_matcher::Matcher;
use warden_metrics::ForwardAuthMetrics;

/// Everything the request handlers need, assembled once at startup.
///
/// References to the matcher, updater, and shipper are capability handles;
/// ownership stays with the subsystems themselves.
pub struct AppState {
    /// Published IP set for the hot path.
    pub matcher: Arc<Matcher>,
    /// Interpretation of the EDL.
    pub mode: EdlMode,
    /// False collapses every decision to allow.
    pub deployment_enabled: bool,
    /// Deployment-scoped machine fingerprint stamped onto events.
    pub device_id: String,
    /// Header consulted before the standard extraction chain.
    pub ip_header_override: Option<String>,
    /// Deny-event sink; absent when the control plane gave no logs URL.
    pub shipper: Option<Arc<LogShipper>>,
    /// Feed updater, for health and readiness.
    pub updater: Arc<Updater>,
    /// Metrics registry.
    pub metrics: ForwardAuthMetrics,
    /// Directory serving `/static/*` and the 403 page.
    pub static_dir: PathBuf,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("mode", &self.mode)
            .field("deployment_enabled", &self.deployment_enabled)
            .finish_non_exhaustive()
    }
}
