//! Health and readiness endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use crate::state::AppState;
use crate::version;

/// EDL snapshots older than this fail readiness.
const STALENESS_LIMIT_SECS: i64 = 2 * 60 * 60;

/// Body served by `/health`.
#[derive(Debug, Serialize)]
pub struct HealthStatus {
    /// Fixed `healthy`; liveness only says the process responds.
    pub status: &'static str,
    /// Release version.
    pub version: &'static str,
    /// Git commit of the build.
    pub git_commit: &'static str,
    /// Build timestamp.
    pub build_date: &'static str,
    /// RFC 3339 time of the last successful EDL update.
    pub last_update: Option<String>,
    /// Successful updates since start.
    pub update_count: i64,
    /// Entries in the published set.
    pub entry_count: i64,
    /// Seconds since the last successful update.
    pub uptime_since_last_update: Option<f64>,
    /// Most recent update failure, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Liveness plus EDL status in one JSON document.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthStatus> {
    let status = state.updater.status();

    let last_update = status.last_update.map(|at| at.to_rfc3339());
    let uptime_since_last_update = status
        .last_update
        .map(|at| (Utc::now() - at).num_milliseconds() as f64 / 1000.0);

    Json(HealthStatus {
        status: "healthy",
        version: version::VERSION,
        git_commit: version::GIT_COMMIT,
        build_date: version::BUILD_DATE,
        last_update,
        update_count: status.update_count,
        entry_count: status.entry_count,
        uptime_since_last_update,
        last_error: status.last_error,
    })
}

/// Readiness: 200 only when an EDL has been loaded and is under two hours
/// old. Load balancers use this to keep cold or stale instances out of
/// rotation.
pub async fn ready(State(state): State<Arc<AppState>>) -> Response {
    let status = state.updater.status();

    let Some(last_update) = status.last_update else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "Not ready - EDL not yet loaded",
        )
            .into_response();
    };

    if status.entry_count == 0 {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "Not ready - EDL not yet loaded",
        )
            .into_response();
    }

    if (Utc::now() - last_update).num_seconds() > STALENESS_LIMIT_SECS {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "Not ready - EDL data is stale",
        )
            .into_response();
    }

    (StatusCode::OK, "Ready").into_response()
}
