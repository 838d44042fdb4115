//! The forward-auth decision handler.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use tracing::warn;
use warden_control::EdlMode;
use warden_logs::AccessEvent;

use crate::state::AppState;

const FORBIDDEN_PAGE: &str = "403.html";

/// Decides whether the client behind this request may pass.
///
/// The proxy calls this for every request it wants vetted; an empty 200
/// means allow, a 403 means deny, and a 400 means the client IP could not be
/// determined. When the deployment is not enabled the answer is always 200 —
/// losing the control plane must never take traffic down with it.
pub async fn handle_auth(
    State(state): State<Arc<AppState>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let start = Instant::now();

    let client_ip = extract_client_ip(&headers, state.ip_header_override.as_deref(), remote);
    if client_ip.is_empty() {
        finish(&state, "invalid", start);
        warn!("unable to determine client IP");
        return (StatusCode::BAD_REQUEST, "Unable to determine client IP").into_response();
    }

    // Allow-all failsafe: a disabled, deleted, or unreachable deployment
    // never blocks traffic.
    if !state.deployment_enabled {
        finish(&state, "allowed", start);
        return StatusCode::OK.into_response();
    }

    let Ok(addr) = client_ip.parse::<IpAddr>() else {
        finish(&state, "invalid", start);
        warn!(ip = %client_ip, "invalid client IP");
        return (StatusCode::BAD_REQUEST, "Invalid IP address").into_response();
    };

    let in_list = state.matcher.contains(addr);
    let is_blocklist = matches!(state.mode, EdlMode::Blocklist);
    let allowed = is_blocklist != in_list;

    if allowed {
        finish(&state, "allowed", start);
        return StatusCode::OK.into_response();
    }

    finish(&state, "denied", start);

    if let Some(shipper) = &state.shipper {
        let event = AccessEvent::new(
            &client_ip,
            &first_values(&headers),
            &state.device_id,
            state.mode.as_str(),
            false,
            StatusCode::FORBIDDEN.as_u16(),
        );
        shipper.send_event(event);
    }

    serve_forbidden(&state, &headers).await
}

/// Records the per-result counter and duration observation.
fn finish(state: &AppState, result: &str, start: Instant) {
    state.metrics.requests().inc_result(result);
    state
        .metrics
        .requests()
        .observe_duration(result, start.elapsed().as_secs_f64());
}

/// Resolves the client IP the decision applies to.
///
/// Order: configured override header, `X-Forwarded-For`, `X-Real-IP`, then
/// the transport remote address. Multi-value headers contribute their first
/// comma-separated entry, trimmed.
pub fn extract_client_ip(
    headers: &HeaderMap,
    override_header: Option<&str>,
    remote: SocketAddr,
) -> String {
    if let Some(name) = override_header {
        if let Some(value) = header_str(headers, name) {
            return first_entry(value);
        }
    }

    if let Some(value) = header_str(headers, "x-forwarded-for") {
        return first_entry(value);
    }

    if let Some(value) = header_str(headers, "x-real-ip") {
        return value.trim().to_string();
    }

    remote.ip().to_string()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
}

fn first_entry(value: &str) -> String {
    value
        .split(',')
        .next()
        .unwrap_or_default()
        .trim()
        .to_string()
}

/// Lowercased first-value view of the request headers, for event payloads.
fn first_values(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

/// Serves the deny response: the static HTML page for browsers when it
/// exists, plain text otherwise.
async fn serve_forbidden(state: &AppState, headers: &HeaderMap) -> Response {
    let wants_html = header_str(headers, "accept").is_some_and(|accept| accept.contains("text/html"));

    if wants_html {
        let page = state.static_dir.join(FORBIDDEN_PAGE);
        if let Ok(content) = tokio::fs::read_to_string(&page).await {
            return (StatusCode::FORBIDDEN, Html(content)).into_response();
        }
    }

    (
        StatusCode::FORBIDDEN,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        "Forbidden",
    )
        .into_response()
}
