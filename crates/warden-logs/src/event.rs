//! Access-decision events shipped to the control plane.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event type tag carried by every access-decision record.
const EVENT_TYPE: &str = "access_decision";

/// Debug headers forwarded under `internal.headers` when present.
const DEBUG_HEADER_KEYS: [&str; 4] = [
    "x-forwarded-server",
    "x-forwarded-port",
    "x-real-ip",
    "x-forwarded-method",
];

/// One access decision, immutable after construction.
///
/// Serialized as a single NDJSON line; field names are part of the control
/// plane contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessEvent {
    /// Event timestamp (UTC).
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    /// Always `access_decision`.
    pub event_type: String,
    /// `allowed` or `blocked`.
    pub outcome: String,
    /// Reason code matching outcome × policy mode.
    pub reason: String,
    /// HTTP status returned to the proxy.
    pub status_code: u16,
    /// Deployment-scoped machine fingerprint.
    pub device_id: String,
    /// Details of the proxied request.
    pub request: RequestDetails,
    /// The client the decision applies to.
    pub client: ClientInfo,
    /// Active policy information.
    pub policy: PolicyInfo,
    /// Debug information, hidden in the UI.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub internal: Option<InternalInfo>,
}

/// Proxied request details, taken from `X-Forwarded-*` headers only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestDetails {
    /// From `X-Forwarded-Method`.
    pub method: String,
    /// From `X-Forwarded-Host`.
    pub host: String,
    /// From `X-Forwarded-Uri`.
    pub path: String,
    /// From `X-Forwarded-Proto`.
    pub scheme: String,
}

/// Client identity attached to the event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Resolved client IP.
    pub ip: String,
    /// User agent, when the proxy forwarded one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

/// Active policy mode at decision time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyInfo {
    /// `allowlist` or `blocklist`.
    pub mode: String,
}

/// Internal debug block, only populated when proxy-side headers exist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InternalInfo {
    /// The sidecar path the proxy called.
    pub proxy_path: String,
    /// From `X-Forwarded-Host`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingress_host: Option<String>,
    /// Selected debug headers, lowercased names.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
}

impl AccessEvent {
    /// Builds an event from the decision and the (lowercased, first-value)
    /// request headers.
    #[must_use]
    pub fn new(
        client_ip: &str,
        headers: &HashMap<String, String>,
        device_id: &str,
        mode: &str,
        allowed: bool,
        status_code: u16,
    ) -> Self {
        let outcome = if allowed { "allowed" } else { "blocked" };
        let reason = match (allowed, mode) {
            (true, "allowlist") => "in_allowlist",
            (true, _) => "not_in_blocklist",
            (false, "allowlist") => "not_in_allowlist",
            (false, _) => "in_blocklist",
        };

        let header = |name: &str| headers.get(name).cloned().unwrap_or_default();

        let internal = Self::internal_info(headers);

        Self {
            timestamp: Utc::now(),
            event_type: EVENT_TYPE.to_string(),
            outcome: outcome.to_string(),
            reason: reason.to_string(),
            status_code,
            device_id: device_id.to_string(),
            request: RequestDetails {
                method: header("x-forwarded-method"),
                host: header("x-forwarded-host"),
                path: header("x-forwarded-uri"),
                scheme: header("x-forwarded-proto"),
            },
            client: ClientInfo {
                ip: client_ip.to_string(),
                user_agent: headers.get("user-agent").cloned(),
            },
            policy: PolicyInfo {
                mode: mode.to_string(),
            },
            internal,
        }
    }

    /// Collects the debug block when the proxy left identifying headers.
    fn internal_info(headers: &HashMap<String, String>) -> Option<InternalInfo> {
        if !headers.contains_key("x-forwarded-server") && !headers.contains_key("x-real-ip") {
            return None;
        }

        let debug_headers: HashMap<String, String> = DEBUG_HEADER_KEYS
            .iter()
            .filter_map(|&key| {
                headers
                    .get(key)
                    .filter(|v| !v.is_empty())
                    .map(|v| (key.to_string(), v.clone()))
            })
            .collect();

        if debug_headers.is_empty() {
            return None;
        }

        Some(InternalInfo {
            proxy_path: "/auth".to_string(),
            ingress_host: headers.get("x-forwarded-host").cloned(),
            headers: Some(debug_headers),
        })
    }
}
