//! EDL configuration: wire types, policy mode, and the config client.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;

use crate::bootstrap::truncated_body;
use crate::error::{ControlError, ControlResult};
use crate::token::TokenManager;

const CONFIG_TIMEOUT: Duration = Duration::from_secs(10);

/// How the EDL is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EdlMode {
    /// Only listed addresses may pass.
    Allowlist,
    /// Listed addresses are refused.
    #[default]
    Blocklist,
    /// No enforcement; the deployment is disabled.
    Disabled,
}

impl EdlMode {
    /// Maps the control-plane `purpose` field to a mode.
    ///
    /// Anything that is not an allowlist is treated as a blocklist; that is
    /// the safe reading for feeds labelled `other`/`others` or unknown.
    #[must_use]
    pub fn from_purpose(purpose: &str) -> Self {
        match purpose {
            "allowlist" => Self::Allowlist,
            _ => Self::Blocklist,
        }
    }

    /// Stable string form, used in policy labels and event payloads.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Allowlist => "allowlist",
            Self::Blocklist => "blocklist",
            Self::Disabled => "disabled",
        }
    }
}

impl fmt::Display for EdlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// EDL configuration as served by the control plane.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EdlConfig {
    /// Deployment identifier.
    #[serde(default)]
    pub deployment_id: String,
    /// Workspace identifier.
    #[serde(default)]
    pub workspace_id: String,
    /// Human-readable deployment name.
    #[serde(default)]
    pub name: String,
    /// Feed purpose; see [`EdlMode::from_purpose`].
    #[serde(default)]
    pub purpose: String,
    /// Requested refresh period in seconds.
    #[serde(default)]
    pub update_frequency_seconds: i64,
    /// Feed download URLs.
    #[serde(default)]
    pub urls: EdlUrls,
    /// Whether enforcement is enabled.
    #[serde(default)]
    pub enabled: bool,
}

impl EdlConfig {
    /// The profile applied when the deployment is disabled or deleted.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            purpose: "disabled".to_string(),
            enabled: false,
            ..Self::default()
        }
    }
}

/// Feed URL variants offered by the control plane.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EdlUrls {
    /// Combined IPv4+IPv6 feed; the first entry is used.
    #[serde(default)]
    pub combined: Vec<String>,
    /// IPv4-only feeds.
    #[serde(default)]
    pub ipv4: Vec<String>,
    /// IPv6-only feeds.
    #[serde(default)]
    pub ipv6: Vec<String>,
    /// Checksum files for the feeds.
    #[serde(default)]
    pub checksums: Vec<String>,
    /// Entries the control plane could not render for this format.
    #[serde(default)]
    pub unprocessable: Vec<String>,
}

/// Error body attached to 4xx config responses.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    #[allow(dead_code)]
    error: String,
    #[serde(default)]
    code: String,
}

/// Fetches the EDL configuration using the token manager's credentials.
#[derive(Debug)]
pub struct ConfigClient {
    client: reqwest::Client,
    tokens: Arc<TokenManager>,
}

impl ConfigClient {
    /// Creates a config client backed by the given token manager.
    #[must_use]
    pub fn new(tokens: Arc<TokenManager>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(CONFIG_TIMEOUT)
                .build()
                .expect("failed to build config HTTP client"),
            tokens,
        }
    }

    /// Fetches the current EDL configuration.
    ///
    /// 404/403 responses carrying a `DEPLOYMENT_DISABLED` or
    /// `DEPLOYMENT_DELETED` code collapse to the disabled profile rather than
    /// an error; a bare 410 is permanent.
    ///
    /// # Errors
    ///
    /// Any other non-2xx response or transport failure is a retryable error.
    pub async fn get_edl_config(&self) -> ControlResult<EdlConfig> {
        let config_url = self.tokens.config_url();
        if config_url.is_empty() {
            return Err(ControlError::MissingConfigUrl);
        }

        let token = self.tokens.token();
        if token.is_empty() {
            return Err(ControlError::MissingToken);
        }

        let response = self
            .client
            .get(&config_url)
            .bearer_auth(&token)
            .send()
            .await?;
        let status = response.status();

        if matches!(
            status,
            StatusCode::NOT_FOUND | StatusCode::FORBIDDEN | StatusCode::GONE
        ) {
            let body = truncated_body(response).await;

            if let Ok(parsed) = serde_json::from_str::<ErrorBody>(&body) {
                if parsed.code == "DEPLOYMENT_DISABLED" || parsed.code == "DEPLOYMENT_DELETED" {
                    return Ok(EdlConfig::disabled());
                }
            }

            if status == StatusCode::GONE {
                return Err(ControlError::Permanent {
                    status: status.as_u16(),
                    message: body,
                });
            }
            return Err(ControlError::Status {
                status: status.as_u16(),
                body,
            });
        }

        if !status.is_success() {
            let body = truncated_body(response).await;
            return Err(ControlError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let mut config: EdlConfig = response.json().await?;
        // A config the control plane serves normally is an enabled one.
        config.enabled = true;
        Ok(config)
    }
}
