//! Bootstrap-token exchange against the control plane.

use std::time::Duration;

use jsonwebtoken::{DecodingKey, Validation};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::error::{ControlError, ControlResult};
use crate::machine;

const BOOTSTRAP_PATH: &str = "/api/v1/edl/bootstrap";
const BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(30);
const ERROR_BODY_LIMIT: usize = 1024;
const COMPONENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Scopes requested at bootstrap: config read plus log shipping.
const BOOTSTRAP_SCOPES: [&str; 2] = ["edl_config", "edl_logs"];

/// Claims embedded in the bootstrap token.
///
/// The signature is deliberately not verified here: the exchange itself is
/// the trust anchor, since the control plane rejects tokens it did not issue.
#[derive(Debug, Clone, Deserialize)]
pub struct BootstrapClaims {
    /// Issuer base URL; the bootstrap endpoint hangs off it.
    #[serde(default)]
    pub iss: String,
    /// Workspace owning the deployment.
    #[serde(default)]
    pub workspace_id: String,
    /// Deployment this sidecar instance belongs to.
    #[serde(default)]
    pub deployment_id: String,
    /// Component kind the token was minted for.
    #[serde(default)]
    pub component_type: String,
}

#[derive(Debug, Serialize)]
struct BootstrapRequest<'a> {
    bootstrap_token: &'a str,
    component_type: &'a str,
    component_version: &'a str,
    machine_id: &'a str,
    scopes: &'a [&'a str],
}

/// Successful bootstrap exchange.
#[derive(Debug, Clone, Deserialize)]
pub struct BootstrapResponse {
    /// Short-lived access token.
    pub access_token: String,
    /// Token lifetime in seconds.
    pub expires_in: u64,
    /// JWKS endpoint (unused by this component).
    #[serde(default)]
    pub jwks_url: String,
    /// Endpoint serving the EDL configuration.
    #[serde(default)]
    pub config_url: String,
    /// Endpoint accepting access-event batches.
    #[serde(default)]
    pub logs_url: String,
}

/// Decodes the bootstrap token claims without signature verification and
/// checks that the claims this component depends on are present.
///
/// # Errors
///
/// Returns [`ControlError::InvalidBootstrapToken`] when the token is not a
/// JWT and [`ControlError::MissingClaim`] when a required claim is empty.
pub fn decode_claims(token: &str) -> ControlResult<BootstrapClaims> {
    let header = jsonwebtoken::decode_header(token)
        .map_err(|err| ControlError::InvalidBootstrapToken(err.to_string()))?;

    let mut validation = Validation::new(header.alg);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let data = jsonwebtoken::decode::<BootstrapClaims>(
        token,
        &DecodingKey::from_secret(&[]),
        &validation,
    )
    .map_err(|err| ControlError::InvalidBootstrapToken(err.to_string()))?;

    let claims = data.claims;
    if claims.iss.is_empty() {
        return Err(ControlError::MissingClaim("issuer"));
    }
    if claims.component_type.is_empty() {
        return Err(ControlError::MissingClaim("component_type"));
    }
    if claims.deployment_id.is_empty() {
        return Err(ControlError::MissingClaim("deployment_id"));
    }

    Ok(claims)
}

/// HTTP client for the bootstrap exchange.
#[derive(Debug)]
pub struct BootstrapClient {
    client: reqwest::Client,
}

impl Default for BootstrapClient {
    fn default() -> Self {
        Self::new()
    }
}

impl BootstrapClient {
    /// Creates a client with the bootstrap timeout applied.
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(BOOTSTRAP_TIMEOUT)
                .build()
                .expect("failed to build bootstrap HTTP client"),
        }
    }

    /// Exchanges the bootstrap token for an access token and endpoint URLs.
    ///
    /// # Errors
    ///
    /// HTTP 410 maps to [`ControlError::Permanent`] (the deployment was
    /// deleted); any other non-2xx status is a retryable
    /// [`ControlError::Status`].
    pub async fn bootstrap(&self, bootstrap_token: &str) -> ControlResult<BootstrapResponse> {
        let claims = decode_claims(bootstrap_token)?;
        let machine_id = machine::device_id(&claims.deployment_id);

        let url = format!("{}{}", claims.iss.trim_end_matches('/'), BOOTSTRAP_PATH);
        let request = BootstrapRequest {
            bootstrap_token,
            component_type: &claims.component_type,
            component_version: COMPONENT_VERSION,
            machine_id: &machine_id,
            scopes: &BOOTSTRAP_SCOPES,
        };

        let response = self.client.post(&url).json(&request).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = truncated_body(response).await;

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

        Ok(response.json().await?)
    }
}

/// Reads a response body for error reporting, truncated.
pub(crate) async fn truncated_body(response: reqwest::Response) -> String {
    let body = response.text().await.unwrap_or_default();
    body.chars().take(ERROR_BODY_LIMIT).collect()
}
