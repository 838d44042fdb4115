//! Error types for control-plane operations.

use thiserror::Error;

/// Errors from bootstrap, token refresh, and config fetching.
#[derive(Debug, Error)]
pub enum ControlError {
    /// The control plane reported an unrecoverable condition (HTTP 410).
    ///
    /// Callers must stop retrying and latch into allow-all mode.
    #[error("permanent error ({status}): {message}")]
    Permanent {
        /// HTTP status that signalled the condition.
        status: u16,
        /// Response body, truncated.
        message: String,
    },

    /// The bootstrap token could not be parsed as a JWT.
    #[error("failed to parse bootstrap token: {0}")]
    InvalidBootstrapToken(String),

    /// A required bootstrap-token claim is absent or empty.
    #[error("bootstrap token missing {0}")]
    MissingClaim(&'static str),

    /// No config URL is available yet.
    #[error("config URL not available")]
    MissingConfigUrl,

    /// No access token is currently held.
    #[error("no access token available")]
    MissingToken,

    /// The HTTP request itself failed.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The control plane answered with an unexpected status.
    #[error("unexpected response ({status}): {body}")]
    Status {
        /// HTTP status returned.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// A response body could not be decoded.
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    /// A forced refresh did not finish within its budget.
    #[error("token refresh timed out")]
    RefreshTimeout,
}

impl ControlError {
    /// True for errors that must never be retried.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent { .. })
    }
}

/// Result type for control-plane operations.
pub type ControlResult<T> = Result<T, ControlError>;
