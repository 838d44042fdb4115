//! Error types for event shipping.

use thiserror::Error;

/// Errors that can occur while shipping access events.
#[derive(Debug, Error)]
pub enum LogsError {
    /// The control plane has not provided a logs endpoint yet.
    #[error("logs URL not available")]
    MissingLogsUrl,

    /// No access token is currently held.
    #[error("access token not available")]
    MissingToken,

    /// An event could not be encoded as JSON.
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),

    /// The HTTP request itself failed.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The logs endpoint answered with a non-2xx status.
    #[error("server error ({status}): {body}")]
    Server {
        /// The HTTP status code returned.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// The worker did not exit within the shutdown budget.
    #[error("timeout waiting for log shipper to stop")]
    StopTimeout,
}

/// Result type for shipping operations.
pub type LogsResult<T> = Result<T, LogsError>;
