//! Error types for the feed pipeline.

use thiserror::Error;

/// Errors from fetching or publishing the EDL.
#[derive(Debug, Error)]
pub enum FeedError {
    /// The HTTP request failed.
    #[error("feed request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The feed endpoint answered with a non-2xx status.
    #[error("unexpected feed status ({status}): {body}")]
    Status {
        /// HTTP status returned.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// The operation was cancelled by shutdown.
    #[error("feed update cancelled")]
    Cancelled,
}

/// Result type for feed operations.
pub type FeedResult<T> = Result<T, FeedError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_display() {
        let err = FeedError::Status {
            status: 502,
            body: "bad gateway".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("502"));
        assert!(msg.contains("bad gateway"));
    }

    #[test]
    fn test_cancelled_display() {
        assert!(FeedError::Cancelled.to_string().contains("cancelled"));
    }
}
