//! Daemon-level errors.

use std::net::SocketAddr;

use thiserror::Error;
use warden_control::ControlError;
use warden_feed::FeedError;

/// Fatal startup and server errors.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// The required bootstrap token was not provided.
    #[error("ELLIO_BOOTSTRAP token is required")]
    MissingBootstrapToken,

    /// The initial bootstrap exchange failed non-permanently.
    #[error("failed to bootstrap: {0}")]
    Bootstrap(#[source] ControlError),

    /// Fetching the EDL configuration failed non-permanently.
    #[error("failed to fetch EDL config: {0}")]
    ConfigFetch(#[source] ControlError),

    /// The initial EDL download failed; no policy was ever loaded.
    #[error("initial EDL fetch failed: {0}")]
    InitialFetch(#[from] FeedError),

    /// A listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// The address that could not be bound.
        addr: SocketAddr,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The HTTP server failed while running.
    #[error("server error: {0}")]
    Server(#[from] std::io::Error),
}

/// Result type for daemon operations.
pub type DaemonResult<T> = Result<T, DaemonError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_token_display() {
        assert!(DaemonError::MissingBootstrapToken
            .to_string()
            .contains("ELLIO_BOOTSTRAP"));
    }

    #[test]
    fn test_bootstrap_error_wraps_source() {
        let err = DaemonError::Bootstrap(ControlError::MissingToken);
        assert!(err.to_string().contains("failed to bootstrap"));
    }
}
