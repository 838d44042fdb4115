//! Derived deployment state.

use std::fmt;

/// Where the deployment currently stands with the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentState {
    /// Enabled and enforcing the EDL policy.
    Active,
    /// Explicitly disabled; traffic passes freely.
    Disabled,
    /// Permanently deleted (HTTP 410); terminal within a process.
    Deleted,
}

impl DeploymentState {
    /// Derives the state from the applied config and the deletion latch.
    #[must_use]
    pub const fn derive(deployment_enabled: bool, deployment_deleted: bool) -> Self {
        if deployment_enabled {
            Self::Active
        } else if deployment_deleted {
            Self::Deleted
        } else {
            Self::Disabled
        }
    }

    /// True when traffic is evaluated against the EDL.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }

    /// True when every request is allowed regardless of the EDL.
    #[must_use]
    pub const fn allows_all_traffic(self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Disabled => write!(f, "disabled"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}
