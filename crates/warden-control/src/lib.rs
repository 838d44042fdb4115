//! # warden-control
//!
//! Control-plane integration for the forward-auth sidecar.
//!
//! A long-lived bootstrap token (a signed JWT carrying the issuer URL and
//! deployment identity) is exchanged for a short-lived access token plus the
//! config and logs endpoints. The [`TokenManager`] keeps that token fresh in
//! the background and latches permanently when the control plane reports the
//! deployment as deleted — from then on the sidecar allows all traffic and
//! stops calling home.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod machine;
pub mod state;
pub mod token;

pub use bootstrap::{BootstrapClaims, BootstrapClient, BootstrapResponse};
pub use config::{ConfigClient, EdlConfig, EdlMode, EdlUrls};
pub use error::{ControlError, ControlResult};
pub use state::DeploymentState;
pub use token::TokenManager;
