//! # wardend
//!
//! The forward-auth sidecar daemon.
//!
//! A reverse proxy forwards each incoming request here and gets a 200
//! (allow) or 403 (deny) back, decided by matching the client IP against a
//! remotely-managed External Dynamic List. The daemon bootstraps against the
//! control plane, keeps the list fresh in the background, ships deny events,
//! and exposes health, readiness, and Prometheus surfaces.
//!
//! Any inability to enforce policy collapses to allowing traffic, never to
//! denying it.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod config;
pub mod env;
pub mod error;
pub mod health;
pub mod routes;
pub mod server;
pub mod state;
pub mod version;

pub use config::RuntimeConfig;
pub use env::EnvConfig;
pub use error::{DaemonError, DaemonResult};
pub use state::AppState;
