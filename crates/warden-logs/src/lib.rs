//! # warden-logs
//!
//! Asynchronous shipping of access-decision events to the control plane.
//!
//! The [`LogShipper`] accepts events from the request hot path without ever
//! blocking it: a bounded intake channel feeds a single worker that batches,
//! rate-limits through a [`LeakyBucket`], and POSTs newline-delimited JSON.
//! Events that cannot be accepted immediately spill into a bounded
//! [`RingBuffer`]; when that is full too, the event is dropped and counted.
//! Repeated delivery failures open a circuit breaker so the worker stops
//! hammering an unreachable endpoint.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bucket;
pub mod buffer;
pub mod collector;
pub mod error;
pub mod event;
pub mod shipper;

pub use bucket::LeakyBucket;
pub use buffer::RingBuffer;
pub use collector::MetricsCollector;
pub use error::{LogsError, LogsResult};
pub use event::AccessEvent;
pub use shipper::{LogShipper, ShipperConfig, ShipperCounters, TokenProvider};
