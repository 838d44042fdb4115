//! # warden-matcher
//!
//! Immutable IP set with a lock-free matcher for the request hot path.
//!
//! The EDL pipeline builds an [`IpSet`] from the fetched feed and publishes it
//! through [`Matcher::update`]. Request handlers call [`Matcher::contains`],
//! which never blocks and never allocates: the current set is an atomic
//! pointer swap away, and membership is a binary search over sorted,
//! coalesced address ranges.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod matcher;
pub mod set;

pub use matcher::Matcher;
pub use set::{IpSet, IpSetBuilder};
