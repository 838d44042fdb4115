//! Atomically-swappable IP set shared with the request hot path.

use std::net::IpAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::set::IpSet;

/// Thread-safe IP matcher over the currently published [`IpSet`].
///
/// A single writer (the EDL updater) replaces the set via [`Matcher::update`];
/// any number of readers call [`Matcher::contains`] without taking a lock.
/// The entry count is stored separately and may briefly lag a freshly
/// installed set; it feeds metrics and health output, never decisions.
#[derive(Debug)]
pub struct Matcher {
    set: ArcSwap<IpSet>,
    count: AtomicI64,
}

impl Matcher {
    /// Creates a matcher holding an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            set: ArcSwap::from_pointee(IpSet::empty()),
            count: AtomicI64::new(0),
        }
    }

    /// Checks whether the address is in the current set.
    ///
    /// Lock-free and allocation-free; safe to call from every request.
    #[must_use]
    pub fn contains(&self, addr: IpAddr) -> bool {
        self.set.load().contains(addr)
    }

    /// Atomically installs a new set, then the new entry count.
    ///
    /// Readers observe either the previous complete set or the new complete
    /// set, never a mix. The prior generation is dropped once the last
    /// in-flight reader releases it.
    pub fn update(&self, set: IpSet, count: i64) {
        self.set.store(Arc::new(set));
        self.count.store(count, Ordering::Release);
    }

    /// Number of feed entries behind the current set.
    #[must_use]
    pub fn count(&self) -> i64 {
        self.count.load(Ordering::Acquire)
    }
}

impl Default for Matcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::set::IpSetBuilder;
    use std::sync::Arc;
    use std::thread;

    fn addr(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn set_of(prefixes: &[&str]) -> IpSet {
        let mut builder = IpSetBuilder::new();
        for p in prefixes {
            builder.add_prefix(p.parse().unwrap());
        }
        builder.build()
    }

    #[test]
    fn test_matcher_starts_empty() {
        let matcher = Matcher::new();

        assert_eq!(matcher.count(), 0);
        assert!(!matcher.contains(addr("10.0.0.1")));
    }

    #[test]
    fn test_matcher_update_and_contains() {
        let matcher = Matcher::new();
        matcher.update(set_of(&["10.0.0.0/8"]), 1);

        assert!(matcher.contains(addr("10.1.2.3")));
        assert!(!matcher.contains(addr("192.168.1.1")));
        assert_eq!(matcher.count(), 1);
    }

    #[test]
    fn test_matcher_hot_swap_replaces_whole_set() {
        let matcher = Matcher::new();
        matcher.update(set_of(&["10.0.0.0/8"]), 1);
        assert!(matcher.contains(addr("10.0.0.1")));

        matcher.update(set_of(&["192.168.0.0/16"]), 1);

        // The old set must be fully gone, the new one fully visible.
        assert!(!matcher.contains(addr("10.0.0.1")));
        assert!(matcher.contains(addr("192.168.1.1")));
    }

    #[test]
    fn test_matcher_update_to_empty() {
        let matcher = Matcher::new();
        matcher.update(set_of(&["10.0.0.0/8"]), 1);
        matcher.update(IpSet::empty(), 0);

        assert!(!matcher.contains(addr("10.0.0.1")));
        assert_eq!(matcher.count(), 0);
    }

    #[test]
    fn test_matcher_concurrent_readers_never_see_torn_set() {
        // Both generations cover the sentinel prefix; only a torn or empty
        // intermediate set could make the sentinel probe fail mid-swap.
        let gen_a = || set_of(&["203.0.113.0/24", "10.0.0.0/8"]);
        let gen_b = || set_of(&["203.0.113.0/24", "192.168.0.0/16"]);

        let matcher = Arc::new(Matcher::new());
        matcher.update(gen_a(), 2);

        let mut handles = Vec::new();
        for _ in 0..4 {
            let m = Arc::clone(&matcher);
            handles.push(thread::spawn(move || {
                for _ in 0..10_000 {
                    assert!(
                        m.contains(addr("203.0.113.5")),
                        "reader observed an incomplete set"
                    );
                }
            }));
        }

        let writer = Arc::clone(&matcher);
        let writer_handle = thread::spawn(move || {
            for i in 0..1_000 {
                if i % 2 == 0 {
                    writer.update(gen_b(), 2);
                } else {
                    writer.update(gen_a(), 2);
                }
            }
        });

        for handle in handles {
            handle.join().unwrap();
        }
        writer_handle.join().unwrap();
    }

    #[test]
    fn test_matcher_default() {
        let matcher = Matcher::default();
        assert_eq!(matcher.count(), 0);
    }
}
