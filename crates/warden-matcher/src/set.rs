//! Immutable IP set built from CIDR prefixes and single addresses.

use std::net::IpAddr;

use ipnet::IpNet;

/// Inclusive address range over the integer form of an address family.
type Range<T> = (T, T);

/// An immutable set of IPv4/IPv6 addresses supporting point membership.
///
/// Internally the set keeps two sorted, coalesced range tables (one per
/// family), so lookups are a binary search and the structure is safe to share
/// behind an atomic pointer without further locking.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IpSet {
    v4: Vec<Range<u32>>,
    v6: Vec<Range<u128>>,
}

impl IpSet {
    /// Returns an empty set.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Checks whether the given address is covered by the set.
    #[must_use]
    pub fn contains(&self, addr: IpAddr) -> bool {
        match addr {
            IpAddr::V4(a) => range_contains(&self.v4, u32::from(a)),
            IpAddr::V6(a) => range_contains(&self.v6, u128::from(a)),
        }
    }

    /// Number of coalesced ranges held by the set.
    ///
    /// This is a structural measure, not the number of feed entries; adjacent
    /// and overlapping prefixes merge into a single range.
    #[must_use]
    pub fn range_count(&self) -> usize {
        self.v4.len() + self.v6.len()
    }

    /// True when the set covers no addresses.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.v4.is_empty() && self.v6.is_empty()
    }
}

/// Binary search over sorted, non-overlapping inclusive ranges.
fn range_contains<T: Copy + Ord>(ranges: &[Range<T>], value: T) -> bool {
    let idx = ranges.partition_point(|&(start, _)| start <= value);
    if idx == 0 {
        return false;
    }
    let (_, end) = ranges[idx - 1];
    value <= end
}

/// Builder accumulating prefixes and addresses into an [`IpSet`].
#[derive(Debug, Default)]
pub struct IpSetBuilder {
    v4: Vec<Range<u32>>,
    v6: Vec<Range<u128>>,
}

impl IpSetBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds all addresses covered by a CIDR prefix.
    pub fn add_prefix(&mut self, prefix: IpNet) {
        match prefix {
            IpNet::V4(p) => {
                self.v4
                    .push((u32::from(p.network()), u32::from(p.broadcast())));
            }
            IpNet::V6(p) => {
                self.v6
                    .push((u128::from(p.network()), u128::from(p.broadcast())));
            }
        }
    }

    /// Adds a single address (equivalent to a host prefix).
    pub fn add_addr(&mut self, addr: IpAddr) {
        match addr {
            IpAddr::V4(a) => {
                let v = u32::from(a);
                self.v4.push((v, v));
            }
            IpAddr::V6(a) => {
                let v = u128::from(a);
                self.v6.push((v, v));
            }
        }
    }

    /// Sorts and merges the accumulated ranges into an immutable set.
    #[must_use]
    pub fn build(self) -> IpSet {
        IpSet {
            v4: coalesce(self.v4),
            v6: coalesce(self.v6),
        }
    }
}

/// Sorts ranges by start and merges overlapping or adjacent entries.
fn coalesce<T: Copy + Ord + Successor>(mut ranges: Vec<Range<T>>) -> Vec<Range<T>> {
    if ranges.is_empty() {
        return ranges;
    }

    ranges.sort_unstable();

    let mut merged: Vec<Range<T>> = Vec::with_capacity(ranges.len());
    for (start, end) in ranges {
        match merged.last_mut() {
            // Extend when the next range overlaps or directly abuts.
            Some((_, prev_end)) if start <= prev_end.successor_or_max() => {
                if end > *prev_end {
                    *prev_end = end;
                }
            }
            _ => merged.push((start, end)),
        }
    }

    merged.shrink_to_fit();
    merged
}

/// Saturating increment used when testing range adjacency.
trait Successor: Sized {
    fn successor_or_max(self) -> Self;
}

impl Successor for u32 {
    fn successor_or_max(self) -> Self {
        self.saturating_add(1)
    }
}

impl Successor for u128 {
    fn successor_or_max(self) -> Self {
        self.saturating_add(1)
    }
}
