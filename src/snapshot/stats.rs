//! Running counters for collector runs.
//!
//! Counters are updated with atomic adds from concurrent sweep callbacks
//! and read approximately: a snapshot taken while writers are active may
//! mix counts and byte sums from different instants. The collector only
//! snapshots them at quiescence.

use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

/// A (count, byte-sum) pair with atomic add.
#[derive(Debug, Default)]
pub struct CountSum {
    count: AtomicU32,
    sum: AtomicI64,
}

impl CountSum {
    /// Creates a zeroed counter.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            count: AtomicU32::new(0),
            sum: AtomicI64::new(0),
        }
    }

    /// Adds one occurrence of `bytes`, returning the new count and sum.
    pub fn add(&self, bytes: i64) -> (u32, i64) {
        let count = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        let sum = self.sum.fetch_add(bytes, Ordering::Relaxed) + bytes;
        (count, sum)
    }

    /// Reads the counter without synchronization.
    ///
    /// The two fields are loaded independently, so the result is only
    /// exact once writers have quiesced.
    #[must_use]
    pub fn approximate(&self) -> (u32, i64) {
        (
            self.count.load(Ordering::Relaxed),
            self.sum.load(Ordering::Relaxed),
        )
    }
}

/// Statistics from one collector run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GcStats {
    pub unused_count: u32,
    pub unused_bytes: i64,
    pub in_use_count: u32,
    pub in_use_bytes: i64,
    pub system_count: u32,
    pub system_bytes: i64,
    pub too_recent_count: u32,
    pub too_recent_bytes: i64,
    pub undeleted_count: u32,
    pub undeleted_bytes: i64,
}

impl fmt::Display for GcStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unused: {} ({} bytes), in use: {} ({} bytes), system: {} ({} bytes), \
             too recent: {} ({} bytes), undeleted: {} ({} bytes)",
            self.unused_count,
            self.unused_bytes,
            self.in_use_count,
            self.in_use_bytes,
            self.system_count,
            self.system_bytes,
            self.too_recent_count,
            self.too_recent_bytes,
            self.undeleted_count,
            self.undeleted_bytes,
        )
    }
}
