//! Logical clock
//!
//! Issues strictly increasing timestamps. Reservations are a single
//! `fetch_add`, so concurrent callers never receive overlapping ranges.

use std::sync::atomic::{AtomicU64, Ordering};
use tidemark_core::{Error, Result, Timestamp};

/// Process-scoped logical clock
///
/// The clock holds the last issued (or observed) cluster time. Must
/// outlive every operation context that reserves from it.
#[derive(Debug)]
pub struct LogicalClock {
    /// Last issued cluster time
    time: AtomicU64,
}

impl LogicalClock {
    /// Create a clock whose cluster time starts at `initial`
    pub fn new(initial: Timestamp) -> Self {
        Self {
            time: AtomicU64::new(initial.as_u64()),
        }
    }

    /// Current cluster time, without advancing
    pub fn get_cluster_time(&self) -> Timestamp {
        Timestamp::new(self.time.load(Ordering::SeqCst))
    }

    /// Reserve `n` unused ticks and return the first
    ///
    /// The reserved range is `first ..= first.add_ticks(n - 1)`.
    ///
    /// # Examples
    ///
    /// ```
    /// use tidemark_concurrency::LogicalClock;
    /// use tidemark_core::Timestamp;
    ///
    /// let clock = LogicalClock::new(Timestamp::new(1));
    /// let first = clock.reserve_ticks(3).unwrap();
    /// assert_eq!(first, Timestamp::new(2));
    /// assert_eq!(clock.get_cluster_time(), Timestamp::new(4));
    /// ```
    pub fn reserve_ticks(&self, n: u64) -> Result<Timestamp> {
        if n == 0 {
            return Err(Error::BadValue("cannot reserve zero ticks".into()));
        }
        let previous = self.time.fetch_add(n, Ordering::SeqCst);
        Ok(Timestamp::new(previous + 1))
    }

    /// Advance the cluster time to at least `ts`
    ///
    /// Returns the cluster time after the call.
    pub fn advance_cluster_time(&self, ts: Timestamp) -> Timestamp {
        let previous = self.time.fetch_max(ts.as_u64(), Ordering::SeqCst);
        Timestamp::new(previous.max(ts.as_u64()))
    }
}

impl Default for LogicalClock {
    fn default() -> Self {
        Self::new(Timestamp::MIN)
    }
}
