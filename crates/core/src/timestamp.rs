//! Logical timestamps and read selection
//!
//! This module defines the time axis every versioned structure is keyed on:
//! - [`Timestamp`]: totally ordered logical time
//! - [`OpTime`]: (timestamp, term) pair ordering oplog entries
//! - [`ReadTimestamp`]: what a caller asks to read at
//! - [`ReadContext`]: the resolved view passed to every storage accessor

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Logical timestamp
///
/// `Timestamp::NULL` is the unset value. Writes carrying it are
/// untimestamped and visible at every read. `Timestamp::MIN` is the
/// earliest assignable instant ("beginning of time").
///
/// # Examples
///
/// ```
/// use tidemark_core::Timestamp;
///
/// let t = Timestamp::new(5);
/// assert!(t > Timestamp::MIN);
/// assert_eq!(t.add_ticks(2), Timestamp::new(7));
/// assert!(Timestamp::NULL.is_null());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The unset timestamp
    pub const NULL: Timestamp = Timestamp(0);

    /// The earliest assignable timestamp
    pub const MIN: Timestamp = Timestamp(1);

    /// The largest representable timestamp
    pub const MAX: Timestamp = Timestamp(u64::MAX);

    /// Create a timestamp from its raw value
    pub const fn new(value: u64) -> Self {
        Timestamp(value)
    }

    /// Raw value
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// True for [`Timestamp::NULL`]
    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Timestamp `n` ticks later (saturating)
    pub const fn add_ticks(&self, n: u64) -> Self {
        Timestamp(self.0.saturating_add(n))
    }

    /// `None` for the null timestamp, `Some(self)` otherwise
    pub fn non_null(self) -> Option<Timestamp> {
        if self.is_null() {
            None
        } else {
            Some(self)
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Timestamp {
    fn from(value: u64) -> Self {
        Timestamp(value)
    }
}

/// Position of an operation in the replicated log
///
/// Ordered by term first, then timestamp. The null optime has a null
/// timestamp and [`OpTime::UNINITIALIZED_TERM`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpTime {
    /// Timestamp of the operation
    #[serde(rename = "ts")]
    pub timestamp: Timestamp,
    /// Election term the operation was written in
    #[serde(rename = "t")]
    pub term: i64,
}

impl OpTime {
    /// Term of an optime that was never set
    pub const UNINITIALIZED_TERM: i64 = -1;

    /// Create a new optime
    pub const fn new(timestamp: Timestamp, term: i64) -> Self {
        OpTime { timestamp, term }
    }

    /// The null optime
    pub const fn null() -> Self {
        OpTime {
            timestamp: Timestamp::NULL,
            term: Self::UNINITIALIZED_TERM,
        }
    }

    /// True if both the timestamp is null and the term is uninitialized
    pub fn is_null(&self) -> bool {
        self.timestamp.is_null() && self.term == Self::UNINITIALIZED_TERM
    }
}

impl Default for OpTime {
    fn default() -> Self {
        Self::null()
    }
}

impl PartialOrd for OpTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OpTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.term
            .cmp(&other.term)
            .then_with(|| self.timestamp.cmp(&other.timestamp))
    }
}

impl fmt::Display for OpTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ ts: {}, t: {} }}", self.timestamp, self.term)
    }
}

/// What a reader asks to observe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadTimestamp {
    /// Newest committed state
    #[default]
    Latest,
    /// Oldest state the engine still retains
    Earliest,
    /// State as of the given timestamp
    At(Timestamp),
}

impl From<Timestamp> for ReadTimestamp {
    /// `NULL` means latest, `MIN` means earliest retained.
    fn from(ts: Timestamp) -> Self {
        if ts.is_null() {
            ReadTimestamp::Latest
        } else if ts == Timestamp::MIN {
            ReadTimestamp::Earliest
        } else {
            ReadTimestamp::At(ts)
        }
    }
}

/// Resolved read view
///
/// Passed by value to every timestamp-aware accessor. A version written
/// at `ts` is visible iff [`ReadContext::sees`] returns true for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadContext {
    /// See every committed version
    #[default]
    Latest,
    /// See versions written at or before the timestamp
    AsOf(Timestamp),
}

impl ReadContext {
    /// Read as of `ts`
    pub fn at(ts: impl Into<Timestamp>) -> Self {
        ReadContext::AsOf(ts.into())
    }

    /// Whether a version written at `ts` is visible in this view
    #[inline]
    pub fn sees(&self, ts: Timestamp) -> bool {
        match self {
            ReadContext::Latest => true,
            ReadContext::AsOf(read_ts) => ts <= *read_ts,
        }
    }

    /// The read timestamp, if bounded
    pub fn timestamp(&self) -> Option<Timestamp> {
        match self {
            ReadContext::Latest => None,
            ReadContext::AsOf(ts) => Some(*ts),
        }
    }
}
