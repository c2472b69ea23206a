//! History retention and snapshot pins
//!
//! The engine keeps every version newer than the oldest retained
//! timestamp. An open snapshot pins its read timestamp; the oldest
//! timestamp never advances past the oldest pin, so a reader's view stays
//! intact until it releases the pin.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tidemark_core::{Error, Result, Timestamp};

#[derive(Debug, Default)]
struct HistoryState {
    oldest: Timestamp,
    pins: BTreeMap<Timestamp, usize>,
}

/// Tracks the oldest retained timestamp and open snapshot pins
///
/// Cheap to clone; clones share state.
#[derive(Debug, Clone, Default)]
pub struct HistoryTracker {
    state: Arc<Mutex<HistoryState>>,
}

impl HistoryTracker {
    /// Tracker retaining all history
    pub fn new() -> Self {
        Self::default()
    }

    /// Oldest timestamp still readable
    pub fn oldest_timestamp(&self) -> Timestamp {
        self.state.lock().oldest
    }

    /// Oldest pinned read timestamp, if any snapshot is open
    pub fn oldest_pinned(&self) -> Option<Timestamp> {
        self.state.lock().pins.keys().next().copied()
    }

    /// Number of open pins
    pub fn pin_count(&self) -> usize {
        self.state.lock().pins.values().sum()
    }

    /// Fail with `SnapshotTooOld` if `ts` is no longer retained
    pub fn check_readable(&self, ts: Timestamp) -> Result<()> {
        let oldest = self.state.lock().oldest;
        if ts < oldest {
            return Err(Error::SnapshotTooOld {
                requested: ts,
                oldest,
            });
        }
        Ok(())
    }

    /// Pin `ts` so history at it is retained until the pin drops
    pub fn pin(&self, ts: Timestamp) -> Result<SnapshotPin> {
        let mut state = self.state.lock();
        if ts < state.oldest {
            return Err(Error::SnapshotTooOld {
                requested: ts,
                oldest: state.oldest,
            });
        }
        *state.pins.entry(ts).or_insert(0) += 1;
        Ok(SnapshotPin {
            tracker: self.clone(),
            timestamp: ts,
        })
    }

    /// Advance the oldest retained timestamp
    ///
    /// The effective value is `min(requested, oldest pin)` and never moves
    /// backwards. Returns the effective oldest timestamp.
    pub fn set_oldest_timestamp(&self, requested: Timestamp) -> Timestamp {
        let mut state = self.state.lock();
        let bounded = match state.pins.keys().next() {
            Some(pinned) => requested.min(*pinned),
            None => requested,
        };
        if bounded > state.oldest {
            state.oldest = bounded;
        }
        state.oldest
    }

    fn release(&self, ts: Timestamp) {
        let mut state = self.state.lock();
        if let Some(count) = state.pins.get_mut(&ts) {
            *count -= 1;
            if *count == 0 {
                state.pins.remove(&ts);
            }
        }
    }
}

/// RAII pin on a read timestamp
///
/// Released on drop.
#[derive(Debug)]
pub struct SnapshotPin {
    tracker: HistoryTracker,
    timestamp: Timestamp,
}

impl SnapshotPin {
    /// Pinned timestamp
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }
}

impl Drop for SnapshotPin {
    fn drop(&mut self) {
        self.tracker.release(self.timestamp);
    }
}
