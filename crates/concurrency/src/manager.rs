//! Commit manager for units of work
//!
//! Provides atomic commit by orchestrating:
//! 1. Validation (first-committer-wins)
//! 2. Storage application at the commit timestamp (visibility)
//!
//! ## Commit Sequence
//!
//! ```text
//! 1. Acquire commit lock
//! 2. Reject a commit timestamp older than retained history
//! 3. For every staged write, compare the newest committed version of the
//!    document with the one observed when the write was staged
//! 4. IF any differ: return WriteConflict, nothing applied
//! 5. Apply all writes to storage at the commit timestamp
//! 6. Release commit lock
//! ```

use crate::write_unit::WriteUnit;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tidemark_core::{Error, Result, Timestamp};
use tidemark_storage::{HistoryTracker, RecordStore};

/// Manages atomic commits of write units
///
/// All writes in a unit become visible at one timestamp, or none do.
///
/// # Thread Safety
///
/// Validation and apply run under one lock, so no other unit can commit
/// between the conflict check and the write.
pub struct CommitManager {
    store: Arc<RecordStore>,
    history: HistoryTracker,

    /// Number of units committed
    commits: AtomicU64,

    /// Commit serialization lock
    ///
    /// Makes validate → apply atomic with respect to other commits.
    commit_lock: Mutex<()>,
}

impl CommitManager {
    /// Create a commit manager over `store`
    pub fn new(store: Arc<RecordStore>, history: HistoryTracker) -> Self {
        Self {
            store,
            history,
            commits: AtomicU64::new(0),
            commit_lock: Mutex::new(()),
        }
    }

    /// Underlying record store
    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    /// History tracker shared with readers
    pub fn history(&self) -> &HistoryTracker {
        &self.history
    }

    /// Number of units committed so far
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    /// Commit a unit at `timestamp`
    ///
    /// `None` (or `Timestamp::NULL`) commits untimestamped.
    /// Concurrent readers see every write of the unit or none of them.
    ///
    /// # Errors
    ///
    /// - `BadValue` if the timestamp is older than retained history
    /// - `WriteConflict` if another unit committed over a document this
    ///   unit touched after it was staged
    /// - `NamespaceNotFound` if a target table no longer exists
    pub fn commit(&self, unit: WriteUnit, timestamp: Option<Timestamp>) -> Result<()> {
        if unit.is_empty() {
            return Ok(());
        }
        let timestamp = timestamp.and_then(Timestamp::non_null);

        let _commit_guard = self.commit_lock.lock();

        if let Some(ts) = timestamp {
            let oldest = self.history.oldest_timestamp();
            if ts < oldest {
                return Err(Error::BadValue(format!(
                    "commit timestamp {} is older than the oldest timestamp {}",
                    ts, oldest
                )));
            }
        }

        self.validate(&unit)?;

        let writes = unit
            .into_writes()
            .into_iter()
            .map(|pending| pending.write)
            .collect();
        self.store.apply(writes, timestamp)?;
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn validate(&self, unit: &WriteUnit) -> Result<()> {
        for pending in unit.writes() {
            let current = self
                .store
                .latest_timestamp(&pending.write.ident, &pending.write.key);
            if current != pending.observed {
                tracing::debug!(
                    ident = %pending.write.ident,
                    key = %pending.write.key,
                    "commit rejected: document changed since it was staged"
                );
                return Err(Error::WriteConflict(format!(
                    "document {} in {} was modified concurrently",
                    pending.write.key, pending.write.ident
                )));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for CommitManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitManager")
            .field("commits", &self.commit_count())
            .finish()
    }
}
