//! Per-operation snapshot session
//!
//! An [`OperationContext`] binds reads to one chosen timestamp until the
//! snapshot is abandoned. Selecting a bounded timestamp pins it in the
//! [`HistoryTracker`], so an open snapshot holds back history reclamation.

use std::ops::{Deref, DerefMut};
use tidemark_core::{Error, ReadContext, ReadTimestamp, Result, Timestamp};
use tidemark_storage::{HistoryTracker, SnapshotPin};

#[derive(Debug)]
struct Snapshot {
    read: ReadContext,
    _pin: Option<SnapshotPin>,
}

/// Snapshot session for one logical operation
///
/// Not shared between threads; each caller opens its own.
#[derive(Debug)]
pub struct OperationContext {
    history: HistoryTracker,
    snapshot: Option<Snapshot>,
    replicated_writes: bool,
}

impl OperationContext {
    /// New context reading latest, with replicated writes enabled
    pub fn new(history: HistoryTracker) -> Self {
        Self {
            history,
            snapshot: None,
            replicated_writes: true,
        }
    }

    /// Bind subsequent reads to `read`
    ///
    /// `Timestamp::NULL` selects latest and `Timestamp::MIN` the earliest
    /// retained state. A previous selection must be abandoned first.
    ///
    /// # Errors
    ///
    /// - `IllegalOperation` if a snapshot is already selected
    /// - `SnapshotTooOld` if the timestamp is older than retained history
    pub fn select_snapshot(&mut self, read: impl Into<ReadTimestamp>) -> Result<()> {
        if self.snapshot.is_some() {
            return Err(Error::IllegalOperation(
                "snapshot already selected; abandon it before selecting another".into(),
            ));
        }
        let snapshot = match read.into() {
            ReadTimestamp::Latest => Snapshot {
                read: ReadContext::Latest,
                _pin: None,
            },
            ReadTimestamp::Earliest => {
                let ts = self.history.oldest_timestamp().max(Timestamp::MIN);
                self.pinned(ts)?
            }
            ReadTimestamp::At(ts) => self.pinned(ts)?,
        };
        self.snapshot = Some(snapshot);
        Ok(())
    }

    fn pinned(&self, ts: Timestamp) -> Result<Snapshot> {
        let pin = self.history.pin(ts)?;
        Ok(Snapshot {
            read: ReadContext::AsOf(ts),
            _pin: Some(pin),
        })
    }

    /// Release the current snapshot and its pin
    pub fn abandon_snapshot(&mut self) {
        self.snapshot = None;
    }

    /// True if a snapshot is selected
    pub fn has_snapshot(&self) -> bool {
        self.snapshot.is_some()
    }

    /// The view reads on this context observe
    pub fn read_context(&self) -> ReadContext {
        self.snapshot
            .as_ref()
            .map(|s| s.read)
            .unwrap_or(ReadContext::Latest)
    }

    /// Whether writes on this context are replicated
    pub fn writes_are_replicated(&self) -> bool {
        self.replicated_writes
    }

    /// Enable or disable replicated writes
    pub fn set_replicated_writes(&mut self, replicated: bool) {
        self.replicated_writes = replicated;
    }

    /// Disable replicated writes until the returned guard drops
    pub fn unreplicated_writes(&mut self) -> UnreplicatedWrites<'_> {
        let previous = self.replicated_writes;
        self.replicated_writes = false;
        UnreplicatedWrites {
            ctx: self,
            previous,
        }
    }
}

/// Scope in which writes are not replicated
///
/// Restores the previous setting on drop.
#[derive(Debug)]
pub struct UnreplicatedWrites<'a> {
    ctx: &'a mut OperationContext,
    previous: bool,
}

impl Deref for UnreplicatedWrites<'_> {
    type Target = OperationContext;

    fn deref(&self) -> &OperationContext {
        self.ctx
    }
}

impl DerefMut for UnreplicatedWrites<'_> {
    fn deref_mut(&mut self) -> &mut OperationContext {
        self.ctx
    }
}

impl Drop for UnreplicatedWrites<'_> {
    fn drop(&mut self) {
        self.ctx.replicated_writes = self.previous;
    }
}
