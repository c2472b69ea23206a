//! In-memory replicated log
//!
//! Entries are appended by [`OplogObserver`] for every replicated
//! notification. Each entry carries a wall-clock time and an xxh3 hash of
//! its serialized operation.

use crate::observer::{ApplyOpsNotification, OpObserver, OperationNotification};
use crate::operation::Operation;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use tidemark_core::{OpTime, Timestamp};
use xxhash_rust::xxh3::xxh3_64;

/// One log entry
#[derive(Debug, Clone, PartialEq)]
pub struct OplogEntry {
    /// Position in the log
    pub optime: OpTime,
    /// Wall-clock time of the append
    pub wall: DateTime<Utc>,
    /// Hash of the serialized operation
    pub hash: i64,
    /// The logged operation
    pub operation: Operation,
}

impl OplogEntry {
    /// Build an entry, stamping the operation with `optime`
    pub fn new(mut operation: Operation, optime: OpTime) -> Self {
        operation.timestamp = Some(optime.timestamp);
        operation.term = Some(optime.term);
        operation.hash = None;
        let hash = serde_json::to_vec(&operation)
            .map(|bytes| xxh3_64(&bytes) as i64)
            .unwrap_or_default();
        operation.hash = Some(hash);
        Self {
            optime,
            wall: Utc::now(),
            hash,
            operation,
        }
    }
}

/// Append-only log of replicated operations
#[derive(Debug, Default)]
pub struct Oplog {
    entries: RwLock<Vec<OplogEntry>>,
}

impl Oplog {
    /// Empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry
    pub fn append(&self, entry: OplogEntry) {
        tracing::trace!(optime = %entry.optime, op = entry.operation.kind_name(), "oplog append");
        self.entries.write().push(entry);
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True if nothing was logged
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// All entries in append order
    pub fn entries(&self) -> Vec<OplogEntry> {
        self.entries.read().clone()
    }

    /// Newest entry
    pub fn last(&self) -> Option<OplogEntry> {
        self.entries.read().last().cloned()
    }

    /// Entries with timestamp `>= ts`
    pub fn entries_since(&self, ts: Timestamp) -> Vec<OplogEntry> {
        self.entries
            .read()
            .iter()
            .filter(|e| e.optime.timestamp >= ts)
            .cloned()
            .collect()
    }

    /// Drop entries with timestamp `> ts`
    ///
    /// Returns the number removed.
    pub fn truncate_after(&self, ts: Timestamp) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| e.optime.timestamp <= ts);
        before - entries.len()
    }
}

/// Observer that logs replicated notifications
#[derive(Debug, Clone)]
pub struct OplogObserver {
    oplog: Arc<Oplog>,
}

impl OplogObserver {
    /// Observer appending to `oplog`
    pub fn new(oplog: Arc<Oplog>) -> Self {
        Self { oplog }
    }
}

impl OpObserver for OplogObserver {
    fn on_operation(&self, notification: &OperationNotification) {
        if notification.replicated {
            self.oplog.append(OplogEntry::new(
                notification.operation.clone(),
                notification.optime,
            ));
        }
    }

    fn on_apply_ops(&self, notification: &ApplyOpsNotification) {
        if notification.replicated {
            self.oplog
                .append(OplogEntry::new(notification.to_operation(), notification.optime));
        }
    }
}
