//! Per-document version chains
//!
//! A chain holds every retained version of one document, oldest first.
//! A version with no document is a tombstone (the document was deleted at
//! that timestamp).

use std::sync::Arc;
use tidemark_core::{Document, ReadContext, Timestamp};

/// One retained version
#[derive(Debug, Clone)]
pub struct Version {
    /// Commit timestamp; `NULL` for untimestamped writes
    pub timestamp: Timestamp,
    /// Document body, `None` for a tombstone
    pub document: Option<Arc<Document>>,
}

/// Ordered history of one document
#[derive(Debug, Clone)]
pub struct VersionChain {
    /// Insertion order of the record within its table
    record_id: u64,
    versions: Vec<Version>,
}

impl VersionChain {
    /// Create an empty chain
    pub fn new(record_id: u64) -> Self {
        Self {
            record_id,
            versions: Vec::new(),
        }
    }

    /// Insertion order of the record
    pub fn record_id(&self) -> u64 {
        self.record_id
    }

    /// Number of retained versions
    pub fn len(&self) -> usize {
        self.versions.len()
    }

    /// True if nothing is retained
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// Record a write
    ///
    /// `None` is an untimestamped write: it replaces the whole history with
    /// a single version visible at every read timestamp. A write at a
    /// timestamp already present replaces that version.
    pub fn write(&mut self, timestamp: Option<Timestamp>, document: Option<Document>) {
        let document = document.map(Arc::new);
        let Some(ts) = timestamp.and_then(Timestamp::non_null) else {
            self.versions.clear();
            self.versions.push(Version {
                timestamp: Timestamp::NULL,
                document,
            });
            return;
        };

        match self.versions.binary_search_by(|v| v.timestamp.cmp(&ts)) {
            Ok(pos) => self.versions[pos].document = document,
            Err(pos) => self.versions.insert(
                pos,
                Version {
                    timestamp: ts,
                    document,
                },
            ),
        }
    }

    /// Newest version visible in `ctx`
    pub fn visible(&self, ctx: &ReadContext) -> Option<&Version> {
        self.versions.iter().rev().find(|v| ctx.sees(v.timestamp))
    }

    /// Document visible in `ctx`, if it exists there
    pub fn read(&self, ctx: &ReadContext) -> Option<Arc<Document>> {
        self.visible(ctx).and_then(|v| v.document.clone())
    }

    /// Timestamps of every retained version, oldest first
    pub fn timestamps(&self) -> Vec<Timestamp> {
        self.versions.iter().map(|v| v.timestamp).collect()
    }

    /// Timestamp of the newest version, tombstones included
    pub fn latest_timestamp(&self) -> Option<Timestamp> {
        self.versions.last().map(|v| v.timestamp)
    }

    /// Drop versions no reader at or after `oldest` can observe
    ///
    /// Keeps the newest version at or before `oldest` plus everything
    /// newer. A chain left holding only a tombstone is emptied. Returns the
    /// number of versions removed.
    pub fn prune(&mut self, oldest: Timestamp) -> usize {
        let base = self.versions.iter().rposition(|v| v.timestamp <= oldest);
        let mut removed = 0;
        if let Some(base) = base {
            if base > 0 {
                self.versions.drain(..base);
                removed += base;
            }
        }
        if self.versions.len() == 1
            && self.versions[0].document.is_none()
            && self.versions[0].timestamp <= oldest
        {
            self.versions.clear();
            removed += 1;
        }
        removed
    }
}
