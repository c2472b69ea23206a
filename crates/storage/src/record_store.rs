//! Multi-version record store
//!
//! One shard per ident, each an FxHashMap from document key to its
//! version chain.
//!
//! # Design
//!
//! - DashMap: sharded by ident, lock-free reads
//! - FxHashMap: O(1) key lookups inside a table
//! - Per-ident: tables never contend with each other
//!
//! Scans collect and sort by record id, so results come back in insertion
//! order regardless of hash layout.
//!
//! A batch applied with [`RecordStore::apply`] becomes visible to readers all
//! at once: batch writes hold the visibility gate exclusively and every read
//! holds it shared.

use crate::version::VersionChain;
use dashmap::DashMap;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tidemark_core::{DocKey, Document, Error, Ident, ReadContext, Result, Timestamp};

/// Per-ident table
#[derive(Debug, Default)]
pub struct Shard {
    pub(crate) data: FxHashMap<DocKey, VersionChain>,
    next_record_id: u64,
}

impl Shard {
    /// Create a new empty shard
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys with retained history
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if shard is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn chain_mut(&mut self, key: DocKey) -> &mut VersionChain {
        let next = &mut self.next_record_id;
        self.data.entry(key).or_insert_with(|| {
            let chain = VersionChain::new(*next);
            *next += 1;
            chain
        })
    }
}

/// A single staged change, applied by [`RecordStore::apply`]
#[derive(Debug, Clone)]
pub struct RecordWrite {
    /// Target table
    pub ident: Ident,
    /// Target document
    pub key: DocKey,
    /// New body, `None` to delete
    pub document: Option<Document>,
}

/// Sharded multi-version store - DashMap by ident, FxHashMap within
///
/// # Thread Safety
///
/// All operations are thread-safe. Reads take a shard read guard; writes
/// lock only the target ident's shard. Callers that need several writes
/// to land together serialize through the commit manager, which applies
/// them as one batch.
pub struct RecordStore {
    shards: DashMap<Ident, Shard>,

    /// Shared by reads, exclusive while a write or batch lands
    ///
    /// Always taken before any shard guard.
    visibility: RwLock<()>,
}

impl RecordStore {
    /// Create new record store
    pub fn new() -> Self {
        Self {
            shards: DashMap::new(),
            visibility: RwLock::new(()),
        }
    }

    /// Create the table for an ident; no-op if it exists
    pub fn create_ident(&self, ident: &Ident) {
        self.shards.entry(ident.clone()).or_default();
    }

    /// Physically discard a table
    ///
    /// Returns true if the ident existed.
    pub fn drop_ident(&self, ident: &Ident) -> bool {
        self.shards.remove(ident).is_some()
    }

    /// Check if a table exists
    pub fn has_ident(&self, ident: &Ident) -> bool {
        self.shards.contains_key(ident)
    }

    /// Get number of tables
    pub fn ident_count(&self) -> usize {
        self.shards.len()
    }

    /// Get total number of keys across all tables
    pub fn total_entries(&self) -> usize {
        self.shards.iter().map(|entry| entry.value().len()).sum()
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Document under `key` as seen by `ctx`
    #[inline]
    pub fn get(&self, ident: &Ident, key: &DocKey, ctx: &ReadContext) -> Option<Arc<Document>> {
        let _visible = self.visibility.read();
        self.shards
            .get(ident)
            .and_then(|shard| shard.data.get(key).and_then(|chain| chain.read(ctx)))
    }

    /// Timestamp of the newest version of `key`, tombstones included
    pub fn latest_timestamp(&self, ident: &Ident, key: &DocKey) -> Option<Timestamp> {
        let _visible = self.visibility.read();
        self.shards
            .get(ident)
            .and_then(|shard| shard.data.get(key).and_then(VersionChain::latest_timestamp))
    }

    /// Timestamps of every retained version of `key`, oldest first
    ///
    /// An untimestamped version reports `Timestamp::NULL`.
    pub fn version_timestamps(&self, ident: &Ident, key: &DocKey) -> Vec<Timestamp> {
        let _visible = self.visibility.read();
        self.shards
            .get(ident)
            .and_then(|shard| shard.data.get(key).map(VersionChain::timestamps))
            .unwrap_or_default()
    }

    /// All documents visible in `ctx`, in insertion order
    ///
    /// NOTE: Requires collect + sort. Not on the write path.
    pub fn scan(&self, ident: &Ident, ctx: &ReadContext) -> Vec<Arc<Document>> {
        let _visible = self.visibility.read();
        self.shards
            .get(ident)
            .map(|shard| {
                let mut results: Vec<_> = shard
                    .data
                    .values()
                    .filter_map(|chain| chain.read(ctx).map(|doc| (chain.record_id(), doc)))
                    .collect();

                results.sort_by_key(|(record_id, _)| *record_id);
                results.into_iter().map(|(_, doc)| doc).collect()
            })
            .unwrap_or_default()
    }

    /// Number of documents visible in `ctx`
    pub fn count(&self, ident: &Ident, ctx: &ReadContext) -> usize {
        let _visible = self.visibility.read();
        self.shards
            .get(ident)
            .map(|shard| {
                shard
                    .data
                    .values()
                    .filter(|chain| chain.read(ctx).is_some())
                    .count()
            })
            .unwrap_or(0)
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Write one version
    ///
    /// `timestamp = None` is an untimestamped write.
    pub fn write(
        &self,
        ident: &Ident,
        key: DocKey,
        timestamp: Option<Timestamp>,
        document: Option<Document>,
    ) -> Result<()> {
        let _visible = self.visibility.write();
        self.write_locked(ident, key, timestamp, document)
    }

    fn write_locked(
        &self,
        ident: &Ident,
        key: DocKey,
        timestamp: Option<Timestamp>,
        document: Option<Document>,
    ) -> Result<()> {
        let mut shard = self
            .shards
            .get_mut(ident)
            .ok_or_else(|| Error::NamespaceNotFound(format!("no table for ident {}", ident)))?;
        shard.chain_mut(key).write(timestamp, document);
        Ok(())
    }

    /// Apply a batch of writes at one timestamp
    ///
    /// Every target ident is checked before anything is written, so a
    /// missing table leaves the store untouched. Readers see either none of
    /// the batch or all of it.
    pub fn apply(&self, writes: Vec<RecordWrite>, timestamp: Option<Timestamp>) -> Result<()> {
        let _visible = self.visibility.write();
        if let Some(missing) = writes.iter().find(|w| !self.has_ident(&w.ident)) {
            return Err(Error::NamespaceNotFound(format!(
                "no table for ident {}",
                missing.ident
            )));
        }
        for write in writes {
            self.write_locked(&write.ident, write.key, timestamp, write.document)?;
        }
        Ok(())
    }

    /// Discard versions older than `oldest` that no reader can observe
    ///
    /// Returns the number of versions removed.
    pub fn prune(&self, oldest: Timestamp) -> usize {
        let _visible = self.visibility.write();
        let mut removed = 0;
        for mut shard in self.shards.iter_mut() {
            shard.data.retain(|_, chain| {
                removed += chain.prune(oldest);
                !chain.is_empty()
            });
        }
        if removed > 0 {
            tracing::debug!(oldest = %oldest, removed, "pruned record versions");
        }
        removed
    }
}

impl Default for RecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("ident_count", &self.ident_count())
            .field("total_entries", &self.total_entries())
            .finish()
    }
}
