//! Storage interface
//!
//! Façade the replication layer writes through. It keeps the catalog and
//! the record store in step (every ident the catalog hands out gets a
//! table) and routes collection drops through the two-phase drop-pending
//! path when the drop is replicated and timestamped.
//!
//! Reads resolve a namespace in the given view. A [`CollectionHandle`]
//! binds to one physical collection instead, so it keeps answering for
//! that incarnation across renames and drops, gated by the catalog's view
//! of whether its ident existed at the read timestamp.

use std::sync::Arc;
use tidemark_catalog::{
    Catalog, CollectionEntry, CollectionOptions, DropDatabaseOutcome, DropPendingReaper, IndexSpec,
};
use tidemark_concurrency::{CommitManager, LogicalClock, WriteUnit};
use tidemark_core::{
    DocKey, Document, Error, Ident, Namespace, OpTime, ReadContext, Result, Timestamp,
};
use tidemark_storage::{HistoryTracker, RecordStore};
use tracing::{debug, info};

/// Catalog-aware access to collections and documents
#[derive(Debug)]
pub struct StorageInterface {
    catalog: Arc<Catalog>,
    commits: Arc<CommitManager>,
    reaper: Arc<DropPendingReaper>,
    clock: Arc<LogicalClock>,
}

impl StorageInterface {
    /// Interface over the given components
    pub fn new(
        catalog: Arc<Catalog>,
        commits: Arc<CommitManager>,
        reaper: Arc<DropPendingReaper>,
        clock: Arc<LogicalClock>,
    ) -> Self {
        Self {
            catalog,
            commits,
            reaper,
            clock,
        }
    }

    /// Catalog
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Record store
    pub fn store(&self) -> &Arc<RecordStore> {
        self.commits.store()
    }

    /// Commit manager
    pub fn commits(&self) -> &Arc<CommitManager> {
        &self.commits
    }

    /// Drop-pending reaper
    pub fn reaper(&self) -> &Arc<DropPendingReaper> {
        &self.reaper
    }

    /// History tracker
    pub fn history(&self) -> &HistoryTracker {
        self.commits.history()
    }

    // ========================================================================
    // Collections
    // ========================================================================

    /// Create a collection visible from `ts`
    ///
    /// Non-replicated namespaces are always created untimestamped.
    pub fn create_collection(
        &self,
        ns: &Namespace,
        options: CollectionOptions,
        ts: Option<Timestamp>,
    ) -> Result<CollectionEntry> {
        let ts = if ns.is_replicated() { ts } else { None };
        let entry = self.catalog.create_collection(ns, options, ts)?;
        for ident in entry.all_idents() {
            self.store().create_ident(&ident);
        }
        Ok(entry)
    }

    /// Drop a collection
    ///
    /// A replicated namespace dropped at a non-null optime is renamed to
    /// its drop-pending name and handed to the reaper; anything else is
    /// purged immediately. Dropping a missing collection is a no-op.
    pub fn drop_collection(&self, ns: &Namespace, optime: Option<OpTime>) -> Result<()> {
        let Some(entry) = self.catalog.lookup(ns, &ReadContext::Latest) else {
            debug!(namespace = %ns, "drop of missing collection ignored");
            return Ok(());
        };
        match optime.filter(|o| ns.is_replicated() && !o.timestamp.is_null()) {
            Some(optime) => {
                let pending = self.catalog.rename_to_drop_pending(ns, optime)?;
                info!(namespace = %ns, drop_pending = %pending, optime = %optime, "collection drop pending");
                self.reaper.add_drop_pending_namespace(optime, pending)
            }
            None => self.purge(&entry.ident),
        }
    }

    /// Rename a collection at `ts`
    pub fn rename_collection(
        &self,
        from: &Namespace,
        to: &Namespace,
        ts: Option<Timestamp>,
    ) -> Result<()> {
        self.catalog.rename_collection(from, to, ts)
    }

    /// Create an index at `ts`, returning its ident
    pub fn create_index(
        &self,
        ns: &Namespace,
        spec: IndexSpec,
        ts: Option<Timestamp>,
    ) -> Result<Ident> {
        let ident = self.catalog.create_index(ns, spec, ts)?;
        self.store().create_ident(&ident);
        Ok(ident)
    }

    /// Drop an index at `ts` (`*` drops all but `_id_`)
    pub fn drop_index(&self, ns: &Namespace, name: &str, ts: Option<Timestamp>) -> Result<()> {
        self.catalog.drop_index(ns, name, ts).map(|_| ())
    }

    /// Drop every collection of `db` at `ts`
    ///
    /// A null `ts` uses the current cluster time. Drop-pending entries of
    /// the database are forgotten by the reaper.
    pub fn drop_database(&self, db: &str, ts: Timestamp) -> Result<DropDatabaseOutcome> {
        let ts = if ts.is_null() {
            self.clock.get_cluster_time()
        } else {
            ts
        };
        let outcome = self.catalog.drop_database(db, ts)?;
        for ident in &outcome.purged {
            self.store().drop_ident(ident);
        }
        let forgotten = self.reaper.forget_missing();
        info!(db = db, ts = %ts, dropped = outcome.dropped.len(), forgotten, "dropped database");
        Ok(outcome)
    }

    fn purge(&self, ident: &Ident) -> Result<()> {
        for purged in self.catalog.purge_collection(ident)? {
            self.store().drop_ident(&purged);
        }
        Ok(())
    }

    /// Discard tables whose idents were removed at or before `oldest`
    ///
    /// Returns the number of tables discarded.
    pub fn reclaim(&self, oldest: Timestamp) -> usize {
        self.catalog
            .reclaim(oldest)
            .iter()
            .filter(|ident| self.store().drop_ident(ident))
            .count()
    }

    /// Handle on the collection named `ns` in `ctx`
    pub fn collection(&self, ns: &Namespace, ctx: &ReadContext) -> Option<CollectionHandle> {
        self.catalog
            .lookup(ns, ctx)
            .map(|entry| CollectionHandle::new(entry, self))
    }

    /// Handle on the collection with physical `ident`
    pub fn collection_by_ident(&self, ident: &Ident) -> Option<CollectionHandle> {
        self.catalog
            .lookup_ident(ident)
            .map(|entry| CollectionHandle::new(entry, self))
    }

    fn live(&self, ns: &Namespace) -> Result<CollectionEntry> {
        self.catalog
            .lookup(ns, &ReadContext::Latest)
            .ok_or_else(|| Error::NamespaceNotFound(ns.to_string()))
    }

    // ========================================================================
    // Documents
    // ========================================================================

    /// Insert a document at `ts`
    ///
    /// # Errors
    ///
    /// `DuplicateKey` if a document with the same `_id` exists.
    pub fn insert_document(
        &self,
        ns: &Namespace,
        document: Document,
        ts: Option<Timestamp>,
    ) -> Result<()> {
        let entry = self.live(ns)?;
        let key = DocKey::of(&document)?;
        if self
            .store()
            .get(&entry.ident, &key, &ReadContext::Latest)
            .is_some()
        {
            return Err(Error::DuplicateKey {
                namespace: ns.to_string(),
                key: key.to_string(),
            });
        }
        self.commit_one(&entry, key, Some(document), ts)
    }

    /// Insert or replace a document at `ts`
    pub fn upsert_document(
        &self,
        ns: &Namespace,
        document: Document,
        ts: Option<Timestamp>,
    ) -> Result<()> {
        let entry = self.live(ns)?;
        let key = DocKey::of(&document)?;
        self.commit_one(&entry, key, Some(document), ts)
    }

    /// Delete the document with `_id == id` at `ts`
    ///
    /// Returns false if there was nothing to delete.
    pub fn delete_document(
        &self,
        ns: &Namespace,
        id: &serde_json::Value,
        ts: Option<Timestamp>,
    ) -> Result<bool> {
        let entry = self.live(ns)?;
        let key = DocKey::from_id(id);
        if self
            .store()
            .get(&entry.ident, &key, &ReadContext::Latest)
            .is_none()
        {
            return Ok(false);
        }
        self.commit_one(&entry, key, None, ts)?;
        Ok(true)
    }

    fn commit_one(
        &self,
        entry: &CollectionEntry,
        key: DocKey,
        document: Option<Document>,
        ts: Option<Timestamp>,
    ) -> Result<()> {
        let mut unit = WriteUnit::new();
        unit.stage(self.store(), entry.ident.clone(), key, document)?;
        self.commits.commit(unit, ts)
    }

    /// Document with `_id == id` in the collection named `ns` in `ctx`
    pub fn find_by_id(
        &self,
        ns: &Namespace,
        id: &serde_json::Value,
        ctx: &ReadContext,
    ) -> Result<Option<Document>> {
        Ok(self.resolve(ns, ctx)?.find_by_id(id, ctx))
    }

    /// Every document of the collection named `ns` in `ctx`
    pub fn find_all(&self, ns: &Namespace, ctx: &ReadContext) -> Result<Vec<Document>> {
        Ok(self.resolve(ns, ctx)?.find_all(ctx))
    }

    /// Timestamps of every retained version of the document with `_id == id`
    ///
    /// Oldest first; an untimestamped version reports `Timestamp::NULL`.
    pub fn version_timestamps(
        &self,
        ns: &Namespace,
        id: &serde_json::Value,
    ) -> Result<Vec<Timestamp>> {
        let entry = self.live(ns)?;
        Ok(self
            .store()
            .version_timestamps(&entry.ident, &DocKey::from_id(id)))
    }

    /// Number of documents of the collection named `ns` in `ctx`
    pub fn count(&self, ns: &Namespace, ctx: &ReadContext) -> Result<usize> {
        Ok(self.resolve(ns, ctx)?.count(ctx))
    }

    fn resolve(&self, ns: &Namespace, ctx: &ReadContext) -> Result<CollectionHandle> {
        self.collection(ns, ctx)
            .ok_or_else(|| Error::NamespaceNotFound(ns.to_string()))
    }
}

/// Reads bound to one physical collection
#[derive(Debug, Clone)]
pub struct CollectionHandle {
    entry: CollectionEntry,
    catalog: Arc<Catalog>,
    store: Arc<RecordStore>,
}

impl CollectionHandle {
    fn new(entry: CollectionEntry, storage: &StorageInterface) -> Self {
        Self {
            entry,
            catalog: Arc::clone(&storage.catalog),
            store: Arc::clone(storage.store()),
        }
    }

    /// Catalog entry as of when the handle was taken
    pub fn entry(&self) -> &CollectionEntry {
        &self.entry
    }

    /// Physical ident
    pub fn ident(&self) -> &Ident {
        &self.entry.ident
    }

    /// True if the collection existed in `ctx`
    pub fn exists_at(&self, ctx: &ReadContext) -> bool {
        self.catalog.is_ident_visible_at(&self.entry.ident, ctx)
    }

    /// Document with `_id == id` in `ctx`
    pub fn find_by_id(&self, id: &serde_json::Value, ctx: &ReadContext) -> Option<Document> {
        if !self.exists_at(ctx) {
            return None;
        }
        self.store
            .get(&self.entry.ident, &DocKey::from_id(id), ctx)
            .map(|doc| (*doc).clone())
    }

    /// Every document in `ctx`, in insertion order
    pub fn find_all(&self, ctx: &ReadContext) -> Vec<Document> {
        if !self.exists_at(ctx) {
            return Vec::new();
        }
        self.store
            .scan(&self.entry.ident, ctx)
            .into_iter()
            .map(|doc| (*doc).clone())
            .collect()
    }

    /// Number of documents in `ctx`
    pub fn count(&self, ctx: &ReadContext) -> usize {
        if !self.exists_at(ctx) {
            return 0;
        }
        self.store.count(&self.entry.ident, ctx)
    }
}
