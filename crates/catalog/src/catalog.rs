//! Ident registry
//!
//! Maps namespaces to physical idents with timestamped visibility. Every
//! structural change records the timestamp it happened at, so a reader at
//! any retained timestamp sees the catalog exactly as it was then:
//!
//! ```text
//! create(ns)  @5   ident visible from 5
//! rename(ns') @7   ns resolves before 7, ns' from 7, same ident
//! drop        @8   renamed to db.system.drop.8t1.coll (drop pending)
//! reap        @9   ident removed; visible for 5 <= t < 9
//! ```
//!
//! Untimestamped changes (`ts = None`) apply at the beginning of time: an
//! untimestamped create is visible at every timestamp and an untimestamped
//! drop purges the entry so it appears never to have existed.

use crate::entry::{
    lifetime_covers, CollectionEntry, CollectionOptions, IndexEntry, IndexSpec, ID_INDEX_NAME,
};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::json;
use smallvec::SmallVec;
use tidemark_core::document::doc;
use tidemark_core::{
    CollectionId, Error, Ident, Namespace, OpTime, ReadContext, Result, Timestamp,
};
use tracing::debug;

/// Catalog behaviour switches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogConfig {
    /// Allocate the implicit `_id_` index ident on create
    pub create_id_index: bool,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            create_id_index: true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct IdentRecord {
    created: Timestamp,
    removed: Option<Timestamp>,
}

#[derive(Debug, Default)]
struct CatalogState {
    /// Keyed by collection ident
    collections: FxHashMap<Ident, CollectionEntry>,
    idents: FxHashMap<Ident, IdentRecord>,
    next_ident: u64,
}

impl CatalogState {
    fn allocate_ident(&mut self, kind: &str) -> Ident {
        let n = self.next_ident;
        self.next_ident += 1;
        Ident::new(format!("{}-{}-{}", kind, n, rand::random::<u32>()))
    }

    fn find_live(&self, ns: &Namespace) -> Option<&Ident> {
        self.collections
            .values()
            .find(|e| e.is_live() && e.namespace() == ns)
            .map(|e| &e.ident)
    }

    fn live_mut(&mut self, ns: &Namespace) -> Result<&mut CollectionEntry> {
        let ident = self
            .find_live(ns)
            .cloned()
            .ok_or_else(|| Error::NamespaceNotFound(ns.to_string()))?;
        self.collections
            .get_mut(&ident)
            .ok_or_else(|| Error::NamespaceNotFound(ns.to_string()))
    }
}

/// Result of dropping a database
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DropDatabaseOutcome {
    /// Collections given a removal timestamp
    pub dropped: Vec<Namespace>,
    /// Idents purged outright (non-replicated collections)
    pub purged: Vec<Ident>,
}

/// Process-scoped catalog
///
/// Must outlive every operation context that resolves through it.
#[derive(Debug, Default)]
pub struct Catalog {
    state: RwLock<CatalogState>,
    config: CatalogConfig,
}

fn effective(ts: Option<Timestamp>) -> Timestamp {
    ts.and_then(Timestamp::non_null).unwrap_or(Timestamp::NULL)
}

impl Catalog {
    /// Empty catalog with default config
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty catalog with `config`
    pub fn with_config(config: CatalogConfig) -> Self {
        Self {
            state: RwLock::default(),
            config,
        }
    }

    // ========================================================================
    // Structural changes
    // ========================================================================

    /// Create a collection visible from `ts`
    ///
    /// Allocates a collection ident plus the `_id_` index ident unless the
    /// options, config or namespace (`system.profile`) rule it out.
    pub fn create_collection(
        &self,
        ns: &Namespace,
        options: CollectionOptions,
        ts: Option<Timestamp>,
    ) -> Result<CollectionEntry> {
        if ns.is_command() {
            return Err(Error::BadValue(format!("cannot create {}", ns)));
        }
        let created = effective(ts);
        let mut state = self.state.write();

        if state.find_live(ns).is_some() {
            return Err(Error::NamespaceExists(ns.to_string()));
        }
        if let Some(id) = options.collection_id {
            if state
                .collections
                .values()
                .any(|e| e.is_live() && e.collection_id == Some(id))
            {
                return Err(Error::NamespaceExists(format!(
                    "collection id {} already in use",
                    id
                )));
            }
        }

        let ident = state.allocate_ident("collection");
        state.idents.insert(
            ident.clone(),
            IdentRecord {
                created,
                removed: None,
            },
        );

        let mut indexes = SmallVec::new();
        if options.auto_index_id && self.config.create_id_index && !ns.is_profile() {
            let index_ident = state.allocate_ident("index");
            state.idents.insert(
                index_ident.clone(),
                IdentRecord {
                    created,
                    removed: None,
                },
            );
            indexes.push(IndexEntry {
                spec: IndexSpec {
                    name: ID_INDEX_NAME.to_string(),
                    key: doc(json!({"_id": 1}))?,
                },
                ident: index_ident,
                created,
                removed: None,
            });
        }

        let entry = CollectionEntry {
            ident: ident.clone(),
            collection_id: options.collection_id,
            options,
            indexes,
            names: vec![(created, ns.clone())],
            created,
            removed: None,
        };
        state.collections.insert(ident.clone(), entry.clone());

        debug!(namespace = %ns, ident = %ident, created = %created, "created collection");
        Ok(entry)
    }

    /// Point `from`'s collection at `to`, idents unchanged
    pub fn rename_collection(
        &self,
        from: &Namespace,
        to: &Namespace,
        ts: Option<Timestamp>,
    ) -> Result<()> {
        let ts = effective(ts);
        let mut state = self.state.write();
        if state.find_live(to).is_some() {
            return Err(Error::NamespaceExists(to.to_string()));
        }
        let entry = state.live_mut(from)?;
        if ts.is_null() {
            entry.names.clear();
        }
        entry.names.push((ts, to.clone()));

        debug!(from = %from, to = %to, ts = %ts, "renamed collection");
        Ok(())
    }

    /// First drop phase: park the collection under its drop-pending name
    ///
    /// Returns the drop-pending namespace. Idents stay queryable.
    pub fn rename_to_drop_pending(&self, ns: &Namespace, optime: OpTime) -> Result<Namespace> {
        let pending = ns.drop_pending(optime);
        self.rename_collection(ns, &pending, Some(optime.timestamp))?;
        Ok(pending)
    }

    /// Second drop phase: record removal of the collection and its indexes
    ///
    /// The removal timestamp is clamped to never precede creation. Returns
    /// the idents removed.
    pub fn drop_collection_idents(&self, ident: &Ident, ts: Timestamp) -> Result<Vec<Ident>> {
        let mut state = self.state.write();
        let state = &mut *state;
        let entry = state
            .collections
            .get_mut(ident)
            .filter(|e| e.is_live())
            .ok_or_else(|| Error::NamespaceNotFound(format!("no live collection {}", ident)))?;

        let removal = ts.max(entry.created);
        entry.removed = Some(removal);
        let mut removed = vec![entry.ident.clone()];
        for index in entry.indexes.iter_mut().filter(|i| i.removed.is_none()) {
            index.removed = Some(ts.max(index.created));
            removed.push(index.ident.clone());
        }
        for entry_ident in &removed {
            if let Some(record) = state.idents.get_mut(entry_ident) {
                record.removed = Some(ts.max(record.created));
            }
        }

        debug!(namespace = %entry.namespace(), ident = %ident, removed = %removal, "dropped collection idents");
        Ok(removed)
    }

    /// Untimestamped drop: forget the collection at every timestamp
    ///
    /// Returns the idents whose tables should be discarded.
    pub fn purge_collection(&self, ident: &Ident) -> Result<Vec<Ident>> {
        let mut state = self.state.write();
        let entry = state
            .collections
            .remove(ident)
            .ok_or_else(|| Error::NamespaceNotFound(format!("no collection {}", ident)))?;
        let idents = entry.all_idents();
        for purged in &idents {
            state.idents.remove(purged);
        }
        debug!(namespace = %entry.namespace(), ident = %ident, "purged collection");
        Ok(idents)
    }

    /// Create an index on a live collection
    ///
    /// Re-declaring an existing index with the same key is a no-op that
    /// returns the existing ident.
    pub fn create_index(
        &self,
        ns: &Namespace,
        spec: IndexSpec,
        ts: Option<Timestamp>,
    ) -> Result<Ident> {
        let created = effective(ts);
        let mut state = self.state.write();
        let ident = state.allocate_ident("index");
        let entry = state.live_mut(ns)?;
        if let Some(existing) = entry.index(&spec.name) {
            if existing.spec.key == spec.key {
                return Ok(existing.ident.clone());
            }
            return Err(Error::BadValue(format!(
                "index {} already exists on {} with a different key",
                spec.name, ns
            )));
        }
        let created = created.max(entry.created);
        debug!(namespace = %ns, index = %spec.name, ident = %ident, "created index");
        entry.indexes.push(IndexEntry {
            spec,
            ident: ident.clone(),
            created,
            removed: None,
        });
        state.idents.insert(
            ident.clone(),
            IdentRecord {
                created,
                removed: None,
            },
        );
        Ok(ident)
    }

    /// Drop an index (`"*"` drops every index but `_id_`)
    ///
    /// Returns the idents removed.
    pub fn drop_index(&self, ns: &Namespace, name: &str, ts: Option<Timestamp>) -> Result<Vec<Ident>> {
        if name == ID_INDEX_NAME {
            return Err(Error::IllegalOperation("cannot drop _id index".into()));
        }
        let ts = effective(ts);
        let mut state = self.state.write();
        let state = &mut *state;
        let entry = state.live_mut(ns)?;

        let mut removed = Vec::new();
        for index in entry.indexes.iter_mut().filter(|i| i.removed.is_none()) {
            let matches = if name == "*" {
                index.spec.name != ID_INDEX_NAME
            } else {
                index.spec.name == name
            };
            if matches {
                index.removed = Some(ts.max(index.created));
                removed.push((index.ident.clone(), ts.max(index.created)));
            }
        }
        if removed.is_empty() && name != "*" {
            return Err(Error::NoSuchKey(format!("index {} not found on {}", name, ns)));
        }
        for (ident, at) in &removed {
            if let Some(record) = state.idents.get_mut(ident) {
                record.removed = Some(*at);
            }
        }
        debug!(namespace = %ns, index = name, count = removed.len(), "dropped indexes");
        Ok(removed.into_iter().map(|(ident, _)| ident).collect())
    }

    /// Drop every collection of `db`, drop-pending ones included
    ///
    /// Replicated collections get removal timestamp `ts`; non-replicated
    /// ones are purged.
    pub fn drop_database(&self, db: &str, ts: Timestamp) -> Result<DropDatabaseOutcome> {
        let mut outcome = DropDatabaseOutcome::default();
        for entry in self.collections_in_db(db) {
            let ns = entry.namespace().clone();
            if ns.is_replicated() && !ts.is_null() {
                self.drop_collection_idents(&entry.ident, ts)?;
                outcome.dropped.push(ns);
            } else {
                outcome.purged.extend(self.purge_collection(&entry.ident)?);
            }
        }
        debug!(db = db, dropped = outcome.dropped.len(), purged = outcome.purged.len(), "dropped database");
        Ok(outcome)
    }

    /// Forget idents removed at or before `oldest`
    ///
    /// Called once no reader can observe them any more. Returns the idents
    /// whose tables can be discarded.
    pub fn reclaim(&self, oldest: Timestamp) -> Vec<Ident> {
        let mut state = self.state.write();
        let reclaimable: Vec<Ident> = state
            .idents
            .iter()
            .filter(|(_, r)| r.removed.map_or(false, |removed| removed <= oldest))
            .map(|(ident, _)| ident.clone())
            .collect();
        for ident in &reclaimable {
            state.idents.remove(ident);
            state.collections.remove(ident);
        }
        for entry in state.collections.values_mut() {
            entry.indexes.retain(|idx| !reclaimable.contains(&idx.ident));
        }
        if !reclaimable.is_empty() {
            debug!(oldest = %oldest, count = reclaimable.len(), "reclaimed idents");
        }
        reclaimable
    }

    // ========================================================================
    // Point-in-time queries
    // ========================================================================

    /// Collection named `ns` in `ctx`
    pub fn lookup(&self, ns: &Namespace, ctx: &ReadContext) -> Option<CollectionEntry> {
        self.state
            .read()
            .collections
            .values()
            .find(|e| e.visible_at(ctx) && e.name_at(ctx) == Some(ns))
            .cloned()
    }

    /// Collection with stable id `id` in `ctx`
    pub fn lookup_by_id(&self, id: &CollectionId, ctx: &ReadContext) -> Option<CollectionEntry> {
        self.state
            .read()
            .collections
            .values()
            .find(|e| e.collection_id.as_ref() == Some(id) && e.visible_at(ctx))
            .cloned()
    }

    /// Collection owning `ident`, whatever its state
    pub fn lookup_ident(&self, ident: &Ident) -> Option<CollectionEntry> {
        self.state.read().collections.get(ident).cloned()
    }

    /// Whether `ident` exists in `ctx`: `created <= ts < removed`
    pub fn is_ident_visible_at(&self, ident: &Ident, ctx: &ReadContext) -> bool {
        self.state
            .read()
            .idents
            .get(ident)
            .map_or(false, |r| lifetime_covers(r.created, r.removed, ctx))
    }

    /// Every ident that exists in `ctx`, sorted
    pub fn all_idents(&self, ctx: &ReadContext) -> Vec<Ident> {
        let mut idents: Vec<Ident> = self
            .state
            .read()
            .idents
            .iter()
            .filter(|(_, r)| lifetime_covers(r.created, r.removed, ctx))
            .map(|(ident, _)| ident.clone())
            .collect();
        idents.sort();
        idents
    }

    /// Names of the collections of `db` in `ctx`, sorted
    pub fn list_collections(&self, db: &str, ctx: &ReadContext) -> Vec<Namespace> {
        let mut names: Vec<Namespace> = self
            .state
            .read()
            .collections
            .values()
            .filter(|e| e.visible_at(ctx))
            .filter_map(|e| e.name_at(ctx))
            .filter(|ns| ns.db() == db)
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Live collections of `db`, drop-pending ones included
    pub fn collections_in_db(&self, db: &str) -> Vec<CollectionEntry> {
        let mut entries: Vec<CollectionEntry> = self
            .state
            .read()
            .collections
            .values()
            .filter(|e| e.is_live() && e.namespace().db() == db)
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.namespace().cmp(b.namespace()));
        entries
    }

    /// Number of entries, dropped ones included until reclaimed
    pub fn entry_count(&self) -> usize {
        self.state.read().collections.len()
    }
}
