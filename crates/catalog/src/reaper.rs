//! Drop-pending collection reaper
//!
//! Second phase of a replicated drop. Collections renamed to drop-pending
//! names are registered here under the optime of their drop and removed
//! from the catalog once the caller reports that optime is safe (e.g.
//! majority committed).

use crate::catalog::Catalog;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tidemark_concurrency::LogicalClock;
use tidemark_core::{Error, Namespace, OpTime, ReadContext, Result};
use tracing::{info, warn};

/// Deferred physical removal of dropped collections
pub struct DropPendingReaper {
    catalog: Arc<Catalog>,
    clock: Arc<LogicalClock>,
    pending: Mutex<BTreeMap<OpTime, Vec<Namespace>>>,
}

impl DropPendingReaper {
    /// Create a reaper over `catalog`
    pub fn new(catalog: Arc<Catalog>, clock: Arc<LogicalClock>) -> Self {
        Self {
            catalog,
            clock,
            pending: Mutex::new(BTreeMap::new()),
        }
    }

    /// Register a drop-pending namespace, safe to remove once `optime` is
    pub fn add_drop_pending_namespace(&self, optime: OpTime, ns: Namespace) -> Result<()> {
        if !ns.is_drop_pending() {
            return Err(Error::BadValue(format!("{} is not a drop-pending namespace", ns)));
        }
        let mut pending = self.pending.lock();
        let list = pending.entry(optime).or_default();
        if list.contains(&ns) {
            return Err(Error::IllegalOperation(format!(
                "{} already registered for drop at {}",
                ns, optime
            )));
        }
        list.push(ns);
        Ok(())
    }

    /// Optime of the oldest registered drop
    pub fn earliest_drop_optime(&self) -> Option<OpTime> {
        self.pending.lock().keys().next().copied()
    }

    /// Number of registered namespaces
    pub fn pending_count(&self) -> usize {
        self.pending.lock().values().map(Vec::len).sum()
    }

    /// Registered namespaces, oldest first
    pub fn pending(&self) -> Vec<(OpTime, Namespace)> {
        self.pending
            .lock()
            .iter()
            .flat_map(|(optime, list)| list.iter().map(move |ns| (*optime, ns.clone())))
            .collect()
    }

    /// Physically remove every pending drop whose optime is `<= optime`
    ///
    /// Removal is recorded at the current cluster time. Namespaces that no
    /// longer exist are forgotten. Returns the number removed; a no-op when
    /// nothing qualifies.
    pub fn drop_collections_older_than(&self, optime: OpTime) -> Result<usize> {
        let ready = {
            let mut pending = self.pending.lock();
            let due: Vec<OpTime> = pending.range(..=optime).map(|(due, _)| *due).collect();
            due.iter()
                .filter_map(|due| pending.remove_entry(due))
                .collect::<Vec<_>>()
        };
        if ready.is_empty() {
            return Ok(0);
        }

        let drop_ts = self.clock.get_cluster_time();
        let mut dropped = 0;
        let mut failure = None;
        for (registered, namespaces) in ready {
            for ns in namespaces {
                let Some(entry) = self.catalog.lookup(&ns, &ReadContext::Latest) else {
                    warn!(namespace = %ns, optime = %registered, "drop-pending collection no longer exists");
                    continue;
                };
                match self.catalog.drop_collection_idents(&entry.ident, drop_ts) {
                    Ok(_) => {
                        info!(namespace = %ns, ident = %entry.ident, drop_ts = %drop_ts, "completed collection drop");
                        dropped += 1;
                    }
                    Err(e) => {
                        tracing::error!(namespace = %ns, error = %e, "failed to drop drop-pending collection");
                        self.pending.lock().entry(registered).or_default().push(ns);
                        failure.get_or_insert(e);
                    }
                }
            }
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(dropped),
        }
    }

    /// Undo the first drop phase: rename back and forget the drop
    ///
    /// Returns false if `ns` was not registered at `optime`.
    pub fn roll_back_drop_pending(&self, optime: OpTime, ns: &Namespace) -> Result<bool> {
        let original = ns
            .original_from_drop_pending()
            .ok_or_else(|| Error::BadValue(format!("{} is not a drop-pending namespace", ns)))?;
        {
            let mut pending = self.pending.lock();
            let Some(list) = pending.get_mut(&optime) else {
                return Ok(false);
            };
            let Some(pos) = list.iter().position(|n| n == ns) else {
                return Ok(false);
            };
            list.remove(pos);
            if list.is_empty() {
                pending.remove(&optime);
            }
        }

        let ts = self.clock.get_cluster_time();
        if let Err(e) = self.catalog.rename_collection(ns, &original, Some(ts)) {
            self.pending.lock().entry(optime).or_default().push(ns.clone());
            return Err(e);
        }
        info!(namespace = %original, optime = %optime, "rolled back drop-pending collection");
        Ok(true)
    }

    /// Forget registered namespaces that no longer exist in the catalog
    ///
    /// Returns the number forgotten.
    pub fn forget_missing(&self) -> usize {
        let mut pending = self.pending.lock();
        let mut forgotten = 0;
        pending.retain(|_, list| {
            let before = list.len();
            list.retain(|ns| self.catalog.lookup(ns, &ReadContext::Latest).is_some());
            forgotten += before - list.len();
            !list.is_empty()
        });
        forgotten
    }

    /// Forget every registered drop
    pub fn clear_drop_pending_state(&self) {
        self.pending.lock().clear();
    }
}

impl std::fmt::Debug for DropPendingReaper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DropPendingReaper")
            .field("pending", &self.pending_count())
            .finish()
    }
}
