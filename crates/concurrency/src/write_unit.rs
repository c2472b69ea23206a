//! Unit of work
//!
//! A [`WriteUnit`] buffers document writes until commit. Reads through the
//! unit see its own staged writes. Writing the same document twice in one
//! unit is a write conflict; the unit also remembers the newest committed
//! version of every document it touched, so the commit manager can reject
//! it if another unit committed over it first.

use rustc_hash::FxHashMap;
use std::sync::Arc;
use tidemark_core::{DocKey, Document, Error, Ident, ReadContext, Result, Timestamp};
use tidemark_storage::{RecordStore, RecordWrite};

/// A staged write plus the committed version it was based on
#[derive(Debug, Clone)]
pub struct PendingWrite {
    /// The write itself
    pub write: RecordWrite,
    /// Newest committed version of the document when staged
    pub observed: Option<Timestamp>,
}

/// Buffered writes of one unit of work
///
/// Dropping an uncommitted unit discards its writes.
#[derive(Debug, Default)]
pub struct WriteUnit {
    writes: Vec<PendingWrite>,
    positions: FxHashMap<(Ident, DocKey), usize>,
}

impl WriteUnit {
    /// Create an empty unit
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of staged writes
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// True if nothing is staged
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// True if this unit already staged a write to the document
    pub fn contains(&self, ident: &Ident, key: &DocKey) -> bool {
        self.positions.contains_key(&(ident.clone(), key.clone()))
    }

    /// Read a document, seeing this unit's own staged writes
    pub fn get(
        &self,
        store: &RecordStore,
        ident: &Ident,
        key: &DocKey,
        ctx: &ReadContext,
    ) -> Option<Arc<Document>> {
        match self.positions.get(&(ident.clone(), key.clone())) {
            Some(&pos) => self.writes[pos].write.document.clone().map(Arc::new),
            None => store.get(ident, key, ctx),
        }
    }

    /// Stage a write (`None` deletes)
    ///
    /// # Errors
    ///
    /// `WriteConflict` if this unit already wrote the document.
    pub fn stage(
        &mut self,
        store: &RecordStore,
        ident: Ident,
        key: DocKey,
        document: Option<Document>,
    ) -> Result<()> {
        let slot = (ident, key);
        if self.positions.contains_key(&slot) {
            return Err(Error::WriteConflict(format!(
                "document {} in {} written twice in one unit of work",
                slot.1, slot.0
            )));
        }
        let observed = store.latest_timestamp(&slot.0, &slot.1);
        self.positions.insert(slot.clone(), self.writes.len());
        let (ident, key) = slot;
        self.writes.push(PendingWrite {
            write: RecordWrite {
                ident,
                key,
                document,
            },
            observed,
        });
        Ok(())
    }

    /// Staged writes in order
    pub fn writes(&self) -> &[PendingWrite] {
        &self.writes
    }

    pub(crate) fn into_writes(self) -> Vec<PendingWrite> {
        self.writes
    }
}
