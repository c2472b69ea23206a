//! Catalog entries
//!
//! A [`CollectionEntry`] records one physical incarnation of a collection:
//! its ident, index idents, name history and lifetime. Renames append to
//! the name history; drops record a removal timestamp. Neither replaces
//! the entry.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tidemark_core::{CollectionId, Document, Ident, Namespace, ReadContext, Timestamp};

/// Name of the implicit primary-key index
pub const ID_INDEX_NAME: &str = "_id_";

fn default_true() -> bool {
    true
}

/// Options a collection is created with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionOptions {
    /// Stable id to assign; `None` creates a collection without one
    #[serde(default, rename = "uuid", skip_serializing_if = "Option::is_none")]
    pub collection_id: Option<CollectionId>,
    /// Whether to build the implicit `_id_` index
    #[serde(default = "default_true", rename = "autoIndexId")]
    pub auto_index_id: bool,
}

impl Default for CollectionOptions {
    fn default() -> Self {
        Self {
            collection_id: None,
            auto_index_id: true,
        }
    }
}

impl CollectionOptions {
    /// Options assigning `id`
    pub fn with_id(id: CollectionId) -> Self {
        Self {
            collection_id: Some(id),
            ..Self::default()
        }
    }
}

/// Declared index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSpec {
    /// Index name
    pub name: String,
    /// Key pattern
    pub key: Document,
}

/// One index incarnation
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    /// Declared spec
    pub spec: IndexSpec,
    /// Physical ident
    pub ident: Ident,
    /// First visible timestamp
    pub created: Timestamp,
    /// Removal timestamp, once dropped
    pub removed: Option<Timestamp>,
}

impl IndexEntry {
    /// Whether the index exists in `ctx`
    pub fn visible_at(&self, ctx: &ReadContext) -> bool {
        lifetime_covers(self.created, self.removed, ctx)
    }
}

/// One collection incarnation
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionEntry {
    /// Collection ident
    pub ident: Ident,
    /// Stable id, if the collection has one
    pub collection_id: Option<CollectionId>,
    /// Creation options
    pub options: CollectionOptions,
    /// Indexes, dropped ones included until reclaimed
    pub indexes: SmallVec<[IndexEntry; 2]>,
    pub(crate) names: Vec<(Timestamp, Namespace)>,
    /// First visible timestamp (`NULL` for untimestamped creates)
    pub created: Timestamp,
    /// Removal timestamp, once physically dropped
    pub removed: Option<Timestamp>,
}

impl CollectionEntry {
    /// Current name
    pub fn namespace(&self) -> &Namespace {
        // Entries are always created with a name.
        &self.names[self.names.len() - 1].1
    }

    /// Name in effect in `ctx`
    pub fn name_at(&self, ctx: &ReadContext) -> Option<&Namespace> {
        self.names
            .iter()
            .rev()
            .find(|(ts, _)| ctx.sees(*ts))
            .map(|(_, ns)| ns)
    }

    /// Full rename history, oldest first
    pub fn name_history(&self) -> &[(Timestamp, Namespace)] {
        &self.names
    }

    /// Whether the collection exists in `ctx`
    pub fn visible_at(&self, ctx: &ReadContext) -> bool {
        lifetime_covers(self.created, self.removed, ctx)
    }

    /// True until physically dropped
    pub fn is_live(&self) -> bool {
        self.removed.is_none()
    }

    /// Live index with the given name
    pub fn index(&self, name: &str) -> Option<&IndexEntry> {
        self.indexes
            .iter()
            .find(|idx| idx.removed.is_none() && idx.spec.name == name)
    }

    /// Names of indexes that exist in `ctx`
    pub fn index_names_at(&self, ctx: &ReadContext) -> Vec<String> {
        self.indexes
            .iter()
            .filter(|idx| idx.visible_at(ctx))
            .map(|idx| idx.spec.name.clone())
            .collect()
    }

    /// Collection ident followed by every index ident, live or not
    pub fn all_idents(&self) -> Vec<Ident> {
        std::iter::once(self.ident.clone())
            .chain(self.indexes.iter().map(|idx| idx.ident.clone()))
            .collect()
    }
}

/// `created <= ts < removed` in the view
pub(crate) fn lifetime_covers(
    created: Timestamp,
    removed: Option<Timestamp>,
    ctx: &ReadContext,
) -> bool {
    ctx.sees(created) && !removed.map_or(false, |r| ctx.sees(r))
}
