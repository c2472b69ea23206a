//! Catalog layer for tidemark
//!
//! This crate implements the ident registry with:
//! - Catalog: namespace → ident mapping queryable at any retained timestamp
//! - Two-phase drop: rename to a drop-pending name, remove later
//! - DropPendingReaper: removes drop-pending collections once safe

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod catalog;
pub mod entry;
pub mod reaper;

pub use catalog::{Catalog, CatalogConfig, DropDatabaseOutcome};
pub use entry::{CollectionEntry, CollectionOptions, IndexEntry, IndexSpec, ID_INDEX_NAME};
pub use reaper::DropPendingReaper;
