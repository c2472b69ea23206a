//! Storage layer for tidemark
//!
//! This crate implements the multi-version record store with:
//! - VersionChain: per-document history keyed by commit timestamp
//! - RecordStore: DashMap of per-ident shards, FxHashMap within
//! - HistoryTracker: oldest retained timestamp and snapshot pins

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod history;
pub mod record_store;
pub mod version;

pub use history::{HistoryTracker, SnapshotPin};
pub use record_store::{RecordStore, RecordWrite, Shard};
pub use version::{Version, VersionChain};
