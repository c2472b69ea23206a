//! # Tidemark
//!
//! Timestamp-versioned storage and catalog engine for the apply path of a
//! replicated document database.
//!
//! A [`Node`] applies replicated operations (`applyOps`, `doTxn`) so that
//! every write, and every catalog change, becomes visible at a chosen
//! timestamp. Readers select a snapshot timestamp and observe exactly the
//! state as of that instant, including collections that were later renamed
//! or dropped.
//!
//! ## Quick Start
//!
//! ```ignore
//! use tidemark::prelude::*;
//!
//! let node = Node::builder().secondary().build()?;
//! let ctx = node.operation_context();
//!
//! let ns = Namespace::new("test", "c");
//! let ops = vec![
//!     Operation::command("test", Command::Create { collection: "c".into(), options: Default::default() }).at(5, 1),
//!     Operation::insert(&ns, doc(json!({"_id": 0}))?).at(6, 1),
//! ];
//! node.apply_ops(&ctx, "test", &ops, ApplyMode::Atomic)?.status()?;
//!
//! assert_eq!(node.storage().count(&ns, &ReadContext::at(5u64))?, 0);
//! assert_eq!(node.storage().count(&ns, &ReadContext::at(6u64))?, 1);
//! ```
//!
//! ## Crates
//!
//! - `tidemark-core` - timestamps, identifiers, documents, errors
//! - `tidemark-storage` - multi-version record store and history retention
//! - `tidemark-concurrency` - clock, snapshot sessions, units of work
//! - `tidemark-catalog` - timestamped ident registry and drop-pending reaper
//! - `tidemark-repl` - applyOps, doTxn, consistency markers, oplog

#![warn(missing_docs)]
#![warn(clippy::all)]

mod config;
mod node;

pub mod prelude;

pub use config::{
    CatalogSection, ClockConfig, ConfigError, NodeConfig, OplogConfig, ReplicationConfig,
};
pub use node::{Node, NodeBuilder};

pub use tidemark_catalog as catalog;
pub use tidemark_concurrency as concurrency;
pub use tidemark_core as core;
pub use tidemark_repl as repl;
pub use tidemark_storage as storage;

pub use tidemark_core::{Error, ErrorCode, Result};
