//! Convenient imports for tidemark.
//!
//! ```ignore
//! use tidemark::prelude::*;
//!
//! let node = Node::builder().primary().build()?;
//! ```

// Entry points
pub use crate::config::NodeConfig;
pub use crate::node::{Node, NodeBuilder};

// Error handling
pub use tidemark_core::{Error, ErrorCode, Result};

// Core types
pub use tidemark_core::document::doc;
pub use tidemark_core::{
    CollectionId, Document, Namespace, OpTime, ReadContext, ReadTimestamp, Timestamp,
};

// Catalog
pub use tidemark_catalog::{CollectionOptions, IndexSpec};

// Apply path
pub use tidemark_concurrency::OperationContext;
pub use tidemark_repl::{
    ApplyMode, ApplyOpsReply, Command, DoTxnReply, OpObserver, Operation, ReplicationRole,
};

// Re-export serde_json for convenience
pub use serde_json::json;
