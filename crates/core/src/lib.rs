//! Core types for tidemark
//!
//! This crate defines the vocabulary shared by every layer of the engine:
//! - Timestamps, optimes and read views ([`Timestamp`], [`OpTime`], [`ReadContext`])
//! - Identifiers ([`Namespace`], [`CollectionId`], [`Ident`])
//! - Documents and record keys ([`Document`], [`DocKey`])
//! - The canonical [`Error`] with stable [`ErrorCode`]s
//! - Collaborator traits ([`ReplicationOracle`], [`UpdateEvaluator`])

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod document;
pub mod error;
pub mod timestamp;
pub mod traits;
pub mod types;

pub use document::{DocKey, Document, ID_FIELD};
pub use error::{Error, ErrorCode, Result};
pub use timestamp::{OpTime, ReadContext, ReadTimestamp, Timestamp};
pub use traits::{ReplicationOracle, UpdateEvaluator};
pub use types::{CollectionId, Ident, Namespace};
