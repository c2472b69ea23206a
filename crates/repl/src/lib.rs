//! Replication apply path for tidemark
//!
//! This crate turns replicated operations into timestamped storage writes:
//! - Operation: the oplog entry model (insert, update, delete, command, noop)
//! - OperationApplier: applyOps in atomic or non-atomic mode
//! - TransactionTranslator: doTxn, a validated atomic applyOps
//! - StorageInterface: catalog-aware collection and document access
//! - ConsistencyMarkers: the minValid singleton
//! - OpObserver: notification fan-out, with an in-memory oplog observer

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod applier;
pub mod markers;
pub mod modifier;
pub mod observer;
pub mod operation;
pub mod oplog;
pub mod oracle;
pub mod reply;
pub mod storage_interface;
pub mod translator;

pub use applier::{ApplyMode, OperationApplier};
pub use markers::{ConsistencyMarkers, MinValidDocument};
pub use modifier::BasicModifierEvaluator;
pub use observer::{
    ApplyOpsNotification, NoopObserver, OpObserver, OpObserverRegistry, OperationNotification,
};
pub use operation::{Command, Operation, OperationKind};
pub use oplog::{Oplog, OplogEntry, OplogObserver};
pub use oracle::{LocalReplicationState, ReplicationRole};
pub use reply::{status_from_reply, ApplyOpsReply, DoTxnReply};
pub use storage_interface::{CollectionHandle, StorageInterface};
pub use translator::TransactionTranslator;
