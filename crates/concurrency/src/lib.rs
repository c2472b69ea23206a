//! Concurrency layer for tidemark
//!
//! This crate implements timestamped units of work with:
//! - LogicalClock: strictly increasing tick reservation
//! - OperationContext: per-operation snapshot selection and pinning
//! - WriteUnit: buffered writes with same-document conflict detection
//! - CommitManager: first-committer-wins validation under a commit lock

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod context;
pub mod manager;
pub mod write_unit;

pub use clock::LogicalClock;
pub use context::{OperationContext, UnreplicatedWrites};
pub use manager::CommitManager;
pub use write_unit::{PendingWrite, WriteUnit};
