//! Collaborator traits
//!
//! The engine consults these but does not implement their policy:
//! - [`ReplicationOracle`]: "am I primary" and the node's applied optime
//! - [`UpdateEvaluator`]: turns a base document and a modifier into a new document

use crate::document::Document;
use crate::error::Result;
use crate::timestamp::OpTime;

/// Replication role oracle
///
/// Decides whether the write path self-assigns timestamps (primary) or
/// honours caller-supplied ones (secondary / replay).
pub trait ReplicationOracle: Send + Sync {
    /// True if this node accepts user writes
    fn can_accept_writes(&self) -> bool;

    /// Optime of the last operation this node applied
    fn my_last_applied_optime(&self) -> OpTime;

    /// Current election term
    fn current_term(&self) -> i64;

    /// False on a standalone node, whose writes are never logged
    fn replication_enabled(&self) -> bool {
        true
    }
}

/// Update-modifier evaluator
pub trait UpdateEvaluator: Send + Sync {
    /// Apply `modifier` to `base`, returning the new document
    ///
    /// Implementations must not change `_id`.
    fn apply(&self, base: &Document, modifier: &Document) -> Result<Document>;
}
