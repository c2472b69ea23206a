//! Transaction translator (doTxn)
//!
//! Validates a user-supplied list of CRUD operations, fills in each
//! operation's collection id from the catalog, and applies the canonical
//! list as one atomic batch. Exactly one applyOps notification is emitted
//! per successful call, an empty batch included.

use crate::applier::{ApplyMode, OperationApplier};
use crate::observer::{ApplyOpsNotification, OpObserver};
use crate::operation::Operation;
use crate::reply::DoTxnReply;
use std::sync::Arc;
use tidemark_concurrency::OperationContext;
use tidemark_core::{Error, OpTime, ReplicationOracle, Result};
use tracing::debug;

/// Translates doTxn requests into atomic applyOps batches
pub struct TransactionTranslator {
    applier: Arc<OperationApplier>,
    oracle: Arc<dyn ReplicationOracle>,
    observer: Arc<dyn OpObserver>,
}

impl TransactionTranslator {
    /// Translator applying through `applier`
    pub fn new(
        applier: Arc<OperationApplier>,
        oracle: Arc<dyn ReplicationOracle>,
        observer: Arc<dyn OpObserver>,
    ) -> Self {
        Self {
            applier,
            oracle,
            observer,
        }
    }

    /// Apply `ops` against `db` as one transaction
    ///
    /// # Errors
    ///
    /// - `NotWritablePrimary` if replicated writes are not accepted here
    /// - `UnknownError` wrapping the cause if any operation fails
    ///   validation; nothing is applied in that case
    pub fn do_txn(
        &self,
        ctx: &OperationContext,
        db: &str,
        ops: &[Operation],
    ) -> Result<DoTxnReply> {
        if ctx.writes_are_replicated() && !self.oracle.can_accept_writes() {
            return Err(Error::NotWritablePrimary(format!(
                "doTxn against {} requires a writable primary",
                db
            )));
        }
        let canonical = self.canonicalize(ops)?;

        let batch = self
            .applier
            .run(ctx, db, &canonical, ApplyMode::Atomic, false)?;
        if let (true, Some(ts)) = (batch.reply.ok, batch.timestamp) {
            debug!(db = db, ts = %ts, ops = canonical.len(), "doTxn applied");
            self.observer.on_apply_ops(&ApplyOpsNotification {
                db: db.to_string(),
                operations: canonical,
                optime: OpTime::new(ts, self.oracle.current_term()),
                replicated: self.applier.batch_logged(ctx, db),
            });
        }
        Ok(batch.reply)
    }

    fn canonicalize(&self, ops: &[Operation]) -> Result<Vec<Operation>> {
        ops.iter()
            .map(|op| {
                if !op.is_crud() {
                    let cause = Error::InvalidOptions(format!(
                        "{} operations are not allowed in doTxn",
                        op.kind_name()
                    ));
                    return Err(Error::unknown(format!("doTxn validation failed: {}", cause), cause));
                }
                let entry = self
                    .applier
                    .resolve(op)
                    .map_err(|e| Error::unknown(format!("doTxn validation failed: {}", e), e))?;
                let mut canonical = op.clone();
                if canonical.collection_id.is_none() {
                    canonical.collection_id = entry.collection_id;
                }
                Ok(canonical)
            })
            .collect()
    }
}

impl std::fmt::Debug for TransactionTranslator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionTranslator").finish_non_exhaustive()
    }
}
