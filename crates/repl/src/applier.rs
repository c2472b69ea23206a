//! Operation applier (applyOps)
//!
//! Executes a batch of operations in one of two modes:
//!
//! ```text
//! Atomic:      reserve one tick T
//!              stage every op into one WriteUnit
//!              commit the unit at T          -> Applied
//!              same-document write / commit conflict
//!                                            -> ConflictDetected { T }
//!                                            -> rerun once Non-atomic, reusing T
//!
//! Non-atomic:  for each op: pick its timestamp, own WriteUnit, commit
//!              stop at the first failure, report partial results
//! ```
//!
//! Timestamps: a node that accepts writes and replicates them assigns every
//! timestamp itself. Otherwise an operation's explicit timestamp is honoured
//! and the cluster time advanced to it; operations without one get the next
//! tick (or, after a fallback, the tick reserved for the atomic attempt).
//!
//! A batch that contains a command, or that ends with an empty applyOps
//! marker, is always applied non-atomically. The marker itself is skipped.

use crate::observer::{ApplyOpsNotification, OpObserver, OperationNotification};
use crate::operation::{Command, Operation, OperationKind};
use crate::reply::ApplyOpsReply;
use crate::storage_interface::StorageInterface;
use std::sync::Arc;
use tidemark_catalog::CollectionEntry;
use tidemark_concurrency::{LogicalClock, OperationContext, WriteUnit};
use tidemark_core::{
    CollectionId, DocKey, Document, Error, Namespace, OpTime, ReadContext, ReplicationOracle,
    Result, Timestamp, UpdateEvaluator, ID_FIELD,
};
use tracing::{debug, info, warn};

/// How a batch is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    /// One unit of work at one timestamp
    Atomic,
    /// One unit of work per operation
    NonAtomic,
}

/// Result of a batch plus the timestamp it became visible at
#[derive(Debug)]
pub(crate) struct BatchResult {
    pub(crate) reply: ApplyOpsReply,
    /// Single timestamp of an atomic (or fallen-back) batch
    pub(crate) timestamp: Option<Timestamp>,
}

/// Outcome of an atomic attempt
#[derive(Debug)]
enum AtomicOutcome {
    Applied(BatchResult),
    ConflictDetected { timestamp: Timestamp },
}

/// Applies applyOps batches against the storage interface
pub struct OperationApplier {
    storage: Arc<StorageInterface>,
    clock: Arc<LogicalClock>,
    oracle: Arc<dyn ReplicationOracle>,
    evaluator: Arc<dyn UpdateEvaluator>,
    observer: Arc<dyn OpObserver>,
}

impl OperationApplier {
    /// Applier writing through `storage`
    pub fn new(
        storage: Arc<StorageInterface>,
        clock: Arc<LogicalClock>,
        oracle: Arc<dyn ReplicationOracle>,
        evaluator: Arc<dyn UpdateEvaluator>,
        observer: Arc<dyn OpObserver>,
    ) -> Self {
        Self {
            storage,
            clock,
            oracle,
            evaluator,
            observer,
        }
    }

    /// Storage interface
    pub fn storage(&self) -> &Arc<StorageInterface> {
        &self.storage
    }

    /// Apply `ops` against `db`
    ///
    /// Write conflicts in atomic mode never surface; the batch is rerun
    /// non-atomically once. Per-operation failures are reported in the reply.
    pub fn apply_ops(
        &self,
        ctx: &OperationContext,
        db: &str,
        ops: &[Operation],
        mode: ApplyMode,
    ) -> Result<ApplyOpsReply> {
        self.run(ctx, db, ops, mode, true).map(|batch| batch.reply)
    }

    pub(crate) fn run(
        &self,
        ctx: &OperationContext,
        db: &str,
        ops: &[Operation],
        mode: ApplyMode,
        notify: bool,
    ) -> Result<BatchResult> {
        let (ops, marker) = match ops.split_last() {
            Some((last, rest)) if last.is_empty_apply_ops() => (rest, true),
            _ => (ops, false),
        };
        let atomic = mode == ApplyMode::Atomic && !marker && !ops.iter().any(Operation::is_command);
        if mode == ApplyMode::Atomic && !atomic {
            debug!(db = db, ops = ops.len(), "batch contains commands, applying non-atomically");
        }
        if !atomic {
            return self.apply_non_atomic(ctx, db, ops, None, notify);
        }

        match self.apply_atomic(ctx, db, ops, notify)? {
            AtomicOutcome::Applied(batch) => Ok(batch),
            AtomicOutcome::ConflictDetected { timestamp } => {
                info!(db = db, ts = %timestamp, ops = ops.len(), "write conflict in atomic batch, retrying non-atomically");
                self.apply_non_atomic(ctx, db, ops, Some(timestamp), notify)
            }
        }
    }

    // ========================================================================
    // Timestamp policy
    // ========================================================================

    /// True if this node assigns the timestamps of `ctx`'s writes
    pub fn assigns_timestamps(&self, ctx: &OperationContext) -> bool {
        ctx.writes_are_replicated() && self.oracle.can_accept_writes()
    }

    fn is_logged(&self, ctx: &OperationContext, ns: &Namespace) -> bool {
        self.assigns_timestamps(ctx) && self.oracle.replication_enabled() && ns.is_replicated()
    }

    pub(crate) fn batch_logged(&self, ctx: &OperationContext, db: &str) -> bool {
        self.is_logged(ctx, &Namespace::command_ns_for(db))
    }

    fn term_of(&self, op: &Operation, self_assign: bool) -> i64 {
        op.term
            .filter(|_| !self_assign)
            .unwrap_or_else(|| self.oracle.current_term())
    }

    fn timestamp_for(
        &self,
        explicit: Option<Timestamp>,
        self_assign: bool,
        fallback: Option<Timestamp>,
    ) -> Result<Timestamp> {
        let explicit = explicit
            .and_then(Timestamp::non_null)
            .filter(|_| !self_assign);
        match (explicit, fallback) {
            (Some(ts), _) => {
                self.clock.advance_cluster_time(ts);
                Ok(ts)
            }
            (None, Some(ts)) => Ok(ts),
            (None, None) => self.clock.reserve_ticks(1),
        }
    }

    // ========================================================================
    // Resolution
    // ========================================================================

    /// Resolve the collection an operation targets
    ///
    /// A collection id wins over the namespace; if both resolve to
    /// different live collections the operation does not resolve.
    pub(crate) fn resolve(&self, op: &Operation) -> Result<CollectionEntry> {
        let catalog = self.storage.catalog();
        let by_name = catalog.lookup(&op.namespace, &ReadContext::Latest);
        let Some(id) = op.collection_id else {
            return by_name.ok_or_else(|| Error::NamespaceNotFound(op.namespace.to_string()));
        };
        let by_id = catalog
            .lookup_by_id(&id, &ReadContext::Latest)
            .ok_or_else(|| {
                Error::NamespaceNotFound(format!(
                    "no collection with id {} (namespace {})",
                    id, op.namespace
                ))
            })?;
        match by_name {
            Some(named) if named.ident != by_id.ident => Err(Error::NamespaceNotFound(format!(
                "{} and collection id {} resolve to different collections",
                op.namespace, id
            ))),
            _ => Ok(by_id),
        }
    }

    // ========================================================================
    // Atomic mode
    // ========================================================================

    fn apply_atomic(
        &self,
        ctx: &OperationContext,
        db: &str,
        ops: &[Operation],
        notify: bool,
    ) -> Result<AtomicOutcome> {
        let ts = self.clock.reserve_ticks(1)?;
        let mut unit = WriteUnit::new();
        let mut results = Vec::with_capacity(ops.len());

        for op in ops {
            let staged = self
                .resolve(op)
                .and_then(|entry| self.stage_crud(&mut unit, &entry, op, false));
            match staged {
                Ok(()) => results.push(true),
                Err(e) if e.is_write_conflict() => {
                    debug!(db = db, namespace = %op.namespace, error = %e, "conflict staging atomic batch");
                    return Ok(AtomicOutcome::ConflictDetected { timestamp: ts });
                }
                Err(e) => {
                    warn!(db = db, namespace = %op.namespace, error = %e, "atomic batch aborted");
                    results.push(false);
                    return Ok(AtomicOutcome::Applied(BatchResult {
                        reply: ApplyOpsReply::failure(&e, results),
                        timestamp: None,
                    }));
                }
            }
        }

        match self.storage.commits().commit(unit, Some(ts)) {
            Ok(()) => {}
            Err(e) if e.is_write_conflict() => {
                debug!(db = db, error = %e, "conflict committing atomic batch");
                return Ok(AtomicOutcome::ConflictDetected { timestamp: ts });
            }
            Err(e) => {
                tracing::error!(db = db, ts = %ts, error = %e, "atomic batch commit failed");
                return Ok(AtomicOutcome::Applied(BatchResult {
                    reply: ApplyOpsReply::failure(&e, vec![false; ops.len()]),
                    timestamp: None,
                }));
            }
        }

        if notify {
            self.observer.on_apply_ops(&ApplyOpsNotification {
                db: db.to_string(),
                operations: ops.to_vec(),
                optime: OpTime::new(ts, self.oracle.current_term()),
                replicated: self.batch_logged(ctx, db),
            });
        }
        Ok(AtomicOutcome::Applied(BatchResult {
            reply: ApplyOpsReply::success(results),
            timestamp: Some(ts),
        }))
    }

    // ========================================================================
    // Non-atomic mode
    // ========================================================================

    fn apply_non_atomic(
        &self,
        ctx: &OperationContext,
        db: &str,
        ops: &[Operation],
        fallback: Option<Timestamp>,
        notify: bool,
    ) -> Result<BatchResult> {
        let self_assign = self.assigns_timestamps(ctx);
        // After a fallback the batch is reported as one group at the reserved tick.
        let per_op_notify = notify && fallback.is_none();
        let mut results = Vec::with_capacity(ops.len());
        let mut applied = Vec::with_capacity(ops.len());
        let mut failure = None;

        for op in ops {
            match self.apply_one(ctx, op, self_assign, fallback, per_op_notify) {
                Ok(op) => {
                    results.push(true);
                    applied.push(op);
                }
                Err(e) => {
                    warn!(db = db, op = op.kind_name(), namespace = %op.namespace, error = %e, "operation failed, stopping batch");
                    results.push(false);
                    failure = Some(e);
                    break;
                }
            }
        }

        if let (Some(ts), true) = (fallback, notify && !applied.is_empty()) {
            self.observer.on_apply_ops(&ApplyOpsNotification {
                db: db.to_string(),
                operations: applied,
                optime: OpTime::new(ts, self.oracle.current_term()),
                replicated: self.batch_logged(ctx, db),
            });
        }

        let reply = match failure {
            Some(e) => ApplyOpsReply::failure(&e, results),
            None => ApplyOpsReply::success(results),
        };
        Ok(BatchResult {
            reply,
            timestamp: fallback,
        })
    }

    /// Apply one operation in its own unit(s); returns it as applied
    fn apply_one(
        &self,
        ctx: &OperationContext,
        op: &Operation,
        self_assign: bool,
        fallback: Option<Timestamp>,
        notify: bool,
    ) -> Result<Operation> {
        let term = self.term_of(op, self_assign);

        if let OperationKind::GroupedInsert {
            documents,
            timestamps,
        } = &op.kind
        {
            let entry = self.resolve(op)?;
            for (i, document) in documents.iter().enumerate() {
                let ts = self.timestamp_for(timestamps.get(i).copied(), self_assign, fallback)?;
                let mut unit = WriteUnit::new();
                self.stage_insert(&mut unit, &entry, &op.namespace, document.clone(), true)?;
                self.storage.commits().commit(unit, Some(ts))?;
                if notify {
                    let mut single = Operation::insert(&op.namespace, document.clone()).at(ts, term);
                    single.collection_id = entry.collection_id;
                    self.notify_one(ctx, single);
                }
            }
            return Ok(op.clone());
        }

        let ts = match &op.kind {
            OperationKind::Command { command } => {
                let ts = self.timestamp_for(op.timestamp, self_assign, fallback)?;
                self.apply_command(&op.namespace, op.collection_id, command, ts, term)?;
                ts
            }
            OperationKind::Noop { .. } => self.timestamp_for(op.timestamp, self_assign, fallback)?,
            _ => {
                let entry = self.resolve(op)?;
                let ts = self.timestamp_for(op.timestamp, self_assign, fallback)?;
                let mut unit = WriteUnit::new();
                self.stage_crud(&mut unit, &entry, op, true)?;
                self.storage.commits().commit(unit, Some(ts))?;
                ts
            }
        };

        let applied = op.clone().at(ts, term);
        if notify {
            self.notify_one(ctx, applied.clone());
        }
        Ok(applied)
    }

    fn notify_one(&self, ctx: &OperationContext, operation: Operation) {
        let optime = OpTime::new(
            operation.timestamp.unwrap_or(Timestamp::NULL),
            operation.term.unwrap_or(OpTime::UNINITIALIZED_TERM),
        );
        let replicated = self.is_logged(ctx, &operation.namespace);
        self.observer.on_operation(&OperationNotification {
            operation,
            optime,
            replicated,
        });
    }

    fn apply_command(
        &self,
        cmd_ns: &Namespace,
        collection_id: Option<CollectionId>,
        command: &Command,
        ts: Timestamp,
        term: i64,
    ) -> Result<()> {
        let db = cmd_ns.db();
        match command {
            Command::Create {
                collection,
                options,
            } => {
                let mut options = options.clone();
                if collection_id.is_some() {
                    options.collection_id = collection_id;
                }
                self.storage
                    .create_collection(&Namespace::new(db, collection.as_str()), options, Some(ts))
                    .map(|_| ())
            }
            Command::Drop { collection } => {
                let ns = Namespace::new(db, collection.as_str());
                if self
                    .storage
                    .catalog()
                    .lookup(&ns, &ReadContext::Latest)
                    .is_none()
                {
                    return Err(Error::NamespaceNotFound(ns.to_string()));
                }
                self.storage.drop_collection(&ns, Some(OpTime::new(ts, term)))
            }
            Command::RenameCollection { from, to } => {
                self.storage.rename_collection(from, to, Some(ts))
            }
            Command::CreateIndexes {
                collection,
                indexes,
            } => {
                let ns = Namespace::new(db, collection.as_str());
                for spec in indexes {
                    self.storage.create_index(&ns, spec.clone(), Some(ts))?;
                }
                Ok(())
            }
            Command::DropIndexes { collection, index } => {
                self.storage
                    .drop_index(&Namespace::new(db, collection.as_str()), index, Some(ts))
            }
            Command::ApplyOps(inner) => {
                let mut unit = WriteUnit::new();
                for op in inner {
                    match &op.kind {
                        OperationKind::Command { command } => {
                            self.apply_command(&op.namespace, op.collection_id, command, ts, term)?
                        }
                        _ => {
                            let entry = self.resolve(op)?;
                            self.stage_crud(&mut unit, &entry, op, true)?;
                        }
                    }
                }
                self.storage.commits().commit(unit, Some(ts))
            }
            Command::DropDatabase => self.storage.drop_database(db, ts).map(|_| ()),
        }
    }

    // ========================================================================
    // Document writes
    // ========================================================================

    fn stage_insert(
        &self,
        unit: &mut WriteUnit,
        entry: &CollectionEntry,
        ns: &Namespace,
        document: Document,
        upsert: bool,
    ) -> Result<()> {
        let store = self.storage.store();
        let key = DocKey::of(&document)?;
        if !upsert
            && !unit.contains(&entry.ident, &key)
            && store.get(&entry.ident, &key, &ReadContext::Latest).is_some()
        {
            return Err(Error::DuplicateKey {
                namespace: ns.to_string(),
                key: key.to_string(),
            });
        }
        unit.stage(store, entry.ident.clone(), key, Some(document))
    }

    /// Stage a CRUD operation; `upsert_inserts` turns duplicate inserts into replaces
    fn stage_crud(
        &self,
        unit: &mut WriteUnit,
        entry: &CollectionEntry,
        op: &Operation,
        upsert_inserts: bool,
    ) -> Result<()> {
        let store = self.storage.store();
        match &op.kind {
            OperationKind::Insert { document } => {
                self.stage_insert(unit, entry, &op.namespace, document.clone(), upsert_inserts)
            }
            OperationKind::GroupedInsert { documents, .. } => {
                for document in documents {
                    self.stage_insert(unit, entry, &op.namespace, document.clone(), upsert_inserts)?;
                }
                Ok(())
            }
            OperationKind::Update {
                filter,
                modifier,
                upsert,
            } => {
                let id = selected_id(filter)?;
                let key = DocKey::from_id(id);
                let updated = match unit.get(store, &entry.ident, &key, &ReadContext::Latest) {
                    Some(base) => self.evaluator.apply(&base, modifier)?,
                    None if *upsert => {
                        let mut seed = Document::new();
                        seed.insert(ID_FIELD.to_string(), id.clone());
                        self.evaluator.apply(&seed, modifier)?
                    }
                    None => {
                        return Err(Error::UpdateOperationFailed(format!(
                            "no document with _id {} in {}",
                            id, op.namespace
                        )))
                    }
                };
                unit.stage(store, entry.ident.clone(), key, Some(updated))
            }
            OperationKind::Delete { filter } => {
                let key = DocKey::from_id(selected_id(filter)?);
                let present = unit
                    .get(store, &entry.ident, &key, &ReadContext::Latest)
                    .is_some();
                if !present && !unit.contains(&entry.ident, &key) {
                    return Ok(());
                }
                unit.stage(store, entry.ident.clone(), key, None)
            }
            OperationKind::Command { .. } | OperationKind::Noop { .. } => Ok(()),
        }
    }
}

fn selected_id(filter: &Document) -> Result<&serde_json::Value> {
    filter
        .get(ID_FIELD)
        .ok_or_else(|| Error::BadValue("operation filter must select by _id".into()))
}

impl std::fmt::Debug for OperationApplier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationApplier")
            .field("storage", &self.storage)
            .finish()
    }
}
