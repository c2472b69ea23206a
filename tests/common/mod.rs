//! Shared fixtures for the integration suites
//!
//! `TestNode` mirrors a freshly started replica with three reference
//! timestamps reserved from its clock: `past`, `present` (the node's last
//! applied optime) and `future` (the next tick the clock will hand out).

#![allow(dead_code)]

use parking_lot::Mutex;
use std::sync::Arc;
use tidemark::catalog::CollectionOptions;
use tidemark::concurrency::OperationContext;
use tidemark::core::{CollectionId, Document, Ident, Namespace, OpTime, ReadContext, Timestamp};
use tidemark::repl::{
    ApplyMode, ApplyOpsNotification, ApplyOpsReply, OpObserver, Operation,
    OperationNotification,
};
use tidemark::{Node, NodeBuilder};

/// Install the fmt subscriber once per test binary
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

// =============================================================================
// RECORDING OBSERVER
// =============================================================================

/// Observer that keeps every notification it receives
#[derive(Default)]
pub struct RecordingObserver {
    pub operations: Mutex<Vec<OperationNotification>>,
    pub batches: Mutex<Vec<ApplyOpsNotification>>,
}

impl RecordingObserver {
    pub fn operation_count(&self) -> usize {
        self.operations.lock().len()
    }

    pub fn batch_count(&self) -> usize {
        self.batches.lock().len()
    }

    pub fn last_batch(&self) -> Option<ApplyOpsNotification> {
        self.batches.lock().last().cloned()
    }

    pub fn clear(&self) {
        self.operations.lock().clear();
        self.batches.lock().clear();
    }
}

impl OpObserver for RecordingObserver {
    fn on_operation(&self, notification: &OperationNotification) {
        self.operations.lock().push(notification.clone());
    }

    fn on_apply_ops(&self, notification: &ApplyOpsNotification) {
        self.batches.lock().push(notification.clone());
    }
}

// =============================================================================
// TEST NODE
// =============================================================================

pub const PRESENT_TERM: i64 = 1;

pub struct TestNode {
    pub node: Node,
    pub recorder: Arc<RecordingObserver>,
    pub past: Timestamp,
    pub present: Timestamp,
    pub future: Timestamp,
}

impl TestNode {
    /// Node that accepts writes and assigns their timestamps
    pub fn primary() -> Self {
        Self::with_builder(Node::builder().primary())
    }

    /// Node that replays operations at the timestamps it is given
    pub fn secondary() -> Self {
        Self::with_builder(Node::builder().secondary())
    }

    pub fn with_builder(builder: NodeBuilder) -> Self {
        init_tracing();
        let recorder = Arc::new(RecordingObserver::default());
        let node = builder
            .term(PRESENT_TERM)
            .observer(recorder.clone())
            .build()
            .expect("node builds");

        let past = node.clock().reserve_ticks(1).expect("reserve past");
        let present = node.clock().reserve_ticks(1).expect("reserve present");
        let future = present.add_ticks(1);
        if let Some(state) = node.replication_state() {
            state.set_my_last_applied_optime(OpTime::new(present, PRESENT_TERM));
        }

        Self {
            node,
            recorder,
            past,
            present,
            future,
        }
    }

    pub fn ctx(&self) -> OperationContext {
        self.node.operation_context()
    }

    /// Context whose writes are not replicated, so explicit timestamps are honoured
    pub fn unreplicated_ctx(&self) -> OperationContext {
        let mut ctx = self.node.operation_context();
        ctx.set_replicated_writes(false);
        ctx
    }

    pub fn reserve(&self, n: u64) -> Timestamp {
        self.node.clock().reserve_ticks(n).expect("reserve ticks")
    }

    /// Create `ns` untimestamped with a fresh collection id, returning the id
    pub fn reset(&self, ns: &Namespace) -> CollectionId {
        if let Some(entry) = self.node.catalog().lookup(ns, &ReadContext::Latest) {
            if let Some(id) = entry.collection_id {
                return id;
            }
        }
        let id = CollectionId::new();
        self.node
            .storage()
            .create_collection(ns, CollectionOptions::with_id(id), None)
            .expect("create collection");
        id
    }

    /// Read view for `ts`, selected through a snapshot session
    pub fn read_at(&self, ts: Timestamp) -> ReadContext {
        let mut ctx = self.node.operation_context();
        ctx.select_snapshot(ts).expect("select snapshot");
        ctx.read_context()
    }

    pub fn count_at(&self, ns: &Namespace, ts: Timestamp) -> usize {
        let read = self.read_at(ts);
        self.node.storage().count(ns, &read).unwrap_or(0)
    }

    /// The single document of `ns` at `ts`, if any
    pub fn find_one_at(&self, ns: &Namespace, ts: Timestamp) -> Option<Document> {
        let read = self.read_at(ts);
        self.node
            .storage()
            .find_all(ns, &read)
            .ok()
            .and_then(|docs| docs.into_iter().next())
    }

    pub fn idents_at(&self, ts: Timestamp) -> Vec<Ident> {
        self.node.catalog().all_idents(&self.read_at(ts))
    }

    /// Collection and index idents of the live collection named `ns`
    pub fn idents_of(&self, ns: &Namespace) -> Vec<Ident> {
        self.node
            .catalog()
            .lookup(ns, &ReadContext::Latest)
            .map(|entry| entry.all_idents())
            .unwrap_or_default()
    }

    pub fn assert_namespace_in_idents(&self, ns: &Namespace, ts: Timestamp, expected: bool) {
        let ident = self
            .node
            .catalog()
            .lookup(ns, &ReadContext::Latest)
            .map(|entry| entry.ident)
            .expect("namespace exists at latest");
        let found = self.idents_at(ts).contains(&ident);
        assert_eq!(
            found, expected,
            "{} in idents at {}: expected {}, found {}",
            ns, ts, expected, found
        );
    }

    pub fn assert_idents_exist_at(&self, idents: &[Ident], ts: Timestamp) {
        let all = self.idents_at(ts);
        for ident in idents {
            assert!(all.contains(ident), "{} missing at {}", ident, ts);
        }
    }

    pub fn assert_idents_missing_at(&self, idents: &[Ident], ts: Timestamp) {
        let all = self.idents_at(ts);
        for ident in idents {
            assert!(!all.contains(ident), "{} present at {}", ident, ts);
        }
    }

    /// Atomic applyOps
    pub fn atomic(&self, ctx: &OperationContext, db: &str, ops: Vec<Operation>) -> ApplyOpsReply {
        self.node
            .apply_ops(ctx, db, &ops, ApplyMode::Atomic)
            .expect("applyOps")
    }

    /// applyOps with a trailing empty applyOps marker at `marker_ts`
    ///
    /// The marker makes the batch non-atomic even though atomic mode is asked for.
    pub fn non_atomic(
        &self,
        ctx: &OperationContext,
        db: &str,
        mut ops: Vec<Operation>,
        marker_ts: Timestamp,
    ) -> ApplyOpsReply {
        ops.push(Operation::apply_ops_marker("test", marker_ts));
        self.node
            .apply_ops(ctx, db, &ops, ApplyMode::Atomic)
            .expect("applyOps")
    }
}
