//! Process-scoped service context
//!
//! A [`Node`] owns one instance of every engine component and wires them
//! together: clock, history tracker, record store, commit manager, catalog,
//! drop-pending reaper, storage interface, observers, applier, translator
//! and consistency markers. Everything a request needs is reachable from it.

use crate::config::NodeConfig;
use std::sync::Arc;
use tidemark_catalog::{Catalog, CatalogConfig, DropPendingReaper};
use tidemark_concurrency::{CommitManager, LogicalClock, OperationContext};
use tidemark_core::{
    Error, OpTime, ReplicationOracle, Result, Timestamp, UpdateEvaluator,
};
use tidemark_repl::{
    ApplyMode, ApplyOpsReply, BasicModifierEvaluator, ConsistencyMarkers, DoTxnReply,
    LocalReplicationState, OpObserver, OpObserverRegistry, Operation, OperationApplier, Oplog,
    OplogObserver, ReplicationRole, StorageInterface, TransactionTranslator,
};
use tidemark_storage::{HistoryTracker, RecordStore};
use tracing::{debug, info};

/// A single replica's engine
///
/// # Example
///
/// ```ignore
/// use tidemark::prelude::*;
///
/// let node = Node::builder().secondary().build()?;
/// let ctx = node.operation_context();
/// node.apply_ops(&ctx, "test", &ops, ApplyMode::Atomic)?;
/// ```
pub struct Node {
    config: NodeConfig,
    clock: Arc<LogicalClock>,
    history: HistoryTracker,
    storage: Arc<StorageInterface>,
    oracle: Arc<dyn ReplicationOracle>,
    replication_state: Option<Arc<LocalReplicationState>>,
    observers: Arc<OpObserverRegistry>,
    oplog: Option<Arc<Oplog>>,
    applier: Arc<OperationApplier>,
    translator: TransactionTranslator,
    markers: ConsistencyMarkers,
}

impl Node {
    /// Builder with default configuration
    pub fn builder() -> NodeBuilder {
        NodeBuilder::new()
    }

    /// Node built from `config`
    pub fn from_config(config: NodeConfig) -> Result<Self> {
        NodeBuilder::new().config(config).build()
    }

    // ========================================================================
    // Components
    // ========================================================================

    /// Configuration the node was built with
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Logical clock
    pub fn clock(&self) -> &Arc<LogicalClock> {
        &self.clock
    }

    /// History retention tracker
    pub fn history(&self) -> &HistoryTracker {
        &self.history
    }

    /// Catalog
    pub fn catalog(&self) -> &Arc<Catalog> {
        self.storage.catalog()
    }

    /// Storage interface
    pub fn storage(&self) -> &Arc<StorageInterface> {
        &self.storage
    }

    /// Drop-pending reaper
    pub fn reaper(&self) -> &Arc<DropPendingReaper> {
        self.storage.reaper()
    }

    /// Replication oracle
    pub fn oracle(&self) -> &Arc<dyn ReplicationOracle> {
        &self.oracle
    }

    /// Built-in replication state, absent when a custom oracle was supplied
    pub fn replication_state(&self) -> Option<&Arc<LocalReplicationState>> {
        self.replication_state.as_ref()
    }

    /// Observer registry
    pub fn observers(&self) -> &Arc<OpObserverRegistry> {
        &self.observers
    }

    /// In-memory oplog, if enabled
    pub fn oplog(&self) -> Option<&Arc<Oplog>> {
        self.oplog.as_ref()
    }

    /// Operation applier
    pub fn applier(&self) -> &Arc<OperationApplier> {
        &self.applier
    }

    /// Transaction translator
    pub fn translator(&self) -> &TransactionTranslator {
        &self.translator
    }

    /// Consistency markers
    pub fn markers(&self) -> &ConsistencyMarkers {
        &self.markers
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Fresh operation context, replicated writes, no snapshot
    pub fn operation_context(&self) -> OperationContext {
        OperationContext::new(self.history.clone())
    }

    /// applyOps
    pub fn apply_ops(
        &self,
        ctx: &OperationContext,
        db: &str,
        ops: &[Operation],
        mode: ApplyMode,
    ) -> Result<ApplyOpsReply> {
        self.applier.apply_ops(ctx, db, ops, mode)
    }

    /// doTxn
    pub fn do_txn(
        &self,
        ctx: &OperationContext,
        db: &str,
        ops: &[Operation],
    ) -> Result<DoTxnReply> {
        self.translator.do_txn(ctx, db, ops)
    }

    /// Physically drop pending collections dropped before `optime`
    pub fn drop_collections_older_than(&self, optime: OpTime) -> Result<usize> {
        self.storage.reaper().drop_collections_older_than(optime)
    }

    /// Advance the oldest retained timestamp and reclaim what it frees
    ///
    /// Returns the effective oldest timestamp, which never passes the
    /// oldest pinned snapshot.
    pub fn set_oldest_timestamp(&self, ts: Timestamp) -> Timestamp {
        let oldest = self.history.set_oldest_timestamp(ts);
        let pruned = self.storage.store().prune(oldest);
        let reclaimed = self.storage.reclaim(oldest);
        debug!(requested = %ts, oldest = %oldest, pruned, reclaimed, "advanced oldest timestamp");
        oldest
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("config", &self.config)
            .field("cluster_time", &self.clock.get_cluster_time())
            .field("oldest_timestamp", &self.history.oldest_timestamp())
            .finish()
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`Node`]
///
/// ```ignore
/// let node = Node::builder()
///     .secondary()
///     .term(3)
///     .initial_time(100)
///     .observer(recorder)
///     .build()?;
/// ```
pub struct NodeBuilder {
    config: NodeConfig,
    oracle: Option<Arc<dyn ReplicationOracle>>,
    evaluator: Option<Arc<dyn UpdateEvaluator>>,
    observers: Vec<Arc<dyn OpObserver>>,
}

impl NodeBuilder {
    /// Builder with default configuration
    pub fn new() -> Self {
        Self {
            config: NodeConfig::default(),
            oracle: None,
            evaluator: None,
            observers: Vec::new(),
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: NodeConfig) -> Self {
        self.config = config;
        self
    }

    /// Start as primary
    pub fn primary(self) -> Self {
        self.role(ReplicationRole::Primary)
    }

    /// Start as secondary
    pub fn secondary(self) -> Self {
        self.role(ReplicationRole::Secondary)
    }

    /// Start as standalone
    pub fn standalone(self) -> Self {
        self.role(ReplicationRole::Standalone)
    }

    /// Start in `role`
    pub fn role(mut self, role: ReplicationRole) -> Self {
        self.config.replication.role = role;
        self
    }

    /// Start in `term`
    pub fn term(mut self, term: i64) -> Self {
        self.config.replication.term = term;
        self
    }

    /// Cluster time at startup
    pub fn initial_time(mut self, time: u64) -> Self {
        self.config.clock.initial_time = time;
        self
    }

    /// Whether creates allocate the `_id_` index ident
    pub fn create_id_index(mut self, enabled: bool) -> Self {
        self.config.catalog.create_id_index = enabled;
        self
    }

    /// Whether replicated writes are recorded in the oplog
    pub fn oplog(mut self, enabled: bool) -> Self {
        self.config.oplog.enabled = enabled;
        self
    }

    /// Use a custom replication oracle instead of the built-in state
    pub fn oracle(mut self, oracle: Arc<dyn ReplicationOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    /// Use a custom update evaluator
    pub fn evaluator(mut self, evaluator: Arc<dyn UpdateEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    /// Register an additional observer
    pub fn observer(mut self, observer: Arc<dyn OpObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Wire the components and initialize the consistency markers
    ///
    /// # Errors
    ///
    /// `InvalidOptions` if the configuration does not validate.
    pub fn build(self) -> Result<Node> {
        let config = self.config;
        config
            .validate()
            .map_err(|e| Error::InvalidOptions(e.to_string()))?;

        let clock = Arc::new(LogicalClock::new(Timestamp::new(config.clock.initial_time)));
        let history = HistoryTracker::new();
        let commits = Arc::new(CommitManager::new(
            Arc::new(RecordStore::new()),
            history.clone(),
        ));
        let catalog = Arc::new(Catalog::with_config(CatalogConfig {
            create_id_index: config.catalog.create_id_index,
        }));
        let reaper = Arc::new(DropPendingReaper::new(
            Arc::clone(&catalog),
            Arc::clone(&clock),
        ));
        let storage = Arc::new(StorageInterface::new(
            catalog,
            commits,
            reaper,
            Arc::clone(&clock),
        ));

        let (oracle, replication_state) = match self.oracle {
            Some(oracle) => (oracle, None),
            None => {
                let state = Arc::new(LocalReplicationState::new(
                    config.replication.role,
                    config.replication.term,
                ));
                (state.clone() as Arc<dyn ReplicationOracle>, Some(state))
            }
        };

        let observers = Arc::new(OpObserverRegistry::new());
        let oplog = config.oplog.enabled.then(|| Arc::new(Oplog::new()));
        if let Some(oplog) = &oplog {
            observers.add_observer(Arc::new(OplogObserver::new(Arc::clone(oplog))));
        }
        for observer in self.observers {
            observers.add_observer(observer);
        }

        let evaluator = self
            .evaluator
            .unwrap_or_else(|| Arc::new(BasicModifierEvaluator::new()) as Arc<dyn UpdateEvaluator>);
        let applier = Arc::new(OperationApplier::new(
            Arc::clone(&storage),
            Arc::clone(&clock),
            Arc::clone(&oracle),
            evaluator,
            observers.clone(),
        ));
        let translator = TransactionTranslator::new(
            Arc::clone(&applier),
            Arc::clone(&oracle),
            observers.clone(),
        );
        let markers = ConsistencyMarkers::new(Arc::clone(&storage), Arc::clone(&oracle));
        markers.initialize_min_valid_document()?;

        info!(
            role = ?config.replication.role,
            term = config.replication.term,
            cluster_time = config.clock.initial_time,
            oplog = config.oplog.enabled,
            "node started"
        );

        Ok(Node {
            config,
            clock,
            history,
            storage,
            oracle,
            replication_state,
            observers,
            oplog,
            applier,
            translator,
            markers,
        })
    }
}

impl Default for NodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
