//! Operation observers
//!
//! The applier and the transaction translator report every applied
//! operation to an [`OpObserver`]. Observers decide what to do with it;
//! the [`OplogObserver`](crate::oplog::OplogObserver) appends replicated
//! ones to the log.

use crate::operation::{Command, Operation};
use parking_lot::RwLock;
use std::sync::Arc;
use tidemark_core::OpTime;

/// One applied operation
#[derive(Debug, Clone, PartialEq)]
pub struct OperationNotification {
    /// The operation as applied, with its effective timestamp and term
    pub operation: Operation,
    /// Optime the operation committed at
    pub optime: OpTime,
    /// True if the operation should reach the replicated log
    pub replicated: bool,
}

/// A batch applied as one logged applyOps
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyOpsNotification {
    /// Database the batch ran against
    pub db: String,
    /// Operations of the batch, possibly empty
    pub operations: Vec<Operation>,
    /// Optime the batch committed at
    pub optime: OpTime,
    /// True if the batch should reach the replicated log
    pub replicated: bool,
}

impl ApplyOpsNotification {
    /// The batch as a single applyOps command operation
    pub fn to_operation(&self) -> Operation {
        let mut op = Operation::command(&self.db, Command::ApplyOps(self.operations.clone()));
        op.timestamp = Some(self.optime.timestamp);
        op.term = Some(self.optime.term);
        op
    }
}

/// Receives applied operations
pub trait OpObserver: Send + Sync {
    /// Called after a single operation commits
    fn on_operation(&self, notification: &OperationNotification);

    /// Called after a batch commits as one applyOps
    fn on_apply_ops(&self, notification: &ApplyOpsNotification);
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl OpObserver for NoopObserver {
    fn on_operation(&self, _notification: &OperationNotification) {}

    fn on_apply_ops(&self, _notification: &ApplyOpsNotification) {}
}

/// Fans notifications out to registered observers in registration order
#[derive(Default)]
pub struct OpObserverRegistry {
    observers: RwLock<Vec<Arc<dyn OpObserver>>>,
}

impl OpObserverRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer
    pub fn add_observer(&self, observer: Arc<dyn OpObserver>) {
        self.observers.write().push(observer);
    }

    /// Number of registered observers
    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    /// True if nothing is registered
    pub fn is_empty(&self) -> bool {
        self.observers.read().is_empty()
    }
}

impl OpObserver for OpObserverRegistry {
    fn on_operation(&self, notification: &OperationNotification) {
        for observer in self.observers.read().iter() {
            observer.on_operation(notification);
        }
    }

    fn on_apply_ops(&self, notification: &ApplyOpsNotification) {
        for observer in self.observers.read().iter() {
            observer.on_apply_ops(notification);
        }
    }
}

impl std::fmt::Debug for OpObserverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpObserverRegistry")
            .field("observers", &self.len())
            .finish()
    }
}
