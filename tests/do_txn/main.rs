//! doTxn Integration Tests
//!
//! doTxn validates a list of CRUD operations, resolves their collections
//! and applies them as one atomic batch, reported as a single applyOps.
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --test do_txn
//! ```

#[path = "../common/mod.rs"]
mod common;

use common::{TestNode, PRESENT_TERM};
use serde_json::json;
use tidemark::core::document::doc;
use tidemark::core::{CollectionId, ErrorCode, Namespace, OpTime, Timestamp};
use tidemark::repl::{status_from_reply, Command, Operation, OperationKind};

fn nss() -> Namespace {
    Namespace::new("txn", "coll")
}

fn insert(id: i64) -> Operation {
    Operation::insert(&nss(), doc(json!({"_id": id})).unwrap())
}

/// Inner operations of the last oplog entry, which must be an applyOps
fn last_logged_batch(t: &TestNode) -> Vec<Operation> {
    let entry = t
        .node
        .oplog()
        .and_then(|oplog| oplog.last())
        .expect("oplog has an entry");
    match entry.operation.kind {
        OperationKind::Command {
            command: Command::ApplyOps(inner),
        } => inner,
        other => panic!("expected applyOps, got {:?}", other),
    }
}

// =============================================================================
// NOTIFICATIONS
// =============================================================================

#[test]
fn test_empty_transaction_is_logged_once() {
    let t = TestNode::primary();

    let reply = t.node.do_txn(&t.ctx(), "txn", &[]).unwrap();

    assert!(reply.ok);
    assert_eq!(reply.applied, 0);
    assert_eq!(t.recorder.batch_count(), 1);
    assert_eq!(t.recorder.operation_count(), 0);
    let batch = t.recorder.last_batch().unwrap();
    assert!(batch.to_operation().is_empty_apply_ops());
    assert!(batch.replicated);
    assert_eq!(t.node.oplog().unwrap().len(), 1);
    assert!(last_logged_batch(&t).is_empty());
}

#[test]
fn test_collection_id_is_filled_in() {
    let t = TestNode::primary();
    let id = t.reset(&nss());

    let reply = t.node.do_txn(&t.ctx(), "txn", &[insert(0)]).unwrap();
    assert!(reply.ok);

    let batch = t.recorder.last_batch().unwrap();
    assert_eq!(batch.operations.len(), 1);
    assert_eq!(batch.operations[0].collection_id, Some(id));
    assert_eq!(last_logged_batch(&t)[0].collection_id, Some(id));
}

#[test]
fn test_transaction_commits_at_one_timestamp() {
    let t = TestNode::primary();
    t.reset(&nss());

    let reply = t
        .node
        .do_txn(&t.ctx(), "txn", &[insert(1), insert(2)])
        .unwrap();

    assert!(reply.ok);
    assert_eq!(reply.results, vec![true, true]);
    assert_eq!(t.count_at(&nss(), t.present), 0);
    assert_eq!(t.count_at(&nss(), t.future), 2);

    let batch = t.recorder.last_batch().unwrap();
    assert_eq!(batch.optime, OpTime::new(t.future, PRESENT_TERM));
    assert_eq!(t.recorder.batch_count(), 1);
    assert_eq!(t.node.oplog().unwrap().len(), 1);
}

#[test]
fn test_same_document_twice_still_reports_one_batch() {
    let t = TestNode::primary();
    t.reset(&nss());

    let ops = [
        Operation::insert(&nss(), doc(json!({"_id": 0, "first": true})).unwrap()),
        Operation::update(
            &nss(),
            doc(json!({"_id": 0})).unwrap(),
            doc(json!({"$set": {"second": true}})).unwrap(),
        ),
    ];
    let reply = t.node.do_txn(&t.ctx(), "txn", &ops).unwrap();

    assert!(reply.ok);
    assert_eq!(reply.results, vec![true, true]);
    assert_eq!(t.recorder.batch_count(), 1);
    assert_eq!(t.recorder.operation_count(), 0);

    let ts = t.recorder.last_batch().unwrap().optime.timestamp;
    assert_eq!(ts, t.future);
    let found = t.find_one_at(&nss(), ts).expect("document written");
    assert_eq!(found.get("first"), Some(&json!(true)));
    assert_eq!(found.get("second"), Some(&json!(true)));
}

// =============================================================================
// CRUD
// =============================================================================

#[test]
fn test_update_and_delete() {
    let t = TestNode::primary();
    t.reset(&nss());
    let storage = t.node.storage();
    storage
        .insert_document(&nss(), doc(json!({"_id": 0, "a": 1})).unwrap(), None)
        .unwrap();
    storage
        .insert_document(&nss(), doc(json!({"_id": 1})).unwrap(), None)
        .unwrap();

    let ops = [
        Operation::update(
            &nss(),
            doc(json!({"_id": 0})).unwrap(),
            doc(json!({"$inc": {"a": 1}})).unwrap(),
        ),
        Operation::delete(&nss(), doc(json!({"_id": 1})).unwrap()),
    ];
    let reply = t.node.do_txn(&t.ctx(), "txn", &ops).unwrap();

    assert!(reply.ok);
    assert_eq!(t.count_at(&nss(), t.present), 2);
    assert_eq!(t.count_at(&nss(), t.future), 1);
    assert_eq!(
        t.find_one_at(&nss(), t.future),
        Some(doc(json!({"_id": 0, "a": 2})).unwrap())
    );
}

#[test]
fn test_failed_operation_applies_nothing() {
    let t = TestNode::primary();
    t.reset(&nss());
    t.node
        .storage()
        .insert_document(&nss(), doc(json!({"_id": 9})).unwrap(), None)
        .unwrap();

    let reply = t
        .node
        .do_txn(&t.ctx(), "txn", &[insert(8), insert(9)])
        .unwrap();

    assert!(!reply.ok);
    assert_eq!(reply.code, Some(ErrorCode::DuplicateKey.as_i32()));
    assert_eq!(reply.results, vec![true, false]);
    assert_eq!(t.count_at(&nss(), Timestamp::NULL), 1);
    assert_eq!(t.recorder.batch_count(), 0);
    assert!(t.node.oplog().unwrap().is_empty());
}

// =============================================================================
// VALIDATION
// =============================================================================

#[test]
fn test_unknown_collection_id_is_rejected() {
    let t = TestNode::primary();
    t.reset(&nss());

    let op = insert(0).with_collection_id(CollectionId::new());
    let err = t.node.do_txn(&t.ctx(), "txn", &[op]).unwrap_err();

    assert_eq!(err.code(), ErrorCode::UnknownError);
    assert_eq!(err.root_code(), ErrorCode::NamespaceNotFound);
    assert_eq!(t.count_at(&nss(), Timestamp::NULL), 0);
    assert_eq!(t.recorder.batch_count(), 0);
}

#[test]
fn test_invalid_second_operation_rejects_whole_transaction() {
    let t = TestNode::primary();
    t.reset(&nss());
    let missing = Namespace::new("txn", "missing");

    let ops = [
        insert(0),
        Operation::insert(&missing, doc(json!({"_id": 1})).unwrap()),
    ];
    let err = t.node.do_txn(&t.ctx(), "txn", &ops).unwrap_err();

    assert_eq!(err.root_code(), ErrorCode::NamespaceNotFound);
    assert_eq!(t.count_at(&nss(), Timestamp::NULL), 0);
    assert_eq!(t.node.clock().get_cluster_time(), t.present);
}

#[test]
fn test_commands_are_rejected() {
    let t = TestNode::primary();
    let create = Operation::command(
        "txn",
        Command::Create {
            collection: "viaTxn".to_string(),
            options: Default::default(),
        },
    );

    let err = t.node.do_txn(&t.ctx(), "txn", &[create]).unwrap_err();

    assert_eq!(err.code(), ErrorCode::UnknownError);
    assert_eq!(err.root_code(), ErrorCode::InvalidOptions);
    assert!(t
        .node
        .catalog()
        .lookup(&Namespace::new("txn", "viaTxn"), &Default::default())
        .is_none());
}

#[test]
fn test_secondary_rejects_replicated_transaction() {
    let t = TestNode::secondary();
    t.reset(&nss());

    let err = t.node.do_txn(&t.ctx(), "txn", &[insert(0)]).unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotWritablePrimary);

    // Unreplicated writes are local and allowed anywhere
    let reply = t
        .node
        .do_txn(&t.unreplicated_ctx(), "txn", &[insert(0)])
        .unwrap();
    assert!(reply.ok);
    assert!(!t.recorder.last_batch().unwrap().replicated);
}

// =============================================================================
// REPLIES
// =============================================================================

#[test]
fn test_reply_document_shape() {
    let t = TestNode::primary();
    t.reset(&nss());

    let reply = t
        .node
        .do_txn(&t.ctx(), "txn", &[insert(0), insert(1)])
        .unwrap();

    assert_eq!(
        reply.to_document(),
        json!({"ok": true, "applied": 2, "results": [true, true]})
    );
    assert!(status_from_reply(&reply.to_document()).is_ok());
}

#[test]
fn test_status_from_reply_without_ok_field() {
    assert!(status_from_reply(&json!({})).is_ok());
    assert!(status_from_reply(&json!({"code": 0})).is_ok());

    let err = status_from_reply(&json!({"code": 26, "errmsg": "no such ns"})).unwrap_err();
    assert_eq!(err.code(), ErrorCode::NamespaceNotFound);
    assert!(err.to_string().contains("no such ns"));

    let err = status_from_reply(&json!({"ok": 0})).unwrap_err();
    assert_eq!(err.code(), ErrorCode::UnknownError);
}
