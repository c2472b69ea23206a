//! Catalog Visibility
//!
//! Collection and index idents exist exactly from the timestamp of the
//! command that created them until the timestamp of the one that removed them.

use crate::common::{TestNode, PRESENT_TERM};
use serde_json::json;
use tidemark::catalog::{CollectionOptions, IndexSpec};
use tidemark::core::document::doc;
use tidemark::core::{CollectionId, Namespace, OpTime, ReadContext, Timestamp};
use tidemark::repl::{Command, Operation, OperationKind};

fn create_op(nss: &Namespace, id: CollectionId) -> Operation {
    Operation::command(
        nss.db(),
        Command::Create {
            collection: nss.coll().to_string(),
            options: CollectionOptions::default(),
        },
    )
    .with_collection_id(id)
}

// =============================================================================
// COLLECTION CREATION
// =============================================================================

#[test]
fn test_secondary_create_collection() {
    let t = TestNode::primary();
    let ctx = t.unreplicated_ctx();
    let nss = Namespace::new("unittests", "secondaryCreateCollection");

    let op = create_op(&nss, CollectionId::new()).at(t.present, PRESENT_TERM);
    let reply = t.non_atomic(&ctx, "unittests", vec![op], t.present);
    assert!(reply.ok, "create failed: {:?}", reply.errmsg);

    t.assert_namespace_in_idents(&nss, t.past, false);
    t.assert_namespace_in_idents(&nss, t.present, true);
    t.assert_namespace_in_idents(&nss, t.future, true);
    t.assert_namespace_in_idents(&nss, Timestamp::NULL, true);

    let catalog = t.node.catalog();
    assert!(catalog
        .list_collections("unittests", &ReadContext::at(t.past))
        .is_empty());
    assert_eq!(
        catalog.list_collections("unittests", &ReadContext::at(t.present)),
        vec![nss.clone()]
    );
}

#[test]
fn test_secondary_create_two_collections() {
    let t = TestNode::primary();
    let ctx = t.unreplicated_ctx();
    let db = "unittest_two_collections";
    let nss1 = Namespace::new(db, "coll1");
    let nss2 = Namespace::new(db, "coll2");

    let ops = vec![
        create_op(&nss1, CollectionId::new()).at(t.present, PRESENT_TERM),
        create_op(&nss2, CollectionId::new()).at(t.future, PRESENT_TERM),
    ];
    let reply = t.non_atomic(&ctx, db, ops, t.future.add_ticks(1));
    assert!(reply.ok);
    assert_eq!(reply.applied, 2);

    t.assert_namespace_in_idents(&nss1, t.past, false);
    t.assert_namespace_in_idents(&nss1, t.present, true);
    t.assert_namespace_in_idents(&nss1, t.future, true);
    t.assert_namespace_in_idents(&nss1, Timestamp::NULL, true);

    t.assert_namespace_in_idents(&nss2, t.past, false);
    t.assert_namespace_in_idents(&nss2, t.present, false);
    t.assert_namespace_in_idents(&nss2, t.future, true);
    t.assert_namespace_in_idents(&nss2, Timestamp::NULL, true);
}

#[test]
fn test_secondary_create_collection_between_inserts() {
    let t = TestNode::primary();
    let ctx = t.unreplicated_ctx();
    let db = "unittest_between_inserts";
    let nss1 = Namespace::new(db, "coll1");
    let nss2 = Namespace::new(db, "coll2");
    let id1 = t.reset(&nss1);
    let id2 = CollectionId::new();

    let insert_time = t.reserve(3);
    let ops = vec![
        Operation::insert(&nss1, doc(json!({"_id": 0, "field": "a"})).unwrap())
            .with_collection_id(id1)
            .at(insert_time, PRESENT_TERM),
        create_op(&nss2, id2).at(insert_time.add_ticks(1), PRESENT_TERM),
        Operation::insert(&nss2, doc(json!({"_id": 1, "field": "b"})).unwrap())
            .with_collection_id(id2)
            .at(insert_time.add_ticks(2), PRESENT_TERM),
    ];
    let reply = t.non_atomic(&ctx, db, ops, insert_time.add_ticks(2));
    assert!(reply.ok, "batch failed: {:?}", reply.errmsg);
    assert_eq!(reply.results, vec![true, true, true]);

    assert_eq!(t.count_at(&nss1, t.present), 0);
    assert_eq!(t.count_at(&nss1, insert_time), 1);

    let coll2 = t
        .node
        .storage()
        .collection(&nss2, &ReadContext::Latest)
        .expect("coll2 exists");
    assert!(!coll2.exists_at(&ReadContext::at(insert_time)));
    assert!(coll2.exists_at(&ReadContext::at(insert_time.add_ticks(1))));
    assert_eq!(coll2.count(&ReadContext::at(insert_time.add_ticks(1))), 0);
    assert_eq!(coll2.count(&ReadContext::at(insert_time.add_ticks(2))), 1);
    assert_eq!(
        coll2.find_by_id(&json!(1), &ReadContext::at(insert_time.add_ticks(2))),
        Some(doc(json!({"_id": 1, "field": "b"})).unwrap())
    );
}

#[test]
fn test_primary_create_collection_in_apply_ops() {
    let t = TestNode::primary();
    let ctx = t.ctx();
    let nss = Namespace::new("unittests", "primaryCreateCollectionInApplyOps");

    // Caller timestamps are ignored on a primary; the create takes the next tick.
    let op = create_op(&nss, CollectionId::new()).at(t.past, PRESENT_TERM);
    let reply = t.atomic(&ctx, "unittests", vec![op]);
    assert!(reply.ok);
    assert_eq!(reply.applied, 1);

    let oplog = t.node.oplog().expect("oplog enabled");
    let last = oplog.last().expect("create was logged");
    assert_eq!(last.optime, OpTime::new(t.future, PRESENT_TERM));
    assert_eq!(last.operation.namespace, Namespace::command_ns_for("unittests"));
    assert!(matches!(
        last.operation.kind,
        OperationKind::Command {
            command: Command::Create { .. }
        }
    ));

    t.assert_namespace_in_idents(&nss, t.past, false);
    t.assert_namespace_in_idents(&nss, t.present, false);
    t.assert_namespace_in_idents(&nss, t.future, true);
    t.assert_namespace_in_idents(&nss, Timestamp::NULL, true);
}

#[test]
fn test_create_of_existing_namespace_fails() {
    let t = TestNode::primary();
    let ctx = t.unreplicated_ctx();
    let nss = Namespace::new("unittests", "alreadyThere");
    t.reset(&nss);

    let op = create_op(&nss, CollectionId::new()).at(t.future, PRESENT_TERM);
    let reply = t.non_atomic(&ctx, "unittests", vec![op], t.future);

    assert!(!reply.ok);
    assert_eq!(reply.code, Some(48));
    assert_eq!(reply.results, vec![false]);
}

// =============================================================================
// DROP AND RENAME
// =============================================================================

#[test]
fn test_handle_outlives_two_phase_drop() {
    let t = TestNode::secondary();
    let ctx = t.ctx();
    let nss = Namespace::new("unittests", "twoPhaseDrop");
    let id = CollectionId::new();

    let create_ts = t.future.add_ticks(1);
    let insert_ts = t.future.add_ticks(3);
    let drop_ts = t.future.add_ticks(4);

    let setup = vec![
        create_op(&nss, id).at(create_ts, PRESENT_TERM),
        Operation::insert(&nss, doc(json!({"_id": 0})).unwrap())
            .with_collection_id(id)
            .at(insert_ts, PRESENT_TERM),
    ];
    assert!(t.non_atomic(&ctx, "unittests", setup, insert_ts).ok);

    let handle = t
        .node
        .storage()
        .collection(&nss, &ReadContext::Latest)
        .expect("collection created");

    let drop = Operation::command(
        "unittests",
        Command::Drop {
            collection: nss.coll().to_string(),
        },
    )
    .at(drop_ts, PRESENT_TERM);
    assert!(t.non_atomic(&ctx, "unittests", vec![drop], drop_ts).ok);

    // Drop-pending: gone by name, ident still there
    assert!(t.node.storage().collection(&nss, &ReadContext::Latest).is_none());
    assert!(t
        .node
        .storage()
        .collection(&nss, &ReadContext::at(insert_ts))
        .is_some());
    assert_eq!(t.node.reaper().pending_count(), 1);
    assert!(handle.exists_at(&ReadContext::Latest));

    let reap_ts = t.reserve(1);
    assert_eq!(reap_ts, drop_ts.add_ticks(1));
    let dropped = t
        .node
        .drop_collections_older_than(OpTime::new(drop_ts, PRESENT_TERM))
        .unwrap();
    assert_eq!(dropped, 1);
    assert_eq!(t.node.reaper().pending_count(), 0);

    assert!(!handle.exists_at(&ReadContext::at(t.future)));
    assert!(handle.exists_at(&ReadContext::at(create_ts.add_ticks(1))));
    assert!(handle.exists_at(&ReadContext::at(drop_ts)));
    assert!(!handle.exists_at(&ReadContext::at(reap_ts)));
    assert!(!handle.exists_at(&ReadContext::at(reap_ts.add_ticks(1))));

    assert_eq!(handle.count(&ReadContext::at(create_ts.add_ticks(1))), 0);
    assert_eq!(handle.count(&ReadContext::at(drop_ts)), 1);
    assert_eq!(handle.count(&ReadContext::at(reap_ts)), 0);
}

#[test]
fn test_drop_of_missing_collection_fails() {
    let t = TestNode::secondary();
    let ctx = t.ctx();

    let drop = Operation::command(
        "unittests",
        Command::Drop {
            collection: "neverCreated".to_string(),
        },
    )
    .at(t.future, PRESENT_TERM);
    let reply = t.non_atomic(&ctx, "unittests", vec![drop], t.future);

    assert!(!reply.ok);
    assert_eq!(reply.code, Some(26));
    assert_eq!(t.node.reaper().pending_count(), 0);
}

#[test]
fn test_rename_keeps_idents() {
    let t = TestNode::primary();
    let ctx = t.unreplicated_ctx();
    let from = Namespace::new("unittests", "renameFrom");
    let to = Namespace::new("unittests", "renameTo");
    t.reset(&from);
    let idents = t.idents_of(&from);

    let op = Operation::command(
        "unittests",
        Command::RenameCollection {
            from: from.clone(),
            to: to.clone(),
        },
    )
    .at(t.future, PRESENT_TERM);
    assert!(t.non_atomic(&ctx, "unittests", vec![op], t.future).ok);

    assert_eq!(t.idents_of(&to), idents);
    t.assert_idents_exist_at(&idents, t.present);
    t.assert_idents_exist_at(&idents, t.future);

    let catalog = t.node.catalog();
    assert!(catalog.lookup(&from, &ReadContext::at(t.present)).is_some());
    assert!(catalog.lookup(&to, &ReadContext::at(t.present)).is_none());
    assert!(catalog.lookup(&from, &ReadContext::at(t.future)).is_none());
    assert!(catalog.lookup(&to, &ReadContext::at(t.future)).is_some());
}

// =============================================================================
// INDEXES
// =============================================================================

#[test]
fn test_create_and_drop_index_visibility() {
    let t = TestNode::primary();
    let ctx = t.unreplicated_ctx();
    let nss = Namespace::new("unittests", "indexVisibility");
    t.reset(&nss);

    let create = Operation::command(
        "unittests",
        Command::CreateIndexes {
            collection: nss.coll().to_string(),
            indexes: vec![IndexSpec {
                name: "a_1".to_string(),
                key: doc(json!({"a": 1})).unwrap(),
            }],
        },
    )
    .at(t.future, PRESENT_TERM);
    assert!(t.non_atomic(&ctx, "unittests", vec![create], t.future).ok);

    let catalog = t.node.catalog();
    let entry = catalog.lookup(&nss, &ReadContext::Latest).unwrap();
    let index_ident = entry.index("a_1").expect("index created").ident.clone();
    assert!(!catalog.is_ident_visible_at(&index_ident, &ReadContext::at(t.present)));
    assert!(catalog.is_ident_visible_at(&index_ident, &ReadContext::at(t.future)));
    assert_eq!(
        entry.index_names_at(&ReadContext::at(t.present)),
        vec!["_id_".to_string()]
    );

    let drop_ts = t.future.add_ticks(1);
    let drop = Operation::command(
        "unittests",
        Command::DropIndexes {
            collection: nss.coll().to_string(),
            index: "a_1".to_string(),
        },
    )
    .at(drop_ts, PRESENT_TERM);
    assert!(t.non_atomic(&ctx, "unittests", vec![drop], drop_ts).ok);

    assert!(catalog.is_ident_visible_at(&index_ident, &ReadContext::at(t.future)));
    assert!(!catalog.is_ident_visible_at(&index_ident, &ReadContext::at(drop_ts)));
    assert!(catalog.is_ident_visible_at(&entry.ident, &ReadContext::at(drop_ts)));
}

#[test]
fn test_profile_collection_has_no_id_index() {
    let t = TestNode::primary();
    let profile = Namespace::new("unittests", "system.profile");
    t.node
        .storage()
        .create_collection(&profile, CollectionOptions::default(), Some(t.future))
        .unwrap();

    let idents = t.idents_of(&profile);
    assert_eq!(idents.len(), 1);
    // Non-replicated namespaces are created untimestamped
    t.assert_idents_exist_at(&idents, t.past);
}

// =============================================================================
// RESOLUTION
// =============================================================================

#[test]
fn test_mismatched_namespace_and_collection_id() {
    let t = TestNode::secondary();
    let ctx = t.ctx();
    let nss1 = Namespace::new("unittests", "mismatchA");
    let nss2 = Namespace::new("unittests", "mismatchB");
    t.reset(&nss1);
    let id2 = t.reset(&nss2);

    let reply = t.atomic(
        &ctx,
        "unittests",
        vec![Operation::insert(&nss1, doc(json!({"_id": 0})).unwrap()).with_collection_id(id2)],
    );

    assert!(!reply.ok);
    assert_eq!(reply.code, Some(26));
    assert_eq!(t.count_at(&nss1, Timestamp::NULL), 0);
    assert_eq!(t.count_at(&nss2, Timestamp::NULL), 0);
}

#[test]
fn test_collection_id_wins_over_stale_namespace() {
    let t = TestNode::secondary();
    let ctx = t.ctx();
    let current = Namespace::new("unittests", "currentName");
    let id = t.reset(&current);
    let stale = Namespace::new("unittests", "formerName");

    let reply = t.atomic(
        &ctx,
        "unittests",
        vec![Operation::insert(&stale, doc(json!({"_id": 0})).unwrap()).with_collection_id(id)],
    );

    assert!(reply.ok);
    assert_eq!(t.count_at(&current, Timestamp::NULL), 1);
}
