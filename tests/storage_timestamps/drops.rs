//! Collection and Database Drops
//!
//! Replicated drops are two-phase: the collection is first renamed to a
//! drop-pending name, then the reaper removes its idents at the cluster
//! time it runs at. Node-local collections are purged outright.

use crate::common::{TestNode, PRESENT_TERM};
use tidemark::catalog::CollectionOptions;
use tidemark::core::{Namespace, OpTime, ReadContext, Timestamp};
use tidemark::repl::{Command, Operation};

// =============================================================================
// REAPER
// =============================================================================

#[test]
fn test_reaper_drop_is_timestamped() {
    let t = TestNode::primary();
    let ctx = t.ctx();
    let nss = Namespace::new("unittests", "reaperDropIsTimestamped");
    t.reset(&nss);
    let idents = t.idents_of(&nss);

    let drop = Operation::command(
        "unittests",
        Command::Drop {
            collection: nss.coll().to_string(),
        },
    );
    let reply = t.atomic(&ctx, "unittests", vec![drop]);
    assert!(reply.ok);

    // The drop took the next tick and parked the collection
    let drop_optime = OpTime::new(t.future, PRESENT_TERM);
    let pending = nss.drop_pending(drop_optime);
    assert_eq!(t.node.reaper().pending(), vec![(drop_optime, pending.clone())]);
    assert_eq!(t.idents_of(&pending), idents);

    let post_rename = t.reserve(2);
    assert_eq!(
        t.node.drop_collections_older_than(drop_optime).unwrap(),
        1
    );
    let post_drop = t.reserve(1);

    t.assert_idents_exist_at(&idents, t.present);
    t.assert_idents_exist_at(&idents, t.future);
    t.assert_idents_exist_at(&idents, post_rename);
    t.assert_idents_missing_at(&idents, post_drop);
    t.assert_idents_missing_at(&idents, Timestamp::NULL);
}

#[test]
fn test_reaper_leaves_newer_drops_pending() {
    let t = TestNode::secondary();
    let first = Namespace::new("unittests", "reapedFirst");
    let second = Namespace::new("unittests", "reapedSecond");
    t.reset(&first);
    t.reset(&second);

    let storage = t.node.storage();
    storage
        .drop_collection(&first, Some(OpTime::new(t.future, PRESENT_TERM)))
        .unwrap();
    storage
        .drop_collection(&second, Some(OpTime::new(t.future.add_ticks(2), PRESENT_TERM)))
        .unwrap();
    assert_eq!(t.node.reaper().pending_count(), 2);

    let reaped = t
        .node
        .drop_collections_older_than(OpTime::new(t.future.add_ticks(1), PRESENT_TERM))
        .unwrap();

    assert_eq!(reaped, 1);
    assert_eq!(
        t.node.reaper().earliest_drop_optime(),
        Some(OpTime::new(t.future.add_ticks(2), PRESENT_TERM))
    );
    assert_eq!(
        t.node
            .drop_collections_older_than(OpTime::new(t.future.add_ticks(1), PRESENT_TERM))
            .unwrap(),
        0
    );
}

#[test]
fn test_roll_back_drop_pending() {
    let t = TestNode::secondary();
    let nss = Namespace::new("unittests", "rolledBack");
    t.reset(&nss);
    let idents = t.idents_of(&nss);

    let optime = OpTime::new(t.future, PRESENT_TERM);
    t.node.storage().drop_collection(&nss, Some(optime)).unwrap();
    assert!(t.node.catalog().lookup(&nss, &ReadContext::Latest).is_none());

    let pending = nss.drop_pending(optime);
    assert!(t
        .node
        .reaper()
        .roll_back_drop_pending(optime, &pending)
        .unwrap());

    assert_eq!(t.idents_of(&nss), idents);
    assert_eq!(t.node.reaper().pending_count(), 0);
    assert!(!t
        .node
        .reaper()
        .roll_back_drop_pending(optime, &pending)
        .unwrap());
}

#[test]
fn test_local_collection_drop_is_immediate() {
    let t = TestNode::primary();
    let nss = Namespace::new("local", "scratch");
    t.reset(&nss);
    let idents = t.idents_of(&nss);

    t.node
        .storage()
        .drop_collection(&nss, Some(OpTime::new(t.future, PRESENT_TERM)))
        .unwrap();

    assert_eq!(t.node.reaper().pending_count(), 0);
    t.assert_idents_missing_at(&idents, t.past);
    t.assert_idents_missing_at(&idents, Timestamp::NULL);
    for ident in &idents {
        assert!(!t.node.storage().store().has_ident(ident));
    }
}

// =============================================================================
// DROP DATABASE
// =============================================================================

enum DropDatabaseVia {
    Storage,
    ReplayedCommand,
}

fn drop_database_scenario(t: &TestNode, via: DropDatabaseVia) {
    let db = "unittest_drop_database";
    let nss = Namespace::new(db, "coll");
    let profile = Namespace::new(db, "system.profile");
    let storage = t.node.storage();

    let sync_time = t.reserve(1);
    let create_time = t.reserve(1);
    storage
        .create_collection(&nss, CollectionOptions::default(), Some(create_time))
        .unwrap();
    storage
        .create_collection(&profile, CollectionOptions::default(), None)
        .unwrap();
    let post_create = t.reserve(1);

    let coll_idents = t.idents_of(&nss);
    let profile_idents = t.idents_of(&profile);
    assert_eq!(coll_idents.len(), 2);
    assert_eq!(profile_idents.len(), 1);

    let drop_optime = OpTime::new(t.reserve(1), PRESENT_TERM);
    storage.drop_collection(&nss, Some(drop_optime)).unwrap();
    let post_rename = t.reserve(2);
    assert_eq!(t.node.reaper().pending_count(), 1);

    match via {
        DropDatabaseVia::Storage => {
            let outcome = storage.drop_database(db, Timestamp::NULL).unwrap();
            assert_eq!(outcome.dropped, vec![nss.drop_pending(drop_optime)]);
            assert_eq!(outcome.purged, profile_idents);
        }
        DropDatabaseVia::ReplayedCommand => {
            let ctx = t.unreplicated_ctx();
            let drop_ts = t.node.clock().get_cluster_time();
            let op = Operation::command(db, Command::DropDatabase).at(drop_ts, PRESENT_TERM);
            let reply = t.non_atomic(&ctx, db, vec![op], drop_ts);
            assert!(reply.ok, "dropDatabase failed: {:?}", reply.errmsg);
        }
    }
    let post_drop = t.reserve(1);

    assert_eq!(t.node.reaper().pending_count(), 0);
    for ts in [sync_time, post_create, post_rename, post_drop, Timestamp::NULL] {
        t.assert_idents_missing_at(&profile_idents, ts);
    }
    t.assert_idents_missing_at(&coll_idents, sync_time);
    t.assert_idents_exist_at(&coll_idents, post_create);
    t.assert_idents_exist_at(&coll_idents, post_rename);
    t.assert_idents_missing_at(&coll_idents, post_drop);
    assert!(t
        .node
        .catalog()
        .list_collections(db, &ReadContext::Latest)
        .is_empty());
}

#[test]
fn test_primary_drop_database() {
    let t = TestNode::primary();
    drop_database_scenario(&t, DropDatabaseVia::Storage);
}

#[test]
fn test_secondary_drop_database() {
    let t = TestNode::secondary();
    drop_database_scenario(&t, DropDatabaseVia::ReplayedCommand);
}
