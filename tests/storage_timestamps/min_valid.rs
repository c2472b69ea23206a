//! Consistency Marker History
//!
//! The minValid singleton is versioned like any other document: each marker
//! update lands at the timestamp it is written with, untimestamped ones
//! replace the whole history.

use crate::common::{TestNode, PRESENT_TERM};
use tidemark::core::{ErrorCode, Namespace, OpTime, ReadContext, Timestamp};
use tidemark::repl::markers::{MIN_VALID_COLLECTION, MIN_VALID_DB};
use tidemark::repl::MinValidDocument;

fn min_valid_at(t: &TestNode, ts: Timestamp) -> Option<MinValidDocument> {
    t.node
        .markers()
        .get_min_valid_document(&t.read_at(ts))
        .expect("read min valid")
}

fn assert_min_valid_at(t: &TestNode, ts: Timestamp, expected: &MinValidDocument) {
    assert_eq!(
        min_valid_at(t, ts).as_ref(),
        Some(expected),
        "min valid document at {}",
        ts
    );
}

// =============================================================================
// INITIALIZATION
// =============================================================================

#[test]
fn test_initialized_document_is_visible_everywhere() {
    let t = TestNode::primary();
    let initial = MinValidDocument::default();

    for ts in [t.past, t.present, t.future, Timestamp::NULL] {
        assert_min_valid_at(&t, ts, &initial);
    }
    assert_eq!(
        t.node.markers().get_min_valid().unwrap(),
        OpTime::new(Timestamp::NULL, OpTime::UNINITIALIZED_TERM)
    );
    assert_eq!(t.node.markers().get_applied_through().unwrap(), OpTime::null());
}

#[test]
fn test_markers_live_in_local_database() {
    let t = TestNode::primary();
    let nss = Namespace::new(MIN_VALID_DB, MIN_VALID_COLLECTION);

    assert_eq!(t.node.markers().namespace(), &nss);
    assert!(!nss.is_replicated());
    assert_eq!(
        t.node.catalog().list_collections(MIN_VALID_DB, &ReadContext::at(t.past)),
        vec![nss]
    );

    t.node
        .markers()
        .set_min_valid(OpTime::new(t.future, PRESENT_TERM))
        .unwrap();
    assert!(t.node.oplog().unwrap().is_empty());
}

#[test]
fn test_initialize_is_idempotent() {
    let t = TestNode::primary();
    let markers = t.node.markers();
    markers
        .set_min_valid(OpTime::new(t.present, PRESENT_TERM))
        .unwrap();

    markers.initialize_min_valid_document().unwrap();

    assert_eq!(
        markers.get_min_valid().unwrap(),
        OpTime::new(t.present, PRESENT_TERM)
    );
}

#[test]
fn test_reset_removes_document() {
    let t = TestNode::primary();
    let markers = t.node.markers();
    markers.set_initial_sync_flag().unwrap();

    markers.reset().unwrap();

    assert_eq!(
        markers.get_min_valid_document(&ReadContext::Latest).unwrap(),
        None
    );
    assert_eq!(min_valid_at(&t, t.past), None);
    assert_eq!(
        markers.get_min_valid().unwrap_err().code(),
        ErrorCode::NoSuchKey
    );

    markers.initialize_min_valid_document().unwrap();
    assert_min_valid_at(&t, Timestamp::NULL, &MinValidDocument::default());
}

// =============================================================================
// INITIAL SYNC FLAG
// =============================================================================

#[test]
fn test_initial_sync_flag() {
    let t = TestNode::primary();
    let markers = t.node.markers();

    markers.set_initial_sync_flag().unwrap();
    assert!(markers.get_initial_sync_flag().unwrap());

    let flagged = MinValidDocument {
        initial_sync_flag: true,
        ..MinValidDocument::default()
    };
    for ts in [t.past, t.present, t.future, Timestamp::NULL] {
        assert_min_valid_at(&t, ts, &flagged);
    }

    markers.clear_initial_sync_flag().unwrap();
    assert!(!markers.get_initial_sync_flag().unwrap());

    let present = OpTime::new(t.present, PRESENT_TERM);
    let cleared = MinValidDocument {
        min_valid_timestamp: t.present,
        min_valid_term: PRESENT_TERM,
        applied_through: Some(present),
        ..MinValidDocument::default()
    };
    assert_min_valid_at(&t, t.past, &flagged);
    assert_min_valid_at(&t, t.present, &cleared);
    assert_min_valid_at(&t, t.future, &cleared);
    assert_min_valid_at(&t, Timestamp::NULL, &cleared);
}

#[test]
fn test_clear_initial_sync_flag_without_applied_optime() {
    let t = TestNode::primary();
    t.node
        .replication_state()
        .unwrap()
        .set_my_last_applied_optime(OpTime::null());
    let markers = t.node.markers();

    markers.set_initial_sync_flag().unwrap();
    markers.clear_initial_sync_flag().unwrap();

    for ts in [t.past, t.present, Timestamp::NULL] {
        assert_min_valid_at(&t, ts, &MinValidDocument::default());
    }
}

// =============================================================================
// MIN VALID AND APPLIED THROUGH
// =============================================================================

#[test]
fn test_set_min_valid_to_at_least() {
    let t = TestNode::primary();
    let markers = t.node.markers();

    markers
        .set_min_valid_to_at_least(OpTime::new(t.present, PRESENT_TERM))
        .unwrap();
    markers
        .set_min_valid_to_at_least(OpTime::new(t.future, PRESENT_TERM))
        .unwrap();
    // Behind the current value: no write at all
    markers
        .set_min_valid_to_at_least(OpTime::new(t.past, PRESENT_TERM))
        .unwrap();

    let at = |ts: Timestamp| MinValidDocument {
        min_valid_timestamp: ts,
        min_valid_term: PRESENT_TERM,
        ..MinValidDocument::default()
    };
    assert_min_valid_at(&t, t.past, &MinValidDocument::default());
    assert_min_valid_at(&t, t.present, &at(t.present));
    assert_min_valid_at(&t, t.future, &at(t.future));
    assert_min_valid_at(&t, Timestamp::NULL, &at(t.future));
    assert_eq!(
        markers.get_min_valid().unwrap(),
        OpTime::new(t.future, PRESENT_TERM)
    );
}

#[test]
fn test_applied_through() {
    let t = TestNode::primary();
    let markers = t.node.markers();
    let present = OpTime::new(t.present, PRESENT_TERM);

    markers.set_applied_through(present).unwrap();
    assert_eq!(markers.get_applied_through().unwrap(), present);

    markers.clear_applied_through(t.future).unwrap();
    assert_eq!(markers.get_applied_through().unwrap(), OpTime::null());

    let through = MinValidDocument {
        applied_through: Some(present),
        ..MinValidDocument::default()
    };
    assert_min_valid_at(&t, t.past, &MinValidDocument::default());
    assert_min_valid_at(&t, t.present, &through);
    assert_min_valid_at(&t, t.future, &MinValidDocument::default());
    assert_min_valid_at(&t, Timestamp::NULL, &MinValidDocument::default());
}

#[test]
fn test_min_valid_raised_below_newer_applied_through() {
    let t = TestNode::primary();
    let markers = t.node.markers();
    let future = OpTime::new(t.future, PRESENT_TERM);
    let present = OpTime::new(t.present, PRESENT_TERM);

    markers.set_applied_through(future).unwrap();
    markers.set_min_valid_to_at_least(present).unwrap();

    assert_eq!(markers.get_min_valid().unwrap(), present);
    assert_eq!(markers.get_applied_through().unwrap(), future);
    assert_min_valid_at(
        &t,
        t.present,
        &MinValidDocument {
            min_valid_timestamp: t.present,
            min_valid_term: PRESENT_TERM,
            ..MinValidDocument::default()
        },
    );
    assert_min_valid_at(&t, t.past, &MinValidDocument::default());
}

#[test]
fn test_applied_through_does_not_move_backwards() {
    let t = TestNode::primary();
    let markers = t.node.markers();
    let future = OpTime::new(t.future, PRESENT_TERM);

    markers.set_applied_through(future).unwrap();
    markers
        .set_applied_through(OpTime::new(t.future, PRESENT_TERM - 1))
        .unwrap();
    markers
        .set_applied_through(OpTime::new(t.present, PRESENT_TERM))
        .unwrap();

    assert_eq!(markers.get_applied_through().unwrap(), future);
    assert_min_valid_at(&t, t.present, &MinValidDocument::default());
}

#[test]
fn test_old_oplog_delete_from_point() {
    let t = TestNode::primary();
    let markers = t.node.markers();
    assert_eq!(
        markers.get_old_oplog_delete_from_point().unwrap(),
        Timestamp::NULL
    );

    markers.set_old_oplog_delete_from_point(t.present).unwrap();
    assert_eq!(markers.get_old_oplog_delete_from_point().unwrap(), t.present);
    // Untimestamped: visible at every timestamp
    assert_eq!(
        min_valid_at(&t, t.past).and_then(|d| d.old_oplog_delete_from_point),
        Some(t.present)
    );

    markers.remove_old_oplog_delete_from_point().unwrap();
    assert_eq!(
        markers.get_old_oplog_delete_from_point().unwrap(),
        Timestamp::NULL
    );
}
