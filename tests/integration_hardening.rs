//! Hardening tests for the vector search surface and for error-path
//! behavior across the coordinator, exercised only through
//! `koredb::coordinator::Coordinator`.

use koredb::coordinator::Coordinator;
use koredb::engine::EngineConfig;
use tempfile::TempDir;

fn open() -> (TempDir, Coordinator) {
    let dir = TempDir::new().unwrap();
    let db = Coordinator::open(dir.path(), EngineConfig::default()).unwrap();
    (dir, db)
}

// ================================================================================================
// Vector search
// ================================================================================================

/// # Scenario
/// Two orthogonal vectors and one exact duplicate of the query: the
/// duplicate and the query itself score ~1.0, the orthogonal vector
/// scores ~0.0.
#[test]
fn orthogonal_and_parallel_vectors_score_as_expected() {
    let (_dir, db) = open();
    db.vector_insert("docs", b"a", &[1.0, 0.0, 0.0]).unwrap();
    db.vector_insert("docs", b"b", &[0.0, 1.0, 0.0]).unwrap();
    db.vector_insert("docs", b"c", &[1.0, 0.0, 0.0]).unwrap();
    db.vector_drain("docs").unwrap();

    let results = db.vector_search("docs", &[1.0, 0.0, 0.0], 3).unwrap();
    assert_eq!(results.len(), 3);

    let top_two: std::collections::HashSet<_> = results[..2].iter().map(|(id, _)| id.clone()).collect();
    assert_eq!(
        top_two,
        std::collections::HashSet::from([b"a".to_vec(), b"c".to_vec()])
    );
    assert!((results[0].1 - 1.0).abs() < 1e-3);
    assert!((results[1].1 - 1.0).abs() < 1e-3);
    assert!((results[2].1 - 0.0).abs() < 1e-3);
}

/// # Scenario
/// A vector search issued before the background indexer has ever run
/// (cold collection) still finds results via the brute-force KV scan.
#[test]
fn cold_collection_search_falls_back_to_kv_scan() {
    let (_dir, db) = open();
    db.vector_insert("cold", b"a", &[1.0, 0.0]).unwrap();
    // No drain: search may race the indexer, but either the warm HNSW
    // path or the cold brute-force fallback must find the exact match.
    let results = db.vector_search("cold", &[1.0, 0.0], 1).unwrap();
    assert_eq!(results[0].0, b"a".to_vec());
}

/// # Scenario
/// Batched vector inserts are all searchable after one drain.
#[test]
fn batch_insert_then_drain_makes_every_vector_searchable() {
    let (_dir, db) = open();
    db.vector_insert_batch(
        "docs",
        &[
            (b"a".to_vec(), vec![1.0, 0.0]),
            (b"b".to_vec(), vec![0.0, 1.0]),
            (b"c".to_vec(), vec![0.7, 0.7]),
        ],
    )
    .unwrap();
    db.vector_drain("docs").unwrap();

    let results = db.vector_search("docs", &[1.0, 0.0], 3).unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].0, b"a".to_vec());
}

/// # Scenario
/// Vectors are partitioned by collection: a query against one collection
/// never returns ids inserted into a different collection.
#[test]
fn collections_are_isolated() {
    let (_dir, db) = open();
    db.vector_insert("cats", b"a", &[1.0, 0.0]).unwrap();
    db.vector_insert("dogs", b"b", &[1.0, 0.0]).unwrap();
    db.vector_drain("cats").unwrap();
    db.vector_drain("dogs").unwrap();

    let results = db.vector_search("cats", &[1.0, 0.0], 10).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0, b"a".to_vec());
}

// ================================================================================================
// Error paths
// ================================================================================================

/// # Scenario
/// `write_batch` rejects an empty record list rather than silently
/// succeeding or writing nothing observable.
#[test]
fn empty_write_batch_is_rejected() {
    let (_dir, db) = open();
    assert!(db.write_batch(&[], true).is_err());
}

/// # Scenario
/// A key containing `:` in a graph component is rejected before any
/// write reaches the engine.
#[test]
fn graph_component_with_colon_is_rejected() {
    let (_dir, db) = open();
    let bad = koredb::graph::Node {
        id: "bad:id".to_string(),
        labels: vec!["User".to_string()],
        properties: vec![],
    };
    assert!(db.put_node(&bad).is_err());
}

/// # Scenario
/// Operations against an unknown collection/id simply return empty or
/// `None` results rather than erroring — reads are total functions over
/// the key space.
#[test]
fn reads_on_unknown_ids_are_total() {
    let (_dir, db) = open();
    assert_eq!(db.get_node("ghost").unwrap(), None);
    assert_eq!(db.get_doc("ghost", "ghost").unwrap(), None);
    assert!(db.outbound_target_ids("ghost", "FOLLOWS").unwrap().is_empty());
    assert!(db.lookup_by_index("ghost", "name", "ghost").unwrap().is_empty());
}

/// # Scenario
/// `close()` can be called on an engine that was never written to, and a
/// subsequent reopen starts out empty.
#[test]
fn close_on_empty_database_then_reopen_is_empty() {
    let dir = TempDir::new().unwrap();
    let db = Coordinator::open(dir.path(), EngineConfig::default()).unwrap();
    db.close().unwrap();

    let db = Coordinator::open(dir.path(), EngineConfig::default()).unwrap();
    assert_eq!(db.get(b"anything").unwrap(), None);
}
