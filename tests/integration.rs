//! Integration tests for the public `Coordinator` API.
//!
//! These tests exercise the full storage stack (WAL → MemTable → SSTable →
//! compaction) through `koredb::coordinator::Coordinator` only. No internal
//! modules are referenced directly.
//!
//! ## Coverage areas
//! - **Lifecycle**: open, close, wipe, persistence across reopen
//! - **CRUD**: put, get, delete, overwrite, nonexistent keys
//! - **Scan**: prefix queries, tombstone filtering, newest-wins merges
//! - **Compaction**: automatic compaction preserves live data across a
//!   flush/compaction boundary
//! - **Concurrency**: multi-thread writes, concurrent readers during writes
//!
//! ## See also
//! - `engine::tests` — internal engine-level unit tests
//! - `integration_coverage.rs` — graph, document, and transaction coverage
//! - `integration_hardening.rs` — vector search and error-path hardening

use koredb::coordinator::Coordinator;
use koredb::engine::EngineConfig;
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

fn small_buffer_config() -> EngineConfig {
    EngineConfig {
        memtable_flush_threshold_bytes: 1024,
        compaction_trigger_segments: 3,
        ..EngineConfig::default()
    }
}

fn reopen(path: &std::path::Path) -> Coordinator {
    Coordinator::open(path, EngineConfig::default()).expect("reopen")
}

// ================================================================================================
// Lifecycle
// ================================================================================================

/// # Scenario
/// Open a fresh database and immediately close it.
///
/// # Expected behavior
/// Both operations succeed without error.
#[test]
fn open_close_empty() {
    let dir = TempDir::new().unwrap();
    let db = Coordinator::open(dir.path(), EngineConfig::default()).unwrap();
    db.close().unwrap();
}

/// # Scenario
/// `wipe()` clears all data and leaves the instance usable.
///
/// # Expected behavior
/// After `wipe()`, a previously-written key is gone and new writes still
/// succeed.
#[test]
fn wipe_clears_all_data() {
    let dir = TempDir::new().unwrap();
    let db = Coordinator::open(dir.path(), EngineConfig::default()).unwrap();
    db.put(b"key".to_vec(), b"value".to_vec()).unwrap();
    db.wipe().unwrap();
    assert_eq!(db.get(b"key").unwrap(), None);

    db.put(b"after".to_vec(), b"wipe".to_vec()).unwrap();
    assert_eq!(db.get(b"after").unwrap(), Some(b"wipe".to_vec()));
}

// ================================================================================================
// Basic CRUD
// ================================================================================================

/// # Scenario
/// Basic put/get round-trip for a single key.
#[test]
fn put_get_single() {
    let dir = TempDir::new().unwrap();
    let db = Coordinator::open(dir.path(), EngineConfig::default()).unwrap();

    db.put(b"hello".to_vec(), b"world".to_vec()).unwrap();
    assert_eq!(db.get(b"hello").unwrap(), Some(b"world".to_vec()));

    db.close().unwrap();
}

/// # Scenario
/// Overwriting a key returns the latest value.
#[test]
fn put_overwrite() {
    let dir = TempDir::new().unwrap();
    let db = Coordinator::open(dir.path(), EngineConfig::default()).unwrap();

    db.put(b"key".to_vec(), b"v1".to_vec()).unwrap();
    db.put(b"key".to_vec(), b"v2".to_vec()).unwrap();
    assert_eq!(db.get(b"key").unwrap(), Some(b"v2".to_vec()));

    db.close().unwrap();
}

/// # Scenario
/// Deleting a key makes it invisible to subsequent reads — the empty-value
/// tombstone, not key absence.
#[test]
fn delete_key() {
    let dir = TempDir::new().unwrap();
    let db = Coordinator::open(dir.path(), EngineConfig::default()).unwrap();

    db.put(b"key".to_vec(), b"value".to_vec()).unwrap();
    assert_eq!(db.get(b"key").unwrap(), Some(b"value".to_vec()));

    db.delete(b"key".to_vec()).unwrap();
    assert_eq!(db.get(b"key").unwrap(), None);

    db.close().unwrap();
}

/// # Scenario
/// Getting a key that was never inserted returns `None`, not an error.
#[test]
fn get_nonexistent_key() {
    let dir = TempDir::new().unwrap();
    let db = Coordinator::open(dir.path(), EngineConfig::default()).unwrap();

    assert_eq!(db.get(b"missing").unwrap(), None);

    db.close().unwrap();
}

// ================================================================================================
// Scan
// ================================================================================================

/// # Scenario
/// `scan_prefix` returns every live value under a prefix.
#[test]
fn scan_prefix_basic() {
    let dir = TempDir::new().unwrap();
    let db = Coordinator::open(dir.path(), EngineConfig::default()).unwrap();

    db.put(b"row:a".to_vec(), b"1".to_vec()).unwrap();
    db.put(b"row:b".to_vec(), b"2".to_vec()).unwrap();
    db.put(b"row:c".to_vec(), b"3".to_vec()).unwrap();
    db.put(b"other:z".to_vec(), b"9".to_vec()).unwrap();

    let mut results = db.scan_prefix(b"row:").unwrap();
    results.sort();
    assert_eq!(results, vec![b"1".to_vec(), b"2".to_vec(), b"3".to_vec()]);

    db.close().unwrap();
}

/// # Scenario
/// `scan_prefix` excludes keys hidden by a tombstone.
#[test]
fn scan_prefix_excludes_deleted_keys() {
    let dir = TempDir::new().unwrap();
    let db = Coordinator::open(dir.path(), EngineConfig::default()).unwrap();

    db.put(b"row:a".to_vec(), b"1".to_vec()).unwrap();
    db.put(b"row:b".to_vec(), b"2".to_vec()).unwrap();
    db.put(b"row:c".to_vec(), b"3".to_vec()).unwrap();
    db.delete(b"row:b".to_vec()).unwrap();

    let mut keys = db.scan_prefix_keys(b"row:").unwrap();
    keys.sort();
    assert_eq!(keys, vec![b"row:a".to_vec(), b"row:c".to_vec()]);

    db.close().unwrap();
}

// ================================================================================================
// Persistence
// ================================================================================================

/// # Scenario
/// Data written before `close()` is readable after reopening.
#[test]
fn persistence_across_reopen() {
    let dir = TempDir::new().unwrap();

    {
        let db = Coordinator::open(dir.path(), EngineConfig::default()).unwrap();
        db.put(b"persist_key".to_vec(), b"persist_value".to_vec()).unwrap();
        db.close().unwrap();
    }

    {
        let db = reopen(dir.path());
        assert_eq!(db.get(b"persist_key").unwrap(), Some(b"persist_value".to_vec()));
        db.close().unwrap();
    }
}

/// # Scenario
/// Hundreds of writes survive close → reopen with a small flush threshold
/// that forces multiple segment flushes.
#[test]
fn persistence_many_writes() {
    let dir = TempDir::new().unwrap();

    {
        let db = Coordinator::open(dir.path(), small_buffer_config()).unwrap();
        for i in 0..500u32 {
            let key = format!("key_{i:04}");
            let val = format!("val_{i:04}");
            db.put(key.into_bytes(), val.into_bytes()).unwrap();
        }
        db.close().unwrap();
    }

    {
        let db = Coordinator::open(dir.path(), small_buffer_config()).unwrap();
        for i in 0..500u32 {
            let key = format!("key_{i:04}");
            let val = format!("val_{i:04}");
            assert_eq!(
                db.get(key.as_bytes()).unwrap(),
                Some(val.into_bytes()),
                "key_{i:04} should be present after reopen"
            );
        }
        db.close().unwrap();
    }
}

/// # Scenario
/// Point-delete tombstones survive close → reopen.
#[test]
fn persistence_deletes_survive_reopen() {
    let dir = TempDir::new().unwrap();

    {
        let db = Coordinator::open(dir.path(), EngineConfig::default()).unwrap();
        db.put(b"alive".to_vec(), b"yes".to_vec()).unwrap();
        db.put(b"dead".to_vec(), b"soon".to_vec()).unwrap();
        db.delete(b"dead".to_vec()).unwrap();
        db.close().unwrap();
    }

    {
        let db = reopen(dir.path());
        assert_eq!(db.get(b"alive").unwrap(), Some(b"yes".to_vec()));
        assert_eq!(db.get(b"dead").unwrap(), None);
        db.close().unwrap();
    }
}

// ================================================================================================
// Compaction
// ================================================================================================

/// # Scenario
/// Enough writes with a small flush threshold trigger automatic
/// compaction; every live key survives and tombstoned keys stay gone.
#[test]
fn compaction_preserves_live_data_and_drops_tombstones() {
    let dir = TempDir::new().unwrap();
    let db = Coordinator::open(dir.path(), small_buffer_config()).unwrap();

    for i in 0..200u32 {
        let key = format!("mc_{i:04}");
        let val = format!("val_{i:04}");
        db.put(key.into_bytes(), val.into_bytes()).unwrap();
    }
    for i in (0..200u32).step_by(2) {
        let key = format!("mc_{i:04}");
        db.delete(key.into_bytes()).unwrap();
    }

    for i in 0..200u32 {
        let key = format!("mc_{i:04}");
        let result = db.get(key.as_bytes()).unwrap();
        if i % 2 == 0 {
            assert_eq!(result, None, "{key} should be deleted");
        } else {
            let val = format!("val_{i:04}");
            assert_eq!(result, Some(val.into_bytes()), "{key} should survive");
        }
    }

    db.close().unwrap();
}

// ================================================================================================
// Concurrency
// ================================================================================================

/// # Scenario
/// Four threads write 100 disjoint keys each; all 400 are readable after
/// the threads join.
#[test]
fn concurrent_writes_and_reads() {
    let dir = TempDir::new().unwrap();
    let db = Arc::new(Coordinator::open(dir.path(), EngineConfig::default()).unwrap());

    let mut handles = vec![];
    for t in 0..4u32 {
        let db = Arc::clone(&db);
        handles.push(thread::spawn(move || {
            for i in 0..100u32 {
                let key = format!("t{t}_k{i:04}");
                let val = format!("t{t}_v{i:04}");
                db.put(key.into_bytes(), val.into_bytes()).unwrap();
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    for t in 0..4u32 {
        for i in 0..100u32 {
            let key = format!("t{t}_k{i:04}");
            let val = format!("t{t}_v{i:04}");
            assert_eq!(db.get(key.as_bytes()).unwrap(), Some(val.into_bytes()), "missing: {key}");
        }
    }

    db.close().unwrap();
}

/// # Scenario
/// Reader threads observe previously-written keys while a writer thread
/// adds new keys concurrently.
#[test]
fn concurrent_reads_during_writes() {
    let dir = TempDir::new().unwrap();
    let db = Arc::new(Coordinator::open(dir.path(), EngineConfig::default()).unwrap());

    for i in 0..50u32 {
        let key = format!("pre_{i:04}");
        let val = format!("val_{i:04}");
        db.put(key.into_bytes(), val.into_bytes()).unwrap();
    }

    let mut handles = vec![];
    {
        let db = Arc::clone(&db);
        handles.push(thread::spawn(move || {
            for i in 50..150u32 {
                let key = format!("pre_{i:04}");
                let val = format!("val_{i:04}");
                db.put(key.into_bytes(), val.into_bytes()).unwrap();
            }
        }));
    }
    for _ in 0..3 {
        let db = Arc::clone(&db);
        handles.push(thread::spawn(move || {
            for i in 0..50u32 {
                let key = format!("pre_{i:04}");
                let val = format!("val_{i:04}");
                assert_eq!(
                    db.get(key.as_bytes()).unwrap(),
                    Some(val.into_bytes()),
                    "reader couldn't find {key}"
                );
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    db.close().unwrap();
}
