//! # koredb
//!
//! An embeddable, single-process database unifying three data models
//! behind one ordered, byte-keyed storage substrate:
//!
//! - a **Log-Structured Merge Tree (LSM-tree)** key-value store,
//! - an **HNSW** approximate nearest-neighbor vector index, and
//! - a **property graph** (nodes, typed edges, secondary indices).
//!
//! Documents, vectors, and graph nodes/edges are all just keys and values
//! in the same LSM engine, distinguished by key prefix (`doc:`, `vec:`,
//! `g:v:`, `g:e:out:`/`g:e:in:`, `idx:`, `g:idx:`). Every higher layer is
//! advisory over that one substrate: delete the underlying key and every
//! index referencing it becomes (harmlessly) stale.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                       Coordinator                          │
//! │  ┌───────────┐  ┌────────────────┐  ┌───────────────────┐  │
//! │  │ GraphStore│  │CollectionStore │  │ VectorIndexManager │  │
//! │  └─────┬─────┘  └───────┬────────┘  └──────────┬─────────┘  │
//! │        └────────────────┴───────────────────────┘           │
//! │                          │                                  │
//! │                    ┌─────▼─────┐                            │
//! │                    │   Engine   │   WAL → MemTable → SSTable │
//! │                    └─────┬─────┘                            │
//! │                          │                                  │
//! │               ┌──────────▼──────────┐                       │
//! │               │ Compaction + MANIFEST│                      │
//! │               └──────────────────────┘                      │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`coordinator`] | Top-level handle exposing the full public API |
//! | [`engine`] | Core LSM engine — open, read, write, scan, flush, compact |
//! | [`memtable`] | In-memory write buffer ordered by byte-key |
//! | [`wal`] | CRC-protected, batch-framed write-ahead log for crash recovery |
//! | [`sstable`] | Immutable, memory-mapped on-disk tables with bloom filters and a sparse index |
//! | [`manifest`] | Persistent, crash-safe segment-set tracking |
//! | [`compaction`] | Newest-wins k-way merge of the segment set |
//! | [`codec`] | Deterministic binary encoding and key ordering |
//! | [`bloom`] | Per-segment bloom filter for negative point lookups |
//! | [`vector`] | Vector value encoding and cosine scoring |
//! | [`hnsw`] | The HNSW proximity graph and its per-collection lifecycle manager |
//! | [`graph`] | Property-graph node/edge key schema and traversal primitives |
//! | [`collection`] | Document storage and secondary equality indices |
//! | [`transaction`] | Buffered, atomically-committed multi-key writes |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use koredb::coordinator::Coordinator;
//! use koredb::engine::EngineConfig;
//! use koredb::graph::{Edge, Node};
//!
//! let db = Coordinator::open("/tmp/my_db", EngineConfig::default()).unwrap();
//!
//! // Key-value
//! db.put(b"hello".to_vec(), b"world".to_vec()).unwrap();
//! assert_eq!(db.get(b"hello").unwrap(), Some(b"world".to_vec()));
//! db.delete(b"hello".to_vec()).unwrap();
//! assert_eq!(db.get(b"hello").unwrap(), None);
//!
//! // Graph
//! db.put_node(&Node { id: "u1".into(), labels: vec!["User".into()], properties: vec![] }).unwrap();
//! db.put_node(&Node { id: "u2".into(), labels: vec!["User".into()], properties: vec![] }).unwrap();
//! db.put_edge(&Edge { src: "u1".into(), edge_type: "FOLLOWS".into(), dst: "u2".into(), properties: vec![] }).unwrap();
//! assert_eq!(db.outbound_target_ids("u1", "FOLLOWS").unwrap(), vec!["u2".to_string()]);
//!
//! // Vectors
//! db.vector_insert("docs", b"a", &[1.0, 0.0, 0.0]).unwrap();
//! db.vector_drain("docs").unwrap();
//! let hits = db.vector_search("docs", &[1.0, 0.0, 0.0], 1).unwrap();
//! assert_eq!(hits[0].0, b"a".to_vec());
//!
//! db.close().unwrap();
//! ```

#![allow(dead_code)]

pub mod bloom;
pub mod codec;
pub mod collection;
pub mod compaction;
pub mod coordinator;
pub mod engine;
pub mod graph;
pub mod hnsw;
pub mod manifest;
pub mod memtable;
pub mod sstable;
pub mod transaction;
pub mod vector;
pub mod wal;
