//! Top-level entry point: one [`Coordinator`] owns the LSM engine, the
//! HNSW vector index manager, and the graph and collection façades, and
//! exposes the full operation surface over them.
//!
//! This is the type most callers construct directly; the lower-level
//! `Engine`/`GraphStore`/`CollectionStore`/`VectorIndexManager` types
//! remain independently usable for callers that only need one layer.

use std::path::Path;

use thiserror::Error;

use crate::collection::{CollectionError, CollectionStore, Extractor};
use crate::engine::{Engine, EngineConfig, EngineError, EngineStats};
use crate::graph::{Edge, GraphError, GraphStore, Node};
use crate::hnsw::{HnswError, VectorIndexManager};
use crate::transaction::{Transaction, TransactionError};

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("collection error: {0}")]
    Collection(#[from] CollectionError),

    #[error("hnsw error: {0}")]
    Hnsw(#[from] HnswError),

    #[error("transaction error: {0}")]
    Transaction(#[from] TransactionError),
}

/// The database handle: one data directory, one logical instance.
/// Cheap to clone — every façade it owns shares the same underlying
/// engine state.
#[derive(Clone)]
pub struct Coordinator {
    engine: Engine,
    vectors: std::sync::Arc<VectorIndexManager>,
    graph: std::sync::Arc<GraphStore>,
    collections: std::sync::Arc<CollectionStore>,
}

impl Coordinator {
    pub fn open(dir: impl AsRef<Path>, config: EngineConfig) -> Result<Self, CoordinatorError> {
        let engine = Engine::open(dir, config)?;
        let vectors = std::sync::Arc::new(VectorIndexManager::new(engine.clone()));
        let graph = std::sync::Arc::new(GraphStore::new(engine.clone()));
        let collections = std::sync::Arc::new(CollectionStore::new(engine.clone()));
        Ok(Self {
            engine,
            vectors,
            graph,
            collections,
        })
    }

    pub fn close(&self) -> Result<(), CoordinatorError> {
        Ok(self.engine.close()?)
    }

    pub fn wipe(&self) -> Result<(), CoordinatorError> {
        Ok(self.engine.wipe()?)
    }

    pub fn stats(&self) -> Result<EngineStats, CoordinatorError> {
        Ok(self.engine.stats()?)
    }

    // ---- raw key/value surface -------------------------------------------------------------

    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<(), CoordinatorError> {
        Ok(self.engine.put(key, value)?)
    }

    pub fn delete(&self, key: Vec<u8>) -> Result<(), CoordinatorError> {
        Ok(self.engine.delete(key)?)
    }

    pub fn write_batch(&self, records: &[(Vec<u8>, Vec<u8>)], urgent: bool) -> Result<(), CoordinatorError> {
        Ok(self.engine.write_batch(records, urgent)?)
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, CoordinatorError> {
        Ok(self.engine.get(key)?)
    }

    pub fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>, CoordinatorError> {
        Ok(self.engine.scan_prefix(prefix)?)
    }

    pub fn scan_prefix_keys(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>, CoordinatorError> {
        Ok(self.engine.scan_prefix_keys(prefix)?)
    }

    // ---- vectors ----------------------------------------------------------------------------

    pub fn vector_insert(&self, collection: &str, id: &[u8], vector: &[f32]) -> Result<(), CoordinatorError> {
        Ok(self.vectors.vector_insert(collection, id, vector)?)
    }

    pub fn vector_insert_batch(
        &self,
        collection: &str,
        items: &[(Vec<u8>, Vec<f32>)],
    ) -> Result<(), CoordinatorError> {
        Ok(self.vectors.vector_insert_batch(collection, items)?)
    }

    pub fn vector_search(
        &self,
        collection: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<(Vec<u8>, f32)>, CoordinatorError> {
        Ok(self.vectors.vector_search(collection, query, k)?)
    }

    /// Blocks until every vector write issued for `collection` before this
    /// call has been applied to its HNSW index. Mainly useful in tests
    /// that need a deterministic warm-index search.
    pub fn vector_drain(&self, collection: &str) -> Result<(), CoordinatorError> {
        Ok(self.vectors.vector_drain(collection)?)
    }

    // ---- graph --------------------------------------------------------------------------------

    pub fn put_node(&self, node: &Node) -> Result<(), CoordinatorError> {
        Ok(self.graph.put_node(node)?)
    }

    pub fn get_node(&self, id: &str) -> Result<Option<Node>, CoordinatorError> {
        Ok(self.graph.get_node(id)?)
    }

    pub fn put_edge(&self, edge: &Edge) -> Result<(), CoordinatorError> {
        Ok(self.graph.put_edge(edge)?)
    }

    pub fn remove_edge(&self, src: &str, edge_type: &str, dst: &str) -> Result<(), CoordinatorError> {
        Ok(self.graph.remove_edge(src, edge_type, dst)?)
    }

    pub fn outbound_target_ids(&self, src: &str, edge_type: &str) -> Result<Vec<String>, CoordinatorError> {
        Ok(self.graph.outbound_target_ids(src, edge_type)?)
    }

    pub fn inbound_source_ids(&self, dst: &str, edge_type: &str) -> Result<Vec<String>, CoordinatorError> {
        Ok(self.graph.inbound_source_ids(dst, edge_type)?)
    }

    pub fn get_nodes_by_property(
        &self,
        label: &str,
        key: &str,
        val: &str,
    ) -> Result<Vec<String>, CoordinatorError> {
        Ok(self.graph.get_nodes_by_property(label, key, val)?)
    }

    // ---- documents ----------------------------------------------------------------------------

    pub fn register_index(&self, collection: &str, name: &str, extractor: Extractor) {
        self.collections.register_index(collection, name, extractor);
    }

    pub fn put_doc(&self, collection: &str, id: &str, bytes: Vec<u8>) -> Result<(), CoordinatorError> {
        Ok(self.collections.put_doc(collection, id, bytes)?)
    }

    pub fn get_doc(&self, collection: &str, id: &str) -> Result<Option<Vec<u8>>, CoordinatorError> {
        Ok(self.collections.get_doc(collection, id)?)
    }

    pub fn delete_doc(&self, collection: &str, id: &str) -> Result<(), CoordinatorError> {
        Ok(self.collections.delete_doc(collection, id)?)
    }

    pub fn scan_docs(&self, collection: &str) -> Result<Vec<(String, Vec<u8>)>, CoordinatorError> {
        Ok(self.collections.scan_docs(collection)?)
    }

    pub fn lookup_by_index(
        &self,
        collection: &str,
        name: &str,
        value: &str,
    ) -> Result<Vec<String>, CoordinatorError> {
        Ok(self.collections.lookup_by_index(collection, name, value)?)
    }

    // ---- transactions -------------------------------------------------------------------------

    /// Starts a new buffered transaction over this instance's engine.
    pub fn transaction(&self) -> Transaction {
        Transaction::new(self.engine.clone())
    }
}
