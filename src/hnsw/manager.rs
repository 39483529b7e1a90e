//! Per-collection HNSW lifecycle: hydration from the KV store, the live
//! write channel, and the cold-start brute-force fallback.
//!
//! One [`VectorIndexManager`] is shared by the whole engine; it lazily
//! spawns one background indexer thread per collection on first use and
//! keeps it alive for the manager's lifetime.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::engine::{Engine, EngineError};
use crate::vector::{decode_vector_value, encode_vector_value};

use super::graph::{HnswIndex, HnswParams};

/// Number of `(key, value)` pairs the hydration scan hands to the index
/// per chunk before yielding the thread, so a large collection doesn't
/// monopolize the indexer thread on startup.
const HYDRATION_CHUNK_SIZE: usize = 256;

#[derive(Debug, Error)]
pub enum HnswError {
    #[error("hnsw error: {0}")]
    Index(#[from] super::graph::HnswError),

    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("hnsw indexer thread for collection '{0}' is gone")]
    IndexerGone(String),
}

enum IndexerMsg {
    Insert(Vec<u8>, Vec<f32>),
    /// Sent by `drain`: once the indexer processes this, it acknowledges
    /// on the embedded channel, proving every message sent before it has
    /// been applied.
    Barrier(Sender<()>),
}

struct Collection {
    index: Arc<HnswIndex>,
    sender: Sender<IndexerMsg>,
    #[allow(dead_code)]
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Collection {
    fn spawn(engine: Engine, name: String, params: HnswParams) -> Self {
        let index = Arc::new(HnswIndex::new(params));
        let (sender, receiver) = channel::unbounded();

        let thread_index = index.clone();
        let thread_name = name.clone();
        let handle = thread::Builder::new()
            .name(format!("hnsw-indexer-{name}"))
            .spawn(move || run_indexer(engine, thread_name, thread_index, receiver))
            .expect("failed to spawn hnsw indexer thread");

        Self {
            index,
            sender,
            handle: Mutex::new(Some(handle)),
        }
    }
}

fn run_indexer(engine: Engine, collection: String, index: Arc<HnswIndex>, receiver: Receiver<IndexerMsg>) {
    let prefix = vector_prefix(&collection);
    match engine.scan_prefix_entries(prefix.as_bytes()) {
        Ok(entries) => {
            info!(collection, count = entries.len(), "hnsw: starting hydration scan");
            for chunk in entries.chunks(HYDRATION_CHUNK_SIZE) {
                for (key, value) in chunk {
                    if value.is_empty() {
                        continue;
                    }
                    if let Some(id) = strip_prefix_id(key, &prefix)
                        && let Some((_, floats)) = decode_vector_value(value)
                        && let Err(e) = index.insert(id, floats)
                    {
                        warn!(collection, error = %e, "hnsw: skipping malformed vector during hydration");
                    }
                }
                thread::yield_now();
            }
            debug!(collection, "hnsw: hydration complete");
        }
        Err(e) => {
            warn!(collection, error = %e, "hnsw: hydration scan failed, starting cold");
        }
    }

    for msg in receiver.iter() {
        match msg {
            IndexerMsg::Insert(id, vector) => {
                if let Err(e) = index.insert(id, vector) {
                    warn!(collection, error = %e, "hnsw: dropping vector with bad dimensionality");
                }
            }
            IndexerMsg::Barrier(ack) => {
                let _ = ack.send(());
            }
        }
    }
}

fn vector_prefix(collection: &str) -> String {
    format!("vec:{collection}:")
}

fn strip_prefix_id(key: &[u8], prefix: &str) -> Option<Vec<u8>> {
    key.get(prefix.len()..).map(|rest| rest.to_vec())
}

/// Owns every collection's HNSW index and its background indexer thread;
/// the façade the engine's `vector_*` operations go through.
pub struct VectorIndexManager {
    engine: Engine,
    params: HnswParams,
    collections: RwLock<HashMap<String, Arc<Collection>>>,
}

impl VectorIndexManager {
    pub fn new(engine: Engine) -> Self {
        let config = engine.config();
        let params = HnswParams {
            m: config.hnsw_m,
            ef_construction: config.hnsw_ef_construction,
            ef_search: config.hnsw_ef_search,
        };
        Self {
            engine,
            params,
            collections: RwLock::new(HashMap::new()),
        }
    }

    fn get_or_spawn(&self, collection: &str) -> Result<Arc<Collection>, HnswError> {
        if let Some(c) = self
            .collections
            .read()
            .map_err(|_| HnswError::IndexerGone(collection.to_string()))?
            .get(collection)
        {
            return Ok(c.clone());
        }
        let mut collections = self
            .collections
            .write()
            .map_err(|_| HnswError::IndexerGone(collection.to_string()))?;
        if let Some(c) = collections.get(collection) {
            return Ok(c.clone());
        }
        let spawned = Arc::new(Collection::spawn(
            self.engine.clone(),
            collection.to_string(),
            self.params,
        ));
        collections.insert(collection.to_string(), spawned.clone());
        Ok(spawned)
    }

    /// Writes the vector's KV record, then feeds it to the collection's
    /// background indexer.
    pub fn vector_insert(&self, collection: &str, id: &[u8], vector: &[f32]) -> Result<(), HnswError> {
        let key = vector_key(collection, id);
        self.engine.put(key, encode_vector_value(vector))?;
        let handle = self.get_or_spawn(collection)?;
        handle
            .sender
            .send(IndexerMsg::Insert(id.to_vec(), vector.to_vec()))
            .map_err(|_| HnswError::IndexerGone(collection.to_string()))?;
        Ok(())
    }

    /// Batched form of [`Self::vector_insert`]: one atomic `write_batch`
    /// for the KV side, then one channel send per vector.
    pub fn vector_insert_batch(
        &self,
        collection: &str,
        items: &[(Vec<u8>, Vec<f32>)],
    ) -> Result<(), HnswError> {
        if items.is_empty() {
            return Ok(());
        }
        let records: Vec<(Vec<u8>, Vec<u8>)> = items
            .iter()
            .map(|(id, vector)| (vector_key(collection, id), encode_vector_value(vector)))
            .collect();
        self.engine.write_batch(&records, true)?;

        let handle = self.get_or_spawn(collection)?;
        for (id, vector) in items {
            handle
                .sender
                .send(IndexerMsg::Insert(id.clone(), vector.clone()))
                .map_err(|_| HnswError::IndexerGone(collection.to_string()))?;
        }
        Ok(())
    }

    /// Top-`k` nearest neighbors. Serves from HNSW once warm; falls back
    /// to the brute-force KV scan while the collection is cold.
    pub fn vector_search(
        &self,
        collection: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<(Vec<u8>, f32)>, HnswError> {
        let handle = self.get_or_spawn(collection)?;
        if !handle.index.is_empty() {
            return Ok(handle.index.search(query, k)?);
        }
        let prefix = vector_prefix(collection);
        let results = self.engine.search_vectors(prefix.as_bytes(), query, k)?;
        Ok(results
            .into_iter()
            .filter_map(|(key, score)| strip_prefix_id(&key, &prefix).map(|id| (id, score)))
            .collect())
    }

    /// Blocks until every message already sent for `collection` has been
    /// applied to its index. A no-op if the collection has never been
    /// touched.
    pub fn vector_drain(&self, collection: &str) -> Result<(), HnswError> {
        let handle = self.get_or_spawn(collection)?;
        let (ack_tx, ack_rx) = channel::bounded(1);
        handle
            .sender
            .send(IndexerMsg::Barrier(ack_tx))
            .map_err(|_| HnswError::IndexerGone(collection.to_string()))?;
        ack_rx
            .recv()
            .map_err(|_| HnswError::IndexerGone(collection.to_string()))?;
        Ok(())
    }
}

fn vector_key(collection: &str, id: &[u8]) -> Vec<u8> {
    let mut key = format!("vec:{collection}:").into_bytes();
    key.extend_from_slice(id);
    key
}
