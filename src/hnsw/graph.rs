//! The pure HNSW proximity graph: layered neighbor sets, greedy
//! layer-by-layer descent, and `search_layer`'s candidate/result heaps.
//! Knows nothing about the KV engine — ids are opaque byte strings and
//! vectors are owned `Vec<f32>`.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, RwLock};

use rand::Rng;
use thiserror::Error;
use tracing::{debug, trace};

use crate::vector::{cosine_score, magnitude};

/// Score returned by [`HnswIndex::score`] for a neighbor id that no
/// longer resolves to a node. Below any real cosine similarity (which
/// lies in `[-1.0, 1.0]`), so it ranks last and is discarded by `ef`/`k`
/// truncation without a special case. Distinct from
/// `crate::vector::DIMENSION_MISMATCH_SENTINEL`: every node in one index
/// shares a single dimension (enforced by `check_dimension` on insert),
/// so a scored node's vector can never actually mismatch the query.
const MISSING_NODE_SENTINEL: f32 = -2.0;

#[derive(Debug, Error)]
pub enum HnswError {
    #[error("hnsw index lock poisoned")]
    Poisoned,

    #[error("vector dimension mismatch: index uses {expected}, got {found}")]
    DimensionMismatch { expected: usize, found: usize },
}

/// Tuning knobs for one HNSW index. Mirrors
/// `EngineConfig::hnsw_{m,ef_construction,ef_search}`.
#[derive(Debug, Clone, Copy)]
pub struct HnswParams {
    /// Max neighbors per node per layer.
    pub m: usize,
    /// Candidate list size used while inserting.
    pub ef_construction: usize,
    /// Default candidate list size used while searching.
    pub ef_search: usize,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search: 50,
        }
    }
}

impl HnswParams {
    fn level_mult(&self) -> f64 {
        1.0 / (self.m.max(2) as f64).ln()
    }
}

struct Node {
    vector: Vec<f32>,
    magnitude: f32,
    /// One neighbor set per layer, `0..=level`.
    neighbors: Vec<RwLock<HashSet<Vec<u8>>>>,
}

/// One scored candidate in the search frontier. `Ord` compares by score
/// only (NaN-safe via `partial_cmp` fallback), so a plain `BinaryHeap`
/// gives a max-heap over similarity.
#[derive(Clone)]
struct Candidate {
    score: f32,
    id: Vec<u8>,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score && self.id == other.id
    }
}
impl Eq for Candidate {}
impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .partial_cmp(&other.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// A single collection's HNSW graph: concurrent id→node map plus the
/// process-wide `entry_node`/`max_level` pair.
pub struct HnswIndex {
    params: HnswParams,
    level_mult: f64,
    dim: RwLock<Option<usize>>,
    nodes: RwLock<HashMap<Vec<u8>, Arc<Node>>>,
    entry_node: RwLock<Option<Vec<u8>>>,
    max_level: AtomicUsize,
}

impl HnswIndex {
    pub fn new(params: HnswParams) -> Self {
        let level_mult = params.level_mult();
        Self {
            params,
            level_mult,
            dim: RwLock::new(None),
            nodes: RwLock::new(HashMap::new()),
            entry_node: RwLock::new(None),
            max_level: AtomicUsize::new(0),
        }
    }

    /// Number of vectors currently indexed. `0` signals "cold": callers
    /// should fall back to the brute-force scan.
    pub fn len(&self) -> usize {
        self.nodes.read().map(|n| n.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn sample_level(&self) -> usize {
        let u: f64 = rand::rng().random::<f64>().clamp(f64::MIN_POSITIVE, 1.0);
        (-u.ln() * self.level_mult).floor() as usize
    }

    fn check_dimension(&self, dim: usize) -> Result<(), HnswError> {
        let mut guard = self.dim.write().map_err(|_| HnswError::Poisoned)?;
        match *guard {
            None => {
                *guard = Some(dim);
                Ok(())
            }
            Some(expected) if expected != dim => Err(HnswError::DimensionMismatch {
                expected,
                found: dim,
            }),
            Some(_) => Ok(()),
        }
    }

    fn score(
        nodes: &HashMap<Vec<u8>, Arc<Node>>,
        id: &[u8],
        query: &[f32],
        query_mag: f32,
    ) -> f32 {
        match nodes.get(id) {
            Some(node) => cosine_score(query, query_mag, node.magnitude, &node.vector),
            None => MISSING_NODE_SENTINEL,
        }
    }

    /// Greedy search of one layer starting at `entry`, returning up to
    /// `ef` nearest known ids sorted by similarity descending.
    fn search_layer(
        nodes: &HashMap<Vec<u8>, Arc<Node>>,
        query: &[f32],
        query_mag: f32,
        entry: &[u8],
        ef: usize,
        layer: usize,
    ) -> Vec<(Vec<u8>, f32)> {
        let ef = ef.max(1);
        let mut visited: HashSet<Vec<u8>> = HashSet::new();
        visited.insert(entry.to_vec());

        let entry_score = Self::score(nodes, entry, query, query_mag);
        let mut candidates: BinaryHeap<Candidate> = BinaryHeap::new();
        candidates.push(Candidate {
            score: entry_score,
            id: entry.to_vec(),
        });
        // Min-heap over score via `Reverse`: peek()/pop() surface the
        // *worst* currently-kept result, which is exactly what trimming
        // to `ef` and the early-stop test need.
        let mut results: BinaryHeap<std::cmp::Reverse<Candidate>> = BinaryHeap::new();
        results.push(std::cmp::Reverse(Candidate {
            score: entry_score,
            id: entry.to_vec(),
        }));

        while let Some(Candidate {
            score: cur_score,
            id: cur_id,
        }) = candidates.pop()
        {
            if let Some(std::cmp::Reverse(worst)) = results.peek()
                && results.len() >= ef
                && cur_score < worst.score
            {
                break;
            }

            let node = match nodes.get(&cur_id) {
                Some(n) => n,
                None => continue,
            };
            if layer >= node.neighbors.len() {
                continue;
            }
            let neighbor_ids: Vec<Vec<u8>> = match node.neighbors[layer].read() {
                Ok(set) => set.iter().cloned().collect(),
                Err(_) => continue,
            };

            for neighbor_id in neighbor_ids {
                if !visited.insert(neighbor_id.clone()) {
                    continue;
                }
                let score = Self::score(nodes, &neighbor_id, query, query_mag);
                let worst_score = results
                    .peek()
                    .map(|std::cmp::Reverse(w)| w.score)
                    .unwrap_or(f32::NEG_INFINITY);
                if results.len() < ef || score > worst_score {
                    candidates.push(Candidate {
                        score,
                        id: neighbor_id.clone(),
                    });
                    results.push(std::cmp::Reverse(Candidate {
                        score,
                        id: neighbor_id,
                    }));
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut out: Vec<(Vec<u8>, f32)> = results
            .into_iter()
            .map(|std::cmp::Reverse(c)| (c.id, c.score))
            .collect();
        out.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        out
    }

    /// Greedy layer-by-layer zoom-in shared by insert and search: descend
    /// from `from_layer` down to (but not including) `down_to`, at each
    /// layer moving to the strictly-better neighbor until no improvement
    /// is possible.
    fn descend(
        nodes: &HashMap<Vec<u8>, Arc<Node>>,
        query: &[f32],
        query_mag: f32,
        mut current: Vec<u8>,
        mut current_score: f32,
        from_layer: usize,
        down_to: usize,
    ) -> (Vec<u8>, f32) {
        for layer in (down_to..=from_layer).rev() {
            loop {
                let node = match nodes.get(&current) {
                    Some(n) => n,
                    None => break,
                };
                if layer >= node.neighbors.len() {
                    break;
                }
                let neighbor_ids: Vec<Vec<u8>> = match node.neighbors[layer].read() {
                    Ok(set) => set.iter().cloned().collect(),
                    Err(_) => break,
                };
                let mut improved = false;
                for neighbor_id in neighbor_ids {
                    let score = Self::score(nodes, &neighbor_id, query, query_mag);
                    if score > current_score {
                        current = neighbor_id;
                        current_score = score;
                        improved = true;
                    }
                }
                if !improved {
                    break;
                }
            }
        }
        (current, current_score)
    }

    /// Inserts `id` with `vector`. Replaces any existing
    /// entry for `id` with a brand-new node (re-insertion is not merge).
    pub fn insert(&self, id: Vec<u8>, vector: Vec<f32>) -> Result<(), HnswError> {
        self.check_dimension(vector.len())?;
        let mv = magnitude(&vector);
        let level = self.sample_level();

        let node = Arc::new(Node {
            vector: vector.clone(),
            magnitude: mv,
            neighbors: (0..=level).map(|_| RwLock::new(HashSet::new())).collect(),
        });

        let is_first = {
            let mut nodes = self.nodes.write().map_err(|_| HnswError::Poisoned)?;
            let was_empty = nodes.is_empty();
            nodes.insert(id.clone(), node.clone());
            was_empty
        };

        if is_first {
            *self.entry_node.write().map_err(|_| HnswError::Poisoned)? = Some(id.clone());
            self.max_level.store(level, AtomicOrdering::SeqCst);
            debug!(?id, level, "hnsw: installed first node as entry");
            return Ok(());
        }

        let max_level = self.max_level.load(AtomicOrdering::SeqCst);
        let entry = self
            .entry_node
            .read()
            .map_err(|_| HnswError::Poisoned)?
            .clone()
            .ok_or(HnswError::Poisoned)?;

        let nodes = self.nodes.read().map_err(|_| HnswError::Poisoned)?;
        let entry_score = Self::score(&nodes, &entry, &vector, mv);
        let (mut current, _) = if max_level > level {
            Self::descend(&nodes, &vector, mv, entry, entry_score, max_level, level + 1)
        } else {
            (entry, entry_score)
        };

        for layer in (0..=level.min(max_level)).rev() {
            let candidates = Self::search_layer(
                &nodes,
                &vector,
                mv,
                &current,
                self.params.ef_construction,
                layer,
            );
            let top_m: Vec<(Vec<u8>, f32)> =
                candidates.iter().take(self.params.m).cloned().collect();

            for (neighbor_id, _) in &top_m {
                if layer < node.neighbors.len() {
                    node.neighbors[layer]
                        .write()
                        .map_err(|_| HnswError::Poisoned)?
                        .insert(neighbor_id.clone());
                }
                if let Some(neighbor_node) = nodes.get(neighbor_id) {
                    if layer >= neighbor_node.neighbors.len() {
                        continue;
                    }
                    let mut neighbor_set = neighbor_node.neighbors[layer]
                        .write()
                        .map_err(|_| HnswError::Poisoned)?;
                    neighbor_set.insert(id.clone());
                    if neighbor_set.len() > self.params.m {
                        let mut scored: Vec<(Vec<u8>, f32)> = neighbor_set
                            .iter()
                            .map(|other_id| {
                                let score = if *other_id == id {
                                    cosine_score(
                                        &neighbor_node.vector,
                                        neighbor_node.magnitude,
                                        mv,
                                        &vector,
                                    )
                                } else {
                                    Self::score(
                                        &nodes,
                                        other_id,
                                        &neighbor_node.vector,
                                        neighbor_node.magnitude,
                                    )
                                };
                                (other_id.clone(), score)
                            })
                            .collect();
                        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
                        scored.truncate(self.params.m);
                        *neighbor_set = scored.into_iter().map(|(id, _)| id).collect();
                    }
                }
            }

            if let Some((best_id, _)) = candidates.first() {
                current = best_id.clone();
            }
        }
        drop(nodes);

        if level > max_level {
            *self.entry_node.write().map_err(|_| HnswError::Poisoned)? = Some(id);
            self.max_level.store(level, AtomicOrdering::SeqCst);
        }
        trace!(level, max_level, "hnsw: insert complete");
        Ok(())
    }

    /// Top-`k` nearest neighbors of `query`. Returns an
    /// empty list if no node has been inserted yet.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(Vec<u8>, f32)>, HnswError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        if let Some(expected) = *self.dim.read().map_err(|_| HnswError::Poisoned)?
            && expected != query.len()
        {
            return Err(HnswError::DimensionMismatch {
                expected,
                found: query.len(),
            });
        }

        let entry = match self.entry_node.read().map_err(|_| HnswError::Poisoned)?.clone() {
            Some(e) => e,
            None => return Ok(Vec::new()),
        };

        let nodes = self.nodes.read().map_err(|_| HnswError::Poisoned)?;
        let mq = magnitude(query);
        let max_level = self.max_level.load(AtomicOrdering::SeqCst);
        let entry_score = Self::score(&nodes, &entry, query, mq);
        let (current, _) = Self::descend(&nodes, query, mq, entry, entry_score, max_level, 1);

        let ef = self.params.ef_search.max(k);
        let mut results = Self::search_layer(&nodes, query, mq, &current, ef, 0);
        results.truncate(k);
        Ok(results)
    }
}
