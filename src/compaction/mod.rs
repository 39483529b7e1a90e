//! Compactor: k-way merge of segments with newest-wins deduplication and
//! tombstone elimination.
//!
//! Guarantee: the compacted output observes the same point-query results
//! as the input set for every key that is not a tombstone; tombstones and
//! all stale versions are physically dropped.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::sstable::builder::SstWriter;
use crate::sstable::{SSTable, SstableError};

#[derive(Debug, Error)]
pub enum CompactionError {
    #[error("sstable error during compaction: {0}")]
    Sstable(#[from] SstableError),
}

/// One row in the merge heap: a candidate `(key, value)` from reader
/// `position` (higher = newer), with a cursor into that reader's already
/// materialized, sorted record stream.
struct HeapRow {
    key: Vec<u8>,
    value: Vec<u8>,
    position: usize,
    reader_idx: usize,
    cursor: usize,
}

impl PartialEq for HeapRow {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.position == other.position
    }
}
impl Eq for HeapRow {}

impl Ord for HeapRow {
    /// `BinaryHeap` is a max-heap; we want the *smallest* key popped
    /// first, and among equal keys the *newest* (highest `position`)
    /// popped first. So this ordering is "greater" for smaller keys, and
    /// for equal keys, "greater" for higher positions.
    fn cmp(&self, other: &Self) -> Ordering {
        match other.key.cmp(&self.key) {
            Ordering::Equal => self.position.cmp(&other.position),
            ord => ord,
        }
    }
}
impl PartialOrd for HeapRow {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Merges `sstables` (ordered oldest → newest, as the engine's Segment Set
/// is) into one new SSTable at `dest_path`, dropping tombstones and all
/// but the newest version of each key.
pub fn compact(
    sstables: &[Arc<SSTable>],
    dest_path: impl AsRef<Path>,
) -> Result<(), CompactionError> {
    let streams: Vec<Vec<(Vec<u8>, Vec<u8>)>> = sstables
        .iter()
        .map(|sst| sst.scan_by_prefix(&[]))
        .collect::<Result<_, _>>()?;

    let mut heap = BinaryHeap::new();
    for (position, stream) in streams.iter().enumerate() {
        if let Some((key, value)) = stream.first() {
            heap.push(HeapRow {
                key: key.clone(),
                value: value.clone(),
                position,
                reader_idx: position,
                cursor: 1,
            });
        }
    }

    let mut merged: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
    let mut dropped_tombstones = 0usize;

    while let Some(row) = heap.pop() {
        // Refill the heap with this reader's next record before deciding
        // what to do with `row`, so ties always see every candidate.
        if let Some((next_key, next_value)) = streams[row.reader_idx].get(row.cursor) {
            heap.push(HeapRow {
                key: next_key.clone(),
                value: next_value.clone(),
                position: row.position,
                reader_idx: row.reader_idx,
                cursor: row.cursor + 1,
            });
        }

        // Drop every further occurrence of the same key: the first pop for
        // a given key is, by construction, the newest version.
        while let Some(top) = heap.peek()
            && top.key == row.key
        {
            let dup = heap.pop().unwrap();
            if let Some((next_key, next_value)) = streams[dup.reader_idx].get(dup.cursor) {
                heap.push(HeapRow {
                    key: next_key.clone(),
                    value: next_value.clone(),
                    position: dup.position,
                    reader_idx: dup.reader_idx,
                    cursor: dup.cursor + 1,
                });
            }
        }

        if row.value.is_empty() {
            dropped_tombstones += 1;
        } else {
            merged.push((row.key, row.value));
        }
    }

    info!(
        merged = merged.len(),
        dropped_tombstones, inputs = sstables.len(), "compaction merge complete"
    );

    SstWriter::build(dest_path, merged)?;
    Ok(())
}
