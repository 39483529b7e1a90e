//! Immutable, memory-mapped on-disk segment: data block, bloom filter,
//! and a fixed footer.
//!
//! File layout, exact, little-endian:
//!
//! ```text
//! <Data>   : sequence of { key_size:u32, value_size:u32, key, value }, ascending key order
//! <Filter> : { m:u32, k:u32, bits: ceil(m/8) bytes }
//! <Footer> : { bloom_offset:u64, version:u32=1, magic:u32=0x4B4F5245 }
//! ```
//!
//! The footer occupies exactly the last 16 bytes of the file; the minimum
//! legal file length is 16. Both the writer ([`builder::SstWriter`]) and
//! the reader ([`SSTable`]) live in this module family.

pub mod builder;

use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use thiserror::Error;
use tracing::warn;

use crate::bloom::BloomFilter;
use crate::codec::{Decode, has_prefix};

/// Footer magic: ASCII "KORE" read little-endian, `0x4B4F5245`.
pub const SST_MAGIC: u32 = 0x4B4F_5245;
pub const SST_VERSION: u32 = 1;
/// Fixed footer size in bytes.
pub const SST_FOOTER_SIZE: usize = 16;

/// Sample stride for the in-memory sparse index: every Nth key observed
/// during the initial scan is indexed.
const SPARSE_INDEX_STRIDE: usize = 256;

#[derive(Debug, Error)]
pub enum SstableError {
    #[error("sstable io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sstable encoding error: {0}")]
    Encoding(#[from] crate::codec::EncodingError),

    #[error("corrupt segment {path}: {reason}")]
    CorruptSegment { path: PathBuf, reason: String },

    #[error("unsupported sstable version {found} (expected {expected}) in {path}")]
    UnsupportedVersion {
        path: PathBuf,
        found: u32,
        expected: u32,
    },
}

struct Footer {
    bloom_offset: u64,
    version: u32,
    magic: u32,
}

impl Footer {
    fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < SST_FOOTER_SIZE {
            return None;
        }
        let tail = &bytes[bytes.len() - SST_FOOTER_SIZE..];
        let (bloom_offset, n) = u64::decode_from(tail).ok()?;
        let (version, n2) = u32::decode_from(&tail[n..]).ok()?;
        let (magic, _) = u32::decode_from(&tail[n + n2..]).ok()?;
        Some(Self {
            bloom_offset,
            version,
            magic,
        })
    }
}

/// One sampled `(key, byte_offset)` pair in the sparse index.
struct IndexEntry {
    key: Vec<u8>,
    offset: usize,
}

/// A read-only handle on one on-disk segment.
pub struct SSTable {
    path: PathBuf,
    mmap: Mmap,
    bloom: BloomFilter,
    sparse_index: Vec<IndexEntry>,
    data_end: usize,
}

impl SSTable {
    /// Opens and validates `path`: maps the file, verifies the footer,
    /// loads the bloom filter, and builds the sparse index by scanning
    /// the data section once.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SstableError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let mmap = unsafe { Mmap::map(&file)? };

        let footer = Footer::decode(&mmap).ok_or_else(|| SstableError::CorruptSegment {
            path: path.clone(),
            reason: "file shorter than footer size".into(),
        })?;

        if footer.magic != SST_MAGIC {
            return Err(SstableError::CorruptSegment {
                path,
                reason: format!("bad magic 0x{:08X}", footer.magic),
            });
        }
        if footer.version != SST_VERSION {
            return Err(SstableError::UnsupportedVersion {
                path,
                found: footer.version,
                expected: SST_VERSION,
            });
        }

        let bloom_offset = footer.bloom_offset as usize;
        let data_end = bloom_offset;
        if bloom_offset > mmap.len().saturating_sub(SST_FOOTER_SIZE) {
            return Err(SstableError::CorruptSegment {
                path,
                reason: "bloom_offset past end of file".into(),
            });
        }
        let filter_bytes = &mmap[bloom_offset..mmap.len() - SST_FOOTER_SIZE];
        let (bloom, _) =
            BloomFilter::decode_from(filter_bytes).map_err(|e| SstableError::CorruptSegment {
                path: path.clone(),
                reason: format!("bad bloom filter section: {e}"),
            })?;

        let sparse_index = Self::build_sparse_index(&mmap, data_end)?;

        Ok(Self {
            path,
            mmap,
            bloom,
            sparse_index,
            data_end,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_size(&self) -> u64 {
        self.mmap.len() as u64
    }

    fn build_sparse_index(mmap: &Mmap, data_end: usize) -> Result<Vec<IndexEntry>, SstableError> {
        let mut index = Vec::new();
        let mut offset = 0usize;
        let mut count = 0usize;
        while offset < data_end {
            let record_offset = offset;
            let (key, _value_len, next) = Self::read_record_at(mmap, offset)?;
            if count % SPARSE_INDEX_STRIDE == 0 {
                index.push(IndexEntry {
                    key,
                    offset: record_offset,
                });
            }
            offset = next;
            count += 1;
        }
        Ok(index)
    }

    /// Reads one `{key_size, value_size, key, value}` record at `offset`,
    /// returning `(key, value_len, next_offset)`. Borrow-free: callers
    /// that need the value slice it themselves via `offset..next_offset`.
    fn read_record_at(
        mmap: &[u8],
        offset: usize,
    ) -> Result<(Vec<u8>, usize, usize), SstableError> {
        let (key_size, n1) = u32::decode_from(&mmap[offset..]).map_err(|e| {
            SstableError::CorruptSegment {
                path: PathBuf::new(),
                reason: format!("{e}"),
            }
        })?;
        let (value_size, n2) = u32::decode_from(&mmap[offset + n1..]).map_err(|e| {
            SstableError::CorruptSegment {
                path: PathBuf::new(),
                reason: format!("{e}"),
            }
        })?;
        let key_start = offset + n1 + n2;
        let key_end = key_start + key_size as usize;
        let value_end = key_end + value_size as usize;
        let key = mmap[key_start..key_end].to_vec();
        Ok((key, value_size as usize, value_end))
    }

    fn value_at(&self, record_offset: usize) -> Result<(Vec<u8>, usize), SstableError> {
        let (key_size, n1) = u32::decode_from(&self.mmap[record_offset..])?;
        let (value_size, n2) = u32::decode_from(&self.mmap[record_offset + n1..])?;
        let key_start = record_offset + n1 + n2;
        let key_end = key_start + key_size as usize;
        let value_end = key_end + value_size as usize;
        Ok((self.mmap[key_end..value_end].to_vec(), value_end))
    }

    /// Binary-searches the sparse index for the greatest sample `<= target`,
    /// returning the byte offset to start a sequential scan from (0 if no
    /// sample qualifies).
    fn seek_offset(&self, target: &[u8]) -> usize {
        match self
            .sparse_index
            .binary_search_by(|entry| entry.key.as_slice().cmp(target))
        {
            Ok(idx) => self.sparse_index[idx].offset,
            Err(0) => 0,
            Err(idx) => self.sparse_index[idx - 1].offset,
        }
    }

    /// Exact-match point lookup. `Some(vec![])` denotes a tombstone present
    /// in this segment; `None` means this segment has no record for `key`.
    pub fn find(&self, key: &[u8]) -> Result<Option<Vec<u8>>, SstableError> {
        if !self.bloom.maybe_contains(key) {
            return Ok(None);
        }
        let mut offset = self.seek_offset(key);
        while offset < self.data_end {
            let (k, _value_len, next) = Self::read_record_at(&self.mmap, offset)?;
            match k.as_slice().cmp(key) {
                std::cmp::Ordering::Equal => {
                    let (value, _) = self.value_at(offset)?;
                    return Ok(Some(value));
                }
                std::cmp::Ordering::Greater => return Ok(None),
                std::cmp::Ordering::Less => offset = next,
            }
        }
        Ok(None)
    }

    /// Ascending `(key, value)` pairs whose key begins with `prefix`.
    /// `value` may be empty (tombstone); the caller resolves visibility.
    pub fn scan_by_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, SstableError> {
        let mut out = Vec::new();
        let mut offset = self.seek_offset(prefix);
        while offset < self.data_end {
            let (k, _value_len, next) = Self::read_record_at(&self.mmap, offset)?;
            if k.as_slice() < prefix {
                offset = next;
                continue;
            }
            if has_prefix(&k, prefix) {
                let (value, _) = self.value_at(offset)?;
                out.push((k, value));
                offset = next;
            } else {
                break;
            }
        }
        Ok(out)
    }

    /// Top-K vector scan over records with `prefix`. Values are decoded as
    /// `{stored_magnitude:f32, floats...}`; tombstones (empty values) are
    /// skipped. Score is cosine similarity using the stored magnitude, not
    /// a recomputed one.
    pub fn find_top_vectors(
        &self,
        prefix: &[u8],
        query: &[f32],
        k: usize,
    ) -> Result<Vec<(Vec<u8>, f32)>, SstableError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let query_mag = crate::vector::magnitude(query);
        let mut best: Vec<(Vec<u8>, f32)> = Vec::with_capacity(k);

        for (key, value) in self.scan_by_prefix(prefix)? {
            if value.is_empty() {
                continue;
            }
            let Some((stored_mag, floats)) = crate::vector::decode_vector_value(&value) else {
                warn!(?key, "vector record has malformed length, skipping");
                continue;
            };
            if floats.len() != query.len() {
                continue;
            }
            let score = crate::vector::cosine_score(query, query_mag, stored_mag, &floats);

            if best.len() < k {
                best.push((key, score));
                best.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            } else if let Some(worst) = best.last()
                && score > worst.1
            {
                best.pop();
                let pos = best
                    .binary_search_by(|probe| {
                        score
                            .partial_cmp(&probe.1)
                            .unwrap_or(std::cmp::Ordering::Equal)
                            .reverse()
                    })
                    .unwrap_or_else(|i| i);
                best.insert(pos, (key, score));
            }
        }
        Ok(best)
    }
}
