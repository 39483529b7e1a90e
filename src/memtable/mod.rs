//! Ordered in-memory map from byte-key to byte-value with accurate size
//! accounting.
//!
//! A tombstone is represented the same way everywhere in this crate: a
//! zero-length value. The MemTable itself is agnostic to that meaning — it
//! stores and returns whatever bytes were put, including empty ones — the
//! engine's read path is what translates an empty value into "absent".

use std::collections::BTreeMap;
use std::sync::RwLock;

use thiserror::Error;

use crate::codec::has_prefix;

#[derive(Debug, Error)]
pub enum MemtableError {
    #[error("memtable lock poisoned")]
    Poisoned,
}

#[derive(Debug, Default)]
struct Inner {
    map: BTreeMap<Vec<u8>, Vec<u8>>,
    size_bytes: usize,
}

/// Ordered in-memory key-value buffer. Cheap to clone (shares the inner
/// lock), so the engine can hand out a handle without copying the tree.
#[derive(Debug, Default)]
pub struct Memtable {
    inner: RwLock<Inner>,
}

impl Memtable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites `key` with `value`. The size counter is kept
    /// exactly equal to the sum of `|k|+|v|` over all currently resident
    /// entries: a fresh key adds `|k|+|v|`; an overwrite adds only the
    /// value-size delta, since the key was already resident.
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<(), MemtableError> {
        let mut inner = self.inner.write().map_err(|_| MemtableError::Poisoned)?;
        let added = key.len() + value.len();
        match inner.map.insert(key.clone(), value) {
            Some(prev) => {
                inner.size_bytes = inner.size_bytes + added - key.len() - prev.len();
            }
            None => {
                inner.size_bytes += added;
            }
        }
        Ok(())
    }

    /// Exact-match lookup. Returns the raw stored value (which may be
    /// empty, i.e. a tombstone) or `None` if the key was never written.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, MemtableError> {
        let inner = self.inner.read().map_err(|_| MemtableError::Poisoned)?;
        Ok(inner.map.get(key).cloned())
    }

    /// Accurate resident byte count (`sum(|k|+|v|)` over all entries).
    pub fn size_bytes(&self) -> usize {
        self.inner
            .read()
            .map(|inner| inner.size_bytes)
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|inner| inner.map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of entries from the first key `>= prefix` in ascending
    /// order, including keys that do not themselves share `prefix` — the
    /// caller is expected to stop consuming once a yielded key no longer
    /// has `prefix` as a prefix (the same contract SSTable readers use).
    pub fn iter_from(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, MemtableError> {
        let inner = self.inner.read().map_err(|_| MemtableError::Poisoned)?;
        Ok(inner
            .map
            .range(prefix.to_vec()..)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    /// Snapshot of entries from the first key `>= prefix`, already
    /// filtered down to keys that share `prefix` (a convenience built atop
    /// [`Self::iter_from`]).
    pub fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, MemtableError> {
        Ok(self
            .iter_from(prefix)?
            .into_iter()
            .take_while(|(k, _)| has_prefix(k, prefix))
            .collect())
    }

    /// Full ascending snapshot of all entries.
    pub fn iter_all(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, MemtableError> {
        let inner = self.inner.read().map_err(|_| MemtableError::Poisoned)?;
        Ok(inner.map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    /// Drops all entries and resets the size counter.
    pub fn clear(&self) -> Result<(), MemtableError> {
        let mut inner = self.inner.write().map_err(|_| MemtableError::Poisoned)?;
        inner.map.clear();
        inner.size_bytes = 0;
        Ok(())
    }
}
