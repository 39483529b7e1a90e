//! Document storage: opaque document bytes under
//! `doc:<collection>:<id>` plus optional
//! caller-registered secondary equality indices under
//! `idx:<collection>:<name>:<value>`.
//!
//! Document bodies are opaque `Vec<u8>`; this crate does not parse or
//! require any particular serialization of them (the caller owns that).
//! Secondary indices are built from caller-supplied extractor closures
//! run over those bytes at write time.
//!
//! Per P13, index entries are advisory and never rewritten on update: a
//! document that changes the field an index is built on leaves its old
//! index entry in place alongside the new one. Readers that need exact
//! results must re-check the document after resolving an index lookup.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use thiserror::Error;
use tracing::trace;

use crate::engine::{Engine, EngineError};

#[derive(Debug, Error)]
pub enum CollectionError {
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("collection/index/id component {0:?} must not contain ':'")]
    InvalidComponent(String),
}

fn validate(component: &str) -> Result<(), CollectionError> {
    if component.contains(':') {
        return Err(CollectionError::InvalidComponent(component.to_string()));
    }
    Ok(())
}

/// Extracts the index value for a document's bytes, or `None` if this
/// document has no value for that index (and is therefore omitted from
/// it).
pub type Extractor = Arc<dyn Fn(&[u8]) -> Option<String> + Send + Sync>;

fn doc_key(collection: &str, id: &str) -> Result<Vec<u8>, CollectionError> {
    validate(collection)?;
    validate(id)?;
    Ok(format!("doc:{collection}:{id}").into_bytes())
}

fn index_key(collection: &str, name: &str, value: &str) -> Result<Vec<u8>, CollectionError> {
    validate(collection)?;
    validate(name)?;
    validate(value)?;
    Ok(format!("idx:{collection}:{name}:{value}").into_bytes())
}

fn doc_prefix(collection: &str) -> String {
    format!("doc:{collection}:")
}

const INDEX_LIST_SEP: char = ',';

fn parse_id_list(raw: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(raw)
        .split(INDEX_LIST_SEP)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn render_id_list(ids: &[String]) -> Vec<u8> {
    ids.join(&INDEX_LIST_SEP.to_string()).into_bytes()
}

/// Document store with registerable secondary indices over a shared
/// [`Engine`].
pub struct CollectionStore {
    engine: Engine,
    indices: RwLock<HashMap<String, Vec<(String, Extractor)>>>,
}

impl CollectionStore {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            indices: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a named secondary index for `collection`: every future
    /// `put_doc` into that collection runs `extractor` over the new
    /// document bytes and, if it returns `Some(value)`, appends the
    /// document id to `idx:<collection>:<name>:<value>`.
    pub fn register_index(&self, collection: &str, name: &str, extractor: Extractor) {
        let mut indices = self
            .indices
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        indices
            .entry(collection.to_string())
            .or_default()
            .push((name.to_string(), extractor));
    }

    /// Writes the document body and appends it to every registered index
    /// whose extractor matches, in one atomic batch.
    pub fn put_doc(&self, collection: &str, id: &str, bytes: Vec<u8>) -> Result<(), CollectionError> {
        let key = doc_key(collection, id)?;
        let mut records = vec![(key, bytes.clone())];

        let registered = {
            let indices = self
                .indices
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            indices.get(collection).cloned().unwrap_or_default()
        };

        for (name, extractor) in registered {
            let Some(value) = extractor(&bytes) else {
                continue;
            };
            let ikey = index_key(collection, &name, &value)?;
            let mut ids = match self.engine.get(&ikey)? {
                Some(raw) => parse_id_list(&raw),
                None => Vec::new(),
            };
            if !ids.iter().any(|existing| existing == id) {
                ids.push(id.to_string());
            }
            records.push((ikey, render_id_list(&ids)));
        }

        self.engine.write_batch(&records, true)?;
        trace!(collection, id, "collection: put_doc");
        Ok(())
    }

    pub fn get_doc(&self, collection: &str, id: &str) -> Result<Option<Vec<u8>>, CollectionError> {
        let key = doc_key(collection, id)?;
        Ok(self.engine.get(&key)?)
    }

    pub fn delete_doc(&self, collection: &str, id: &str) -> Result<(), CollectionError> {
        let key = doc_key(collection, id)?;
        self.engine.delete(key)?;
        Ok(())
    }

    /// All `(id, bytes)` pairs currently in `collection`, id-ordered.
    pub fn scan_docs(&self, collection: &str) -> Result<Vec<(String, Vec<u8>)>, CollectionError> {
        let prefix = doc_prefix(collection);
        let entries = self.engine.scan_prefix_entries(prefix.as_bytes())?;
        Ok(entries
            .into_iter()
            .filter_map(|(key, value)| {
                let id = key.get(prefix.len()..)?;
                Some((String::from_utf8_lossy(id).into_owned(), value))
            })
            .collect())
    }

    /// Document ids for which `name` previously resolved to `value` at
    /// write time (advisory — may include ids whose documents have since
    /// changed; P13).
    pub fn lookup_by_index(
        &self,
        collection: &str,
        name: &str,
        value: &str,
    ) -> Result<Vec<String>, CollectionError> {
        let ikey = index_key(collection, name, value)?;
        match self.engine.get(&ikey)? {
            Some(raw) => Ok(parse_id_list(&raw)),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use tempfile::tempdir;

    fn store() -> (tempfile::TempDir, CollectionStore) {
        let dir = tempdir().unwrap();
        let engine = Engine::open(dir.path(), EngineConfig::default()).unwrap();
        (dir, CollectionStore::new(engine))
    }

    #[test]
    fn put_and_get_doc_round_trips() {
        let (_dir, c) = store();
        c.put_doc("users", "u1", b"alice".to_vec()).unwrap();
        assert_eq!(c.get_doc("users", "u1").unwrap(), Some(b"alice".to_vec()));
        assert_eq!(c.get_doc("users", "missing").unwrap(), None);
    }

    #[test]
    fn deleted_doc_reads_back_as_none() {
        let (_dir, c) = store();
        c.put_doc("users", "u1", b"alice".to_vec()).unwrap();
        c.delete_doc("users", "u1").unwrap();
        assert_eq!(c.get_doc("users", "u1").unwrap(), None);
    }

    #[test]
    fn secondary_index_resolves_and_tolerates_staleness() {
        let (_dir, c) = store();
        c.register_index(
            "users",
            "email",
            Arc::new(|bytes: &[u8]| Some(String::from_utf8_lossy(bytes).to_string())),
        );
        c.put_doc("users", "u1", b"alice@example.com".to_vec()).unwrap();
        assert_eq!(
            c.lookup_by_index("users", "email", "alice@example.com").unwrap(),
            vec!["u1".to_string()]
        );

        // Update to a new email: old index entry remains (P13), new one appears.
        c.put_doc("users", "u1", b"alice2@example.com".to_vec()).unwrap();
        assert_eq!(
            c.lookup_by_index("users", "email", "alice@example.com").unwrap(),
            vec!["u1".to_string()]
        );
        assert_eq!(
            c.lookup_by_index("users", "email", "alice2@example.com").unwrap(),
            vec!["u1".to_string()]
        );
    }

    #[test]
    fn scan_docs_returns_every_entry_in_collection() {
        let (_dir, c) = store();
        c.put_doc("users", "u1", b"a".to_vec()).unwrap();
        c.put_doc("users", "u2", b"b".to_vec()).unwrap();
        c.put_doc("orders", "o1", b"c".to_vec()).unwrap();

        let mut docs = c.scan_docs("users").unwrap();
        docs.sort();
        assert_eq!(
            docs,
            vec![("u1".to_string(), b"a".to_vec()), ("u2".to_string(), b"b".to_vec())]
        );
    }

    #[test]
    fn colon_in_id_is_rejected() {
        let (_dir, c) = store();
        assert!(matches!(
            c.put_doc("users", "bad:id", b"x".to_vec()),
            Err(CollectionError::InvalidComponent(_))
        ));
    }
}
