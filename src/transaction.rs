//! Transactions: a buffered, single-shot batch of mutations that commits
//! atomically through [`Engine::write_batch`] or discards everything on
//! rollback.
//!
//! A `Transaction` buffers in memory and touches the engine only once, at
//! `commit`. Reusing it after `commit` or `rollback` — including calling
//! either a second time — is a programmer error surfaced as
//! [`TransactionError::InvalidState`] rather than a panic, so callers can
//! recover from misuse at a call boundary instead of crashing the
//! process.

use thiserror::Error;
use tracing::trace;

use crate::engine::{Engine, EngineError};
use crate::graph::{Edge, GraphError, Node, edge_records, node_records, remove_edge_records};

#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("invalid transaction state: {0}")]
    InvalidState(String),
}

/// A buffered set of `(key, value)` writes applied atomically on commit.
pub struct Transaction {
    engine: Engine,
    buffer: Vec<(Vec<u8>, Vec<u8>)>,
    done: bool,
}

impl Transaction {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            buffer: Vec::new(),
            done: false,
        }
    }

    fn check_open(&self) -> Result<(), TransactionError> {
        if self.done {
            return Err(TransactionError::InvalidState(
                "transaction already committed or rolled back".into(),
            ));
        }
        Ok(())
    }

    /// Buffers a single `(key, value)` write. An empty `value` is a
    /// tombstone, per the engine's key schema.
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<(), TransactionError> {
        self.check_open()?;
        self.buffer.push((key, value));
        Ok(())
    }

    pub fn delete(&mut self, key: Vec<u8>) -> Result<(), TransactionError> {
        self.put(key, Vec::new())
    }

    pub fn put_node(&mut self, node: &Node) -> Result<(), TransactionError> {
        self.check_open()?;
        self.buffer.extend(node_records(node)?);
        Ok(())
    }

    pub fn put_edge(&mut self, edge: &Edge) -> Result<(), TransactionError> {
        self.check_open()?;
        self.buffer.extend(edge_records(edge)?);
        Ok(())
    }

    pub fn remove_edge(&mut self, src: &str, edge_type: &str, dst: &str) -> Result<(), TransactionError> {
        self.check_open()?;
        self.buffer.extend(remove_edge_records(src, edge_type, dst)?);
        Ok(())
    }

    /// Number of records buffered so far.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Applies every buffered write as one atomic `write_batch`. A
    /// transaction with no buffered writes cannot be committed — that is
    /// also an invalid-state failure, since the engine's batch primitive
    /// requires a non-empty record list.
    pub fn commit(&mut self, urgent: bool) -> Result<(), TransactionError> {
        self.check_open()?;
        if self.buffer.is_empty() {
            return Err(TransactionError::InvalidState(
                "cannot commit a transaction with no buffered writes".into(),
            ));
        }
        self.engine.write_batch(&self.buffer, urgent)?;
        self.done = true;
        trace!(records = self.buffer.len(), "transaction: committed");
        Ok(())
    }

    /// Discards every buffered write without touching the engine.
    pub fn rollback(&mut self) -> Result<(), TransactionError> {
        self.check_open()?;
        self.buffer.clear();
        self.done = true;
        trace!("transaction: rolled back");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use tempfile::tempdir;

    fn engine() -> (tempfile::TempDir, Engine) {
        let dir = tempdir().unwrap();
        let engine = Engine::open(dir.path(), EngineConfig::default()).unwrap();
        (dir, engine)
    }

    #[test]
    fn commit_applies_every_buffered_write_atomically() {
        let (_dir, engine) = engine();
        let mut tx = Transaction::new(engine.clone());
        tx.put(b"k1".to_vec(), b"v1".to_vec()).unwrap();
        tx.put(b"k2".to_vec(), b"v2".to_vec()).unwrap();
        tx.commit(true).unwrap();

        assert_eq!(engine.get(b"k1").unwrap(), Some(b"v1".to_vec()));
        assert_eq!(engine.get(b"k2").unwrap(), Some(b"v2".to_vec()));
    }

    #[test]
    fn rollback_discards_buffered_writes() {
        let (_dir, engine) = engine();
        let mut tx = Transaction::new(engine.clone());
        tx.put(b"k1".to_vec(), b"v1".to_vec()).unwrap();
        tx.rollback().unwrap();

        assert_eq!(engine.get(b"k1").unwrap(), None);
    }

    #[test]
    fn double_commit_is_invalid_state() {
        let (_dir, engine) = engine();
        let mut tx = Transaction::new(engine);
        tx.put(b"k1".to_vec(), b"v1".to_vec()).unwrap();
        tx.commit(true).unwrap();
        assert!(matches!(tx.commit(true), Err(TransactionError::InvalidState(_))));
    }

    #[test]
    fn rollback_after_commit_is_invalid_state() {
        let (_dir, engine) = engine();
        let mut tx = Transaction::new(engine);
        tx.put(b"k1".to_vec(), b"v1".to_vec()).unwrap();
        tx.commit(true).unwrap();
        assert!(matches!(tx.rollback(), Err(TransactionError::InvalidState(_))));
    }

    #[test]
    fn committing_empty_transaction_is_invalid_state() {
        let (_dir, engine) = engine();
        let mut tx = Transaction::new(engine);
        assert!(matches!(tx.commit(true), Err(TransactionError::InvalidState(_))));
    }

    #[test]
    fn node_and_edge_writes_buffer_and_commit_together() {
        let (_dir, engine) = engine();
        let mut tx = Transaction::new(engine.clone());
        tx.put_node(&Node {
            id: "u1".into(),
            labels: vec!["User".into()],
            properties: vec![],
        })
        .unwrap();
        tx.put_node(&Node {
            id: "u2".into(),
            labels: vec!["User".into()],
            properties: vec![],
        })
        .unwrap();
        tx.put_edge(&Edge {
            src: "u1".into(),
            edge_type: "FOLLOWS".into(),
            dst: "u2".into(),
            properties: vec![],
        })
        .unwrap();
        tx.commit(true).unwrap();

        let graph = crate::graph::GraphStore::new(engine);
        assert!(graph.get_node("u1").unwrap().is_some());
        assert_eq!(graph.outbound_target_ids("u1", "FOLLOWS").unwrap(), vec!["u2"]);
    }
}
