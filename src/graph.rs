//! Property-graph key schema: node/edge key encodings, dual-writes for
//! bidirectional edges, label/property indices, and the ID-only
//! traversal primitives.
//!
//! All key components are colon-delimited UTF-8 strings; none may contain
//! `:`. Every key-building function validates this and returns
//! [`GraphError::InvalidComponent`] rather than silently mis-parsing a
//! later scan.
//!
//! This module only produces `(key, value)` records and reads through an
//! [`Engine`] handle — it holds no state of its own, so the same
//! record-building helpers back both [`GraphStore`] (commits immediately)
//! and [`crate::transaction::Transaction`] (buffers for a later atomic
//! commit).

use thiserror::Error;
use tracing::trace;

use crate::codec::{Decode, Encode, EncodingError, MAX_VEC_ELEMENTS, decode_vec, encode_vec};
use crate::engine::{Engine, EngineError};

/// Non-tombstone, non-meaningful marker value used by every presence
/// index: distinct from the empty-value tombstone.
pub const PRESENCE: &[u8] = &[1];

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error("key component {0:?} must not contain ':'")]
    InvalidComponent(String),
}

fn validate(component: &str) -> Result<(), GraphError> {
    if component.contains(':') {
        return Err(GraphError::InvalidComponent(component.to_string()));
    }
    Ok(())
}

fn validate_all<'a>(components: impl IntoIterator<Item = &'a str>) -> Result<(), GraphError> {
    for c in components {
        validate(c)?;
    }
    Ok(())
}

/// A graph node: an id, its labels, and flat string properties.
/// Properties are a `Vec` rather than a map to keep
/// encoding order deterministic and avoid requiring `Hash` on the wire
/// format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: String,
    pub labels: Vec<String>,
    pub properties: Vec<(String, String)>,
}

/// A directed, typed edge between two node ids. The same encoded value
/// is stored at both the outbound and
/// inbound keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub src: String,
    pub edge_type: String,
    pub dst: String,
    pub properties: Vec<(String, String)>,
}

fn encode_properties(properties: &[(String, String)], buf: &mut Vec<u8>) -> Result<(), EncodingError> {
    let count = u32::try_from(properties.len())
        .map_err(|_| EncodingError::LengthOverflow("too many properties".into()))?;
    count.encode_to(buf)?;
    for (k, v) in properties {
        k.encode_to(buf)?;
        v.encode_to(buf)?;
    }
    Ok(())
}

fn decode_properties(buf: &[u8]) -> Result<(Vec<(String, String)>, usize), EncodingError> {
    let (count, mut offset) = u32::decode_from(buf)?;
    if count > MAX_VEC_ELEMENTS {
        return Err(EncodingError::LengthOverflow(format!(
            "property count {count} exceeds MAX_VEC_ELEMENTS ({MAX_VEC_ELEMENTS})"
        )));
    }
    let mut properties = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (k, n1) = String::decode_from(&buf[offset..])?;
        offset += n1;
        let (v, n2) = String::decode_from(&buf[offset..])?;
        offset += n2;
        properties.push((k, v));
    }
    Ok((properties, offset))
}

impl Encode for Node {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.id.encode_to(buf)?;
        encode_vec(&self.labels, buf)?;
        encode_properties(&self.properties, buf)
    }
}

impl Decode for Node {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (id, mut offset) = String::decode_from(buf)?;
        let (labels, n) = decode_vec::<String>(&buf[offset..])?;
        offset += n;
        let (properties, n) = decode_properties(&buf[offset..])?;
        offset += n;
        Ok((
            Node {
                id,
                labels,
                properties,
            },
            offset,
        ))
    }
}

impl Encode for Edge {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.src.encode_to(buf)?;
        self.edge_type.encode_to(buf)?;
        self.dst.encode_to(buf)?;
        encode_properties(&self.properties, buf)
    }
}

impl Decode for Edge {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (src, mut offset) = String::decode_from(buf)?;
        let (edge_type, n) = String::decode_from(&buf[offset..])?;
        offset += n;
        let (dst, n) = String::decode_from(&buf[offset..])?;
        offset += n;
        let (properties, n) = decode_properties(&buf[offset..])?;
        offset += n;
        Ok((
            Edge {
                src,
                edge_type,
                dst,
                properties,
            },
            offset,
        ))
    }
}

// ------------------------------------------------------------------------------------------------
// Key encodings
// ------------------------------------------------------------------------------------------------

pub fn node_key(id: &str) -> Result<Vec<u8>, GraphError> {
    validate(id)?;
    Ok(format!("g:v:{id}").into_bytes())
}

fn node_label_index_key(label: &str, id: &str) -> Result<Vec<u8>, GraphError> {
    validate_all([label, id])?;
    Ok(format!("g:idx:v:{label}:{id}").into_bytes())
}

fn node_prop_index_key(label: &str, key: &str, val: &str, id: &str) -> Result<Vec<u8>, GraphError> {
    validate_all([label, key, val, id])?;
    Ok(format!("g:idx:v_prop:{label}:{key}:{val}:{id}").into_bytes())
}

pub fn edge_out_key(src: &str, edge_type: &str, dst: &str) -> Result<Vec<u8>, GraphError> {
    validate_all([src, edge_type, dst])?;
    Ok(format!("g:e:out:{src}:{edge_type}:{dst}").into_bytes())
}

pub fn edge_in_key(dst: &str, edge_type: &str, src: &str) -> Result<Vec<u8>, GraphError> {
    validate_all([dst, edge_type, src])?;
    Ok(format!("g:e:in:{dst}:{edge_type}:{src}").into_bytes())
}

fn edge_prop_index_key(
    edge_type: &str,
    key: &str,
    val: &str,
    src: &str,
    dst: &str,
) -> Result<Vec<u8>, GraphError> {
    validate_all([edge_type, key, val, src, dst])?;
    Ok(format!("g:idx:e_prop:{edge_type}:{key}:{val}:{src}:{dst}").into_bytes())
}

/// Returns the component after the last `:` in `key` as a `String`.
fn last_component(key: &[u8]) -> Option<String> {
    let pos = key.iter().rposition(|b| *b == b':')?;
    String::from_utf8(key[pos + 1..].to_vec()).ok()
}

/// Builds the full record set for `put_node`: the node body plus
/// one label-presence record per label and one property-presence record
/// per `(label, key, val)` triple.
pub fn node_records(node: &Node) -> Result<Vec<(Vec<u8>, Vec<u8>)>, GraphError> {
    let mut records = Vec::new();
    let encoded = crate::codec::encode_to_vec(node)?;
    records.push((node_key(&node.id)?, encoded));
    for label in &node.labels {
        records.push((node_label_index_key(label, &node.id)?, PRESENCE.to_vec()));
        for (key, val) in &node.properties {
            records.push((
                node_prop_index_key(label, key, val, &node.id)?,
                PRESENCE.to_vec(),
            ));
        }
    }
    Ok(records)
}

/// Builds the full record set for `put_edge`: dual outbound/
/// inbound writes plus one property-presence record per edge property.
pub fn edge_records(edge: &Edge) -> Result<Vec<(Vec<u8>, Vec<u8>)>, GraphError> {
    let mut records = Vec::new();
    let encoded = crate::codec::encode_to_vec(edge)?;
    records.push((edge_out_key(&edge.src, &edge.edge_type, &edge.dst)?, encoded.clone()));
    records.push((edge_in_key(&edge.dst, &edge.edge_type, &edge.src)?, encoded));
    for (key, val) in &edge.properties {
        records.push((
            edge_prop_index_key(&edge.edge_type, key, val, &edge.src, &edge.dst)?,
            PRESENCE.to_vec(),
        ));
    }
    Ok(records)
}

/// Tombstones for both directions of an edge. Edge property indices are
/// left as stale markers; callers that rely on them must re-read the
/// edge to post-filter.
pub fn remove_edge_records(
    src: &str,
    edge_type: &str,
    dst: &str,
) -> Result<Vec<(Vec<u8>, Vec<u8>)>, GraphError> {
    Ok(vec![
        (edge_out_key(src, edge_type, dst)?, Vec::new()),
        (edge_in_key(dst, edge_type, src)?, Vec::new()),
    ])
}

/// Thin façade over [`Engine`] for node/edge reads and writes that don't
/// need transactional batching with unrelated mutations.
pub struct GraphStore {
    engine: Engine,
}

impl GraphStore {
    pub fn new(engine: Engine) -> Self {
        Self { engine }
    }

    pub fn put_node(&self, node: &Node) -> Result<(), GraphError> {
        let records = node_records(node)?;
        self.engine.write_batch(&records, true)?;
        trace!(id = %node.id, "graph: put_node");
        Ok(())
    }

    pub fn get_node(&self, id: &str) -> Result<Option<Node>, GraphError> {
        let key = node_key(id)?;
        match self.engine.get(&key)? {
            Some(bytes) => {
                let (node, _) = Node::decode_from(&bytes)?;
                Ok(Some(node))
            }
            None => Ok(None),
        }
    }

    pub fn put_edge(&self, edge: &Edge) -> Result<(), GraphError> {
        let records = edge_records(edge)?;
        self.engine.write_batch(&records, true)?;
        trace!(src = %edge.src, dst = %edge.dst, ty = %edge.edge_type, "graph: put_edge");
        Ok(())
    }

    pub fn remove_edge(&self, src: &str, edge_type: &str, dst: &str) -> Result<(), GraphError> {
        let records = remove_edge_records(src, edge_type, dst)?;
        self.engine.write_batch(&records, true)?;
        Ok(())
    }

    /// ID-only outbound neighbor scan, without deserializing edge bodies.
    pub fn outbound_target_ids(&self, src: &str, edge_type: &str) -> Result<Vec<String>, GraphError> {
        validate_all([src, edge_type])?;
        let prefix = format!("g:e:out:{src}:{edge_type}:");
        self.ids_from_prefix(prefix.as_bytes())
    }

    /// Symmetric inbound scan.
    pub fn inbound_source_ids(&self, dst: &str, edge_type: &str) -> Result<Vec<String>, GraphError> {
        validate_all([dst, edge_type])?;
        let prefix = format!("g:e:in:{dst}:{edge_type}:");
        self.ids_from_prefix(prefix.as_bytes())
    }

    /// Node ids with `label` for which `key == val`, per the (advisory,
    /// stale-tolerant — P13) property index.
    pub fn get_nodes_by_property(
        &self,
        label: &str,
        key: &str,
        val: &str,
    ) -> Result<Vec<String>, GraphError> {
        validate_all([label, key, val])?;
        let prefix = format!("g:idx:v_prop:{label}:{key}:{val}:");
        self.ids_from_prefix(prefix.as_bytes())
    }

    fn ids_from_prefix(&self, prefix: &[u8]) -> Result<Vec<String>, GraphError> {
        let keys = self.engine.scan_prefix_keys(prefix)?;
        Ok(keys.into_iter().filter_map(|k| last_component(&k)).collect())
    }
}
