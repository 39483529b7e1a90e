//! Vector payload codec and cosine similarity shared by the brute-force
//! scan path (`SSTable::find_top_vectors`, `Engine::search_vectors`) and
//! the HNSW index.
//!
//! ## On-disk layout
//!
//! `{stored_magnitude: f32_le, v0, v1, …, v_{d-1}: f32_le}`, `4 + 4*d`
//! bytes total. Readers always use the *stored* magnitude rather than
//! recomputing it from the floats, so a corrupt or hand-crafted magnitude
//! is faithfully reproduced rather than silently corrected.

/// Euclidean magnitude (L2 norm) of a vector.
pub fn magnitude(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Encodes `v` as `{magnitude, v0..v_{d-1}}`, little-endian.
pub fn encode_vector_value(v: &[f32]) -> Vec<u8> {
    let mag = magnitude(v);
    let mut bytes = Vec::with_capacity(4 + v.len() * 4);
    bytes.extend_from_slice(&mag.to_le_bytes());
    for f in v {
        bytes.extend_from_slice(&f.to_le_bytes());
    }
    bytes
}

/// Decodes a stored vector value into `(stored_magnitude, floats)`.
/// Returns `None` if the value is shorter than the magnitude field or its
/// length is not `4 + 4*d` for some non-negative integer `d`.
pub fn decode_vector_value(value: &[u8]) -> Option<(f32, Vec<f32>)> {
    if value.len() < 4 || (value.len() - 4) % 4 != 0 {
        return None;
    }
    let stored_mag = f32::from_le_bytes([value[0], value[1], value[2], value[3]]);
    let dim = (value.len() - 4) / 4;
    let mut floats = Vec::with_capacity(dim);
    for i in 0..dim {
        let base = 4 + i * 4;
        floats.push(f32::from_le_bytes([
            value[base],
            value[base + 1],
            value[base + 2],
            value[base + 3],
        ]));
    }
    Some((stored_mag, floats))
}

/// Score returned for a dimension mismatch: always below any real cosine
/// similarity (which lies in `[-1.0, 1.0]`), so naive top-K-by-score
/// ranking discards it without a special case.
pub const DIMENSION_MISMATCH_SENTINEL: f32 = -2.0;

/// Cosine similarity between a query vector (with precomputed magnitude)
/// and a stored `(magnitude, floats)` pair. Returns `0.0` if either
/// magnitude is zero, or [`DIMENSION_MISMATCH_SENTINEL`] if the vectors
/// differ in length; never `NaN`.
pub fn cosine_score(query: &[f32], query_mag: f32, stored_mag: f32, stored: &[f32]) -> f32 {
    if query.len() != stored.len() {
        return DIMENSION_MISMATCH_SENTINEL;
    }
    if stored_mag == 0.0 || query_mag == 0.0 {
        return 0.0;
    }
    let dot: f32 = query.iter().zip(stored.iter()).map(|(a, b)| a * b).sum();
    dot / (query_mag * stored_mag)
}
