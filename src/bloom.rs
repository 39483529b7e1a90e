//! Per-segment bloom filter: probabilistic set membership with no false
//! negatives, built while writing an SSTable and reloaded on open.
//!
//! Persisted layout (little-endian, matches the SSTable's `<Filter>`
//! section exactly): `{m:u32, k:u32, bits:[u8; ceil(m/8)]}`. `m` is the bit
//! count and `k` the number of hash probes per key. Index positions are
//! derived via double-hashing over a simple polynomial base hash, the
//! standard trick (Kirsch-Mitzenmacher) for deriving `k` independent-ish
//! probes from two base hashes without running `k` separate hash
//! functions.

use crate::codec::{Decode, Encode, EncodingError};

/// Target false-positive rate used to size new filters.
const TARGET_FP_RATE: f64 = 0.01;

/// A bloom filter over a fixed bit array, sized at construction time.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    m: u32,
    k: u32,
    bits: Vec<u8>,
}

impl BloomFilter {
    /// Builds an empty filter sized for `expected_entries` at the target
    /// false-positive rate. `expected_entries = 0` still yields a minimal
    /// usable (always-absent) filter.
    pub fn new(expected_entries: usize) -> Self {
        let n = expected_entries.max(1) as f64;
        let ln2 = std::f64::consts::LN_2;
        let m_bits = (-(n * TARGET_FP_RATE.ln()) / (ln2 * ln2)).ceil().max(8.0) as u32;
        let k = ((m_bits as f64 / n) * ln2).round().max(1.0) as u32;
        let byte_len = m_bits.div_ceil(8) as usize;
        Self {
            m: m_bits,
            k,
            bits: vec![0u8; byte_len],
        }
    }

    /// Builds a filter with explicit `m`/`k`, used when reconstructing from
    /// disk or in tests that want deterministic sizing.
    pub fn with_params(m: u32, k: u32) -> Self {
        let byte_len = m.div_ceil(8) as usize;
        Self {
            m: m.max(8),
            k: k.max(1),
            bits: vec![0u8; byte_len.max(1)],
        }
    }

    /// Adds `key` to the filter.
    pub fn add(&mut self, key: &[u8]) {
        let (h1, h2) = Self::base_hashes(key);
        for i in 0..self.k {
            let idx = Self::probe(h1, h2, i, self.m);
            self.set_bit(idx);
        }
    }

    /// Returns `false` if `key` is definitely absent; `true` means "maybe
    /// present" (the caller must still verify against the actual data).
    pub fn maybe_contains(&self, key: &[u8]) -> bool {
        let (h1, h2) = Self::base_hashes(key);
        for i in 0..self.k {
            let idx = Self::probe(h1, h2, i, self.m);
            if !self.get_bit(idx) {
                return false;
            }
        }
        true
    }

    pub fn bit_count(&self) -> u32 {
        self.m
    }

    pub fn hash_count(&self) -> u32 {
        self.k
    }

    #[inline]
    fn probe(h1: u64, h2: u64, i: u32, m: u32) -> u32 {
        // Double hashing: g_i(x) = h1 + i*h2 mod m.
        (h1.wrapping_add((i as u64).wrapping_mul(h2)) % m as u64) as u32
    }

    #[inline]
    fn set_bit(&mut self, idx: u32) {
        let byte = (idx / 8) as usize;
        let bit = idx % 8;
        self.bits[byte] |= 1 << bit;
    }

    #[inline]
    fn get_bit(&self, idx: u32) -> bool {
        let byte = (idx / 8) as usize;
        let bit = idx % 8;
        (self.bits[byte] & (1 << bit)) != 0
    }

    /// Two independent base hashes derived from one polynomial rolling
    /// hash over the key bytes, seeded differently, as the source for
    /// double-hashing.
    fn base_hashes(key: &[u8]) -> (u64, u64) {
        const BASE1: u64 = 31;
        const BASE2: u64 = 131;
        let mut h1: u64 = 0xcbf29ce484222325; // FNV offset basis, arbitrary fixed seed
        let mut h2: u64 = 0x100000001b3;
        for &b in key {
            h1 = h1.wrapping_mul(BASE1).wrapping_add(b as u64);
            h2 = h2.wrapping_mul(BASE2).wrapping_add(b as u64);
        }
        (h1, h2)
    }
}

impl Encode for BloomFilter {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.m.encode_to(buf)?;
        self.k.encode_to(buf)?;
        buf.extend_from_slice(&self.bits);
        Ok(())
    }
}

impl Decode for BloomFilter {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (m, mut offset) = u32::decode_from(buf)?;
        let (k, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let byte_len = m.div_ceil(8) as usize;
        if buf.len() < offset + byte_len {
            return Err(EncodingError::UnexpectedEof {
                needed: offset + byte_len,
                available: buf.len(),
            });
        }
        let bits = buf[offset..offset + byte_len].to_vec();
        offset += byte_len;
        Ok((Self { m, k, bits }, offset))
    }
}
