//! SSTable writer: serializes a sorted stream of `(key, value)` records
//! to an immutable segment file.
//!
//! Writes go to a `.tmp` sibling first, force the file to device, and only
//! then rename into place — the same atomic-publish pattern used for the
//! MANIFEST, so a crash mid-write never leaves a half-built segment visible
//! under its final name.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::bloom::BloomFilter;
use crate::codec::Encode;

use super::{SST_MAGIC, SST_VERSION, SstableError};

/// Builds one SSTable file from `entries`, which must already be sorted in
/// ascending key order (the MemTable's and the compactor's merge both
/// satisfy this).
pub struct SstWriter;

impl SstWriter {
    pub fn build(
        dest_path: impl AsRef<Path>,
        entries: impl IntoIterator<Item = (Vec<u8>, Vec<u8>)>,
    ) -> Result<(), SstableError> {
        let dest_path = dest_path.as_ref();
        let tmp_path = dest_path.with_extension("sst.tmp");
        let entries: Vec<(Vec<u8>, Vec<u8>)> = entries.into_iter().collect();

        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        let mut bloom = BloomFilter::new(entries.len());
        let mut offset = 0u64;

        for (key, value) in &entries {
            let key_size = key.len() as u32;
            let value_size = value.len() as u32;
            let mut header = Vec::with_capacity(8);
            key_size.encode_to(&mut header)?;
            value_size.encode_to(&mut header)?;
            writer.write_all(&header)?;
            writer.write_all(key)?;
            writer.write_all(value)?;
            offset += header.len() as u64 + key_size as u64 + value_size as u64;
            bloom.add(key);
        }

        let bloom_offset = offset;
        let mut filter_bytes = Vec::new();
        bloom.encode_to(&mut filter_bytes)?;
        writer.write_all(&filter_bytes)?;

        let mut footer = Vec::with_capacity(16);
        bloom_offset.encode_to(&mut footer)?;
        SST_VERSION.encode_to(&mut footer)?;
        SST_MAGIC.encode_to(&mut footer)?;
        writer.write_all(&footer)?;

        writer.flush()?;
        writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;

        fs::rename(&tmp_path, dest_path)?;
        if let Some(parent) = dest_path.parent()
            && let Ok(dir) = File::open(parent)
        {
            dir.sync_all()?;
        }

        Ok(())
    }
}
