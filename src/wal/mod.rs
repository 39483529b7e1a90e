//! Write-ahead log: an append-only, batch-framed, CRC-protected record log.
//!
//! Every write batch is serialized into one contiguous buffer and appended
//! to the log in a single write call, framed as:
//!
//! ```text
//! RECORD_BEGIN  (u32 = 1)
//!  { RECORD_PUT (u32 = 2)
//!    key_size    (u32)
//!    value_size  (u32)
//!    crc32       (u64 — CRC32 of key‖value, zero-extended)
//!    key         (key_size bytes)
//!    value       (value_size bytes) }*
//! RECORD_COMMIT (u32 = 3)
//! ```
//!
//! Replay stops at the first framing error, CRC mismatch, oversized field,
//! or truncated tail — any records already handed to the sink from fully
//! COMMIT-framed batches remain applied; the incomplete trailing batch is
//! discarded in full.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::codec::{Decode, Encode};

const RECORD_BEGIN: u32 = 1;
const RECORD_PUT: u32 = 2;
const RECORD_COMMIT: u32 = 3;

/// Per-field safety limit during replay: guards against a corrupt length
/// field sending the reader off to allocate gigabytes.
const MAX_FIELD_SIZE: u64 = 50 * 1024 * 1024;

/// Errors raised while appending to or flushing the WAL.
///
/// Replay itself never returns an error for corrupt data — a corrupt tail
/// batch causes replay to stop early and be discarded, not to fail the
/// caller's `open`.
#[derive(Debug, Error)]
pub enum WalError {
    #[error("wal io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("wal encoding error: {0}")]
    Encoding(#[from] crate::codec::EncodingError),
}

/// A single committed batch recovered from the log: an ordered list of
/// `(key, value)` records.
pub type WalBatch = Vec<(Vec<u8>, Vec<u8>)>;

/// Append-only write-ahead log backed by one file.
#[derive(Debug)]
pub struct Wal {
    file: Mutex<File>,
    path: PathBuf,
}

impl Wal {
    /// Opens (creating if absent) the WAL file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, WalError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        debug!(path = %path.display(), "opened wal");
        Ok(Self {
            file: Mutex::new(file),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serializes `batch` into one contiguous frame and appends it in a
    /// single write call. If `urgent`, forces the write to device before
    /// returning.
    ///
    /// `batch` must be non-empty; an empty batch still produces a valid
    /// (no-op) BEGIN/COMMIT frame, which is harmless but pointless, so
    /// callers should avoid it.
    pub fn append_batch(&self, batch: &[(Vec<u8>, Vec<u8>)], urgent: bool) -> Result<(), WalError> {
        let mut buf = Vec::with_capacity(16 + batch.len() * 32);
        RECORD_BEGIN.encode_to(&mut buf)?;
        for (key, value) in batch {
            RECORD_PUT.encode_to(&mut buf)?;
            (key.len() as u32).encode_to(&mut buf)?;
            (value.len() as u32).encode_to(&mut buf)?;
            let crc = crc_of(key, value);
            crc.encode_to(&mut buf)?;
            buf.extend_from_slice(key);
            buf.extend_from_slice(value);
        }
        RECORD_COMMIT.encode_to(&mut buf)?;

        let mut file = self
            .file
            .lock()
            .map_err(|_| std::io::Error::other("wal mutex poisoned"))?;
        file.write_all(&buf)?;
        if urgent {
            file.sync_all()?;
        }
        Ok(())
    }

    /// Forces all buffered writes to device.
    pub fn flush(&self) -> Result<(), WalError> {
        let file = self
            .file
            .lock()
            .map_err(|_| std::io::Error::other("wal mutex poisoned"))?;
        file.sync_all()?;
        Ok(())
    }

    /// Replays the log from offset 0, returning every fully COMMIT-framed,
    /// CRC-valid batch in order. Stops silently (without error) at the
    /// first corrupt or truncated frame; anything after that point,
    /// including a dangling incomplete batch, is discarded.
    pub fn replay(&self) -> Result<Vec<WalBatch>, WalError> {
        let bytes = {
            let mut file = self
                .file
                .lock()
                .map_err(|_| std::io::Error::other("wal mutex poisoned"))?;
            let mut buf = Vec::new();
            use std::io::Seek;
            file.seek(std::io::SeekFrom::Start(0))?;
            file.read_to_end(&mut buf)?;
            file.seek(std::io::SeekFrom::End(0))?;
            buf
        };

        let mut committed = Vec::new();
        let mut offset = 0usize;

        'outer: loop {
            let Some((tag, n)) = try_decode_u32(&bytes[offset..]) else {
                break;
            };
            if tag != RECORD_BEGIN {
                warn!(tag, "wal replay: expected RECORD_BEGIN, stopping");
                break;
            }
            offset += n;

            let mut pending: WalBatch = Vec::new();
            loop {
                let Some((tag, n)) = try_decode_u32(&bytes[offset..]) else {
                    warn!("wal replay: truncated before commit, discarding pending batch");
                    break 'outer;
                };
                offset += n;

                match tag {
                    RECORD_PUT => {
                        let Some((key_size, n)) = try_decode_u32(&bytes[offset..]) else {
                            break 'outer;
                        };
                        offset += n;
                        let Some((value_size, n)) = try_decode_u32(&bytes[offset..]) else {
                            break 'outer;
                        };
                        offset += n;

                        if key_size as u64 >= MAX_FIELD_SIZE || value_size as u64 >= MAX_FIELD_SIZE
                        {
                            warn!(key_size, value_size, "wal replay: field exceeds safety limit");
                            break 'outer;
                        }

                        let Some((crc, n)) = try_decode_u64(&bytes[offset..]) else {
                            break 'outer;
                        };
                        offset += n;

                        let key_size = key_size as usize;
                        let value_size = value_size as usize;
                        if bytes.len() < offset + key_size + value_size {
                            warn!("wal replay: truncated key/value payload");
                            break 'outer;
                        }
                        let key = bytes[offset..offset + key_size].to_vec();
                        offset += key_size;
                        let value = bytes[offset..offset + value_size].to_vec();
                        offset += value_size;

                        if crc_of(&key, &value) != crc {
                            warn!("wal replay: crc mismatch, stopping");
                            break 'outer;
                        }

                        pending.push((key, value));
                    }
                    RECORD_COMMIT => {
                        committed.push(pending);
                        break;
                    }
                    other => {
                        warn!(tag = other, "wal replay: unknown tag, stopping");
                        break 'outer;
                    }
                }
            }
        }

        info!(batches = committed.len(), "wal replay complete");
        Ok(committed)
    }

    /// Truncates the log to empty. Used when rotating to a fresh WAL file
    /// in place rather than renaming (not the engine's default rotation
    /// path, but useful for tests and `wipe`).
    pub fn truncate(&self) -> Result<(), WalError> {
        let file = self
            .file
            .lock()
            .map_err(|_| std::io::Error::other("wal mutex poisoned"))?;
        file.set_len(0)?;
        file.sync_all()?;
        Ok(())
    }
}

fn crc_of(key: &[u8], value: &[u8]) -> u64 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(key);
    hasher.update(value);
    hasher.finalize() as u64
}

fn try_decode_u32(buf: &[u8]) -> Option<(u32, usize)> {
    u32::decode_from(buf).ok()
}

fn try_decode_u64(buf: &[u8]) -> Option<(u64, usize)> {
    u64::decode_from(buf).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_wal() -> (tempfile::TempDir, Wal) {
        let dir = tempdir().unwrap();
        let wal = Wal::open(dir.path().join("kore.wal")).unwrap();
        (dir, wal)
    }

    #[test]
    fn replay_empty_wal_yields_no_batches() {
        let (_dir, wal) = open_wal();
        assert!(wal.replay().unwrap().is_empty());
    }

    #[test]
    fn append_then_replay_round_trips() {
        let (_dir, wal) = open_wal();
        wal.append_batch(&[(b"k1".to_vec(), b"v1".to_vec())], true)
            .unwrap();
        wal.append_batch(
            &[(b"k2".to_vec(), b"v2".to_vec()), (b"k3".to_vec(), b"v3".to_vec())],
            true,
        )
        .unwrap();

        let batches = wal.replay().unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0], vec![(b"k1".to_vec(), b"v1".to_vec())]);
        assert_eq!(
            batches[1],
            vec![(b"k2".to_vec(), b"v2".to_vec()), (b"k3".to_vec(), b"v3".to_vec())]
        );
    }

    #[test]
    fn truncated_tail_discards_incomplete_batch_only() {
        let (dir, wal) = open_wal();
        wal.append_batch(&[(b"k1".to_vec(), b"v1".to_vec())], true)
            .unwrap();
        wal.append_batch(&[(b"k2".to_vec(), b"v2".to_vec())], true)
            .unwrap();
        drop(wal);

        let path = dir.path().join("kore.wal");
        let len = std::fs::metadata(&path).unwrap().len();
        let f = OpenOptions::new().write(true).open(&path).unwrap();
        f.set_len(len - 5).unwrap();
        drop(f);

        let wal = Wal::open(&path).unwrap();
        let batches = wal.replay().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0], vec![(b"k1".to_vec(), b"v1".to_vec())]);
    }

    #[test]
    fn crc_mismatch_stops_replay() {
        let (dir, wal) = open_wal();
        wal.append_batch(&[(b"k1".to_vec(), b"v1".to_vec())], true)
            .unwrap();
        drop(wal);

        let path = dir.path().join("kore.wal");
        let mut bytes = std::fs::read(&path).unwrap();
        // Flip a byte inside the key payload to break the checksum.
        let corrupt_idx = bytes.len() - 3;
        bytes[corrupt_idx] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let wal = Wal::open(&path).unwrap();
        assert!(wal.replay().unwrap().is_empty());
    }
}
