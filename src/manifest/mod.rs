//! MANIFEST: a file listing the current segment filenames, oldest→newest.
//! Advanced by write-to-temp + atomic rename + directory fsync, so a
//! crash mid-advance never leaves a half-written MANIFEST visible.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

const MANIFEST_FILENAME: &str = "MANIFEST";
const MANIFEST_TMP_FILENAME: &str = "MANIFEST.tmp";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("manifest contains invalid utf-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}

/// Tracks the ordered list of active segment filenames for one data
/// directory and persists changes atomically.
pub struct Manifest {
    dir: PathBuf,
    segments: Vec<String>,
}

impl Manifest {
    /// Loads the MANIFEST from `dir` if present; returns an empty manifest
    /// otherwise (the engine falls back to a filename scan in that case).
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let dir = dir.as_ref().to_path_buf();
        let path = dir.join(MANIFEST_FILENAME);
        let segments = if path.exists() {
            let raw = fs::read(&path)?;
            let text = String::from_utf8(raw)?;
            text.lines()
                .map(|l| l.trim())
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect()
        } else {
            Vec::new()
        };
        debug!(count = segments.len(), "loaded manifest");
        Ok(Self { dir, segments })
    }

    /// Current ordered list of segment filenames (oldest → newest).
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Atomically replaces the segment list and persists it: write to
    /// `MANIFEST.tmp`, force, rename over `MANIFEST`, force the directory.
    pub fn replace(&mut self, segments: Vec<String>) -> Result<(), ManifestError> {
        let tmp_path = self.dir.join(MANIFEST_TMP_FILENAME);
        let final_path = self.dir.join(MANIFEST_FILENAME);

        let mut contents = String::new();
        for name in &segments {
            contents.push_str(name);
            contents.push('\n');
        }

        let mut file = File::create(&tmp_path)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp_path, &final_path)?;
        if let Ok(dir_handle) = File::open(&self.dir) {
            dir_handle.sync_all()?;
        }

        info!(count = segments.len(), "manifest advanced");
        self.segments = segments;
        Ok(())
    }

    /// Appends one segment name to the end (newest) and persists.
    pub fn append(&mut self, name: String) -> Result<(), ManifestError> {
        let mut segments = self.segments.clone();
        segments.push(name);
        self.replace(segments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn opens_empty_when_absent() {
        let dir = tempdir().unwrap();
        let manifest = Manifest::open(dir.path()).unwrap();
        assert!(manifest.segments().is_empty());
    }

    #[test]
    fn append_then_reopen_round_trips() {
        let dir = tempdir().unwrap();
        let mut manifest = Manifest::open(dir.path()).unwrap();
        manifest.append("segment_1.sst".into()).unwrap();
        manifest.append("segment_2.sst".into()).unwrap();

        let reopened = Manifest::open(dir.path()).unwrap();
        assert_eq!(reopened.segments(), &["segment_1.sst", "segment_2.sst"]);
    }

    #[test]
    fn replace_swaps_entire_list_atomically() {
        let dir = tempdir().unwrap();
        let mut manifest = Manifest::open(dir.path()).unwrap();
        manifest.append("segment_1.sst".into()).unwrap();
        manifest.append("segment_2.sst".into()).unwrap();
        manifest
            .replace(vec!["compacted_1.sst".into()])
            .unwrap();

        let reopened = Manifest::open(dir.path()).unwrap();
        assert_eq!(reopened.segments(), &["compacted_1.sst"]);
        assert!(!dir.path().join("MANIFEST.tmp").exists());
    }
}
