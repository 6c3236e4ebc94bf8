//! # Artifact Store
//!
//! Merge point for everything the workers send back. Admission is
//! content-addressed: the first artifact with a given fingerprint is
//! persisted, later identical payloads are counted as duplicates and never
//! touch the disk. The store has a single owner (the collector thread), so
//! admission order is total and needs no locking.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::carve::Artifact;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("manifest error: {0}")]
    Manifest(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    Duplicate,
}

/// One manifest line per persisted artifact.
#[derive(Debug, Clone, Serialize)]
pub struct StoredArtifact {
    pub file_name: String,
    pub absolute_start: u64,
    pub size: u64,
    pub fingerprint: String,
    pub worker_id: String,
}

pub struct ArtifactStore {
    recovered_dir: PathBuf,
    manifest: BufWriter<File>,
    seen: HashSet<String>,
    records: Vec<StoredArtifact>,
}

impl ArtifactStore {
    pub fn create(run_dir: &Path) -> Result<Self, StoreError> {
        let recovered_dir = run_dir.join("recovered");
        fs::create_dir_all(&recovered_dir)?;
        let manifest = File::create(run_dir.join("manifest.jsonl"))?;
        Ok(Self {
            recovered_dir,
            manifest: BufWriter::new(manifest),
            seen: HashSet::new(),
            records: Vec::new(),
        })
    }

    /// Persist one artifact unless an identical payload was already admitted.
    pub fn admit(&mut self, artifact: &Artifact, worker_id: &str) -> Result<Admission, StoreError> {
        if self.seen.contains(&artifact.fingerprint) {
            return Ok(Admission::Duplicate);
        }

        let file_name = format!(
            "recovered_{:012X}_{}.jpg",
            artifact.absolute_start,
            &artifact.fingerprint[..8]
        );
        fs::write(self.recovered_dir.join(&file_name), &artifact.payload)?;

        let record = StoredArtifact {
            file_name,
            absolute_start: artifact.absolute_start,
            size: artifact.size(),
            fingerprint: artifact.fingerprint.clone(),
            worker_id: worker_id.to_string(),
        };
        serde_json::to_writer(&mut self.manifest, &record)?;
        self.manifest.write_all(b"\n")?;

        self.seen.insert(artifact.fingerprint.clone());
        self.records.push(record);
        Ok(Admission::Accepted)
    }

    pub fn records(&self) -> &[StoredArtifact] {
        &self.records
    }

    pub fn flush(&mut self) -> Result<(), StoreError> {
        self.manifest.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(absolute_start: u64, payload: &[u8]) -> Artifact {
        Artifact::from_payload(absolute_start, payload.to_vec())
    }

    fn recovered_files(run_dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(run_dir.join("recovered"))
            .expect("read_dir")
            .map(|e| e.expect("entry").file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn identical_payload_is_admitted_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = ArtifactStore::create(dir.path()).expect("store");

        let first = artifact(100, b"same payload bytes");
        let again = artifact(9000, b"same payload bytes");

        assert_eq!(store.admit(&first, "worker_1").expect("admit"), Admission::Accepted);
        assert_eq!(store.admit(&again, "worker_2").expect("admit"), Admission::Duplicate);
        assert_eq!(store.admit(&first, "worker_1").expect("admit"), Admission::Duplicate);

        assert_eq!(store.records().len(), 1);
        assert_eq!(recovered_files(dir.path()).len(), 1);
    }

    #[test]
    fn distinct_payloads_are_both_persisted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = ArtifactStore::create(dir.path()).expect("store");

        store.admit(&artifact(0, b"payload a"), "worker_1").expect("admit");
        store.admit(&artifact(64, b"payload b"), "worker_1").expect("admit");

        assert_eq!(store.records().len(), 2);
        assert_eq!(recovered_files(dir.path()).len(), 2);
    }

    #[test]
    fn file_name_carries_offset_and_fingerprint_prefix() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = ArtifactStore::create(dir.path()).expect("store");

        let artifact = artifact(0xAB, b"named payload");
        store.admit(&artifact, "worker_1").expect("admit");

        let names = recovered_files(dir.path());
        let expected = format!("recovered_0000000000AB_{}.jpg", &artifact.fingerprint[..8]);
        assert_eq!(names, vec![expected]);

        let stored = fs::read(dir.path().join("recovered").join(&names[0])).expect("read");
        assert_eq!(stored, b"named payload");
    }

    #[test]
    fn manifest_records_worker_attribution() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = ArtifactStore::create(dir.path()).expect("store");

        store.admit(&artifact(5, b"manifest payload"), "worker_7").expect("admit");
        store.flush().expect("flush");

        let manifest = fs::read_to_string(dir.path().join("manifest.jsonl")).expect("read");
        let lines: Vec<&str> = manifest.lines().collect();
        assert_eq!(lines.len(), 1);
        let record: serde_json::Value = serde_json::from_str(lines[0]).expect("json");
        assert_eq!(record["absolute_start"], 5);
        assert_eq!(record["size"], 16);
        assert_eq!(record["worker_id"], "worker_7");
        assert_eq!(record["fingerprint"].as_str().expect("fingerprint").len(), 64);
    }
}
