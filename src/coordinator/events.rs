//! # Session Events
//!
//! Events flowing from worker session threads to the collector. The
//! collector thread is the only consumer and the only owner of the artifact
//! store, so every admission decision happens in one total order.

use std::collections::{BTreeMap, HashSet};
use std::thread;

use crossbeam_channel::Receiver;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::carve::Artifact;
use crate::store::{Admission, ArtifactStore};

/// Events sent by session threads toward the collector.
#[derive(Debug)]
pub enum SessionEvent {
    /// A carved artifact arrived from a worker
    Artifact {
        artifact: Artifact,
        worker_id: String,
    },
    /// A chunk's full result stream was received
    ChunkCollected { chunk_index: u64, worker_id: String },
    /// A session died while this assignment was outstanding
    ChunkFailed { chunk_index: u64, worker_id: String },
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct WorkerTally {
    pub chunks_collected: u64,
    pub artifacts_accepted: u64,
    pub artifacts_duplicate: u64,
}

/// What the collector folded out of a run.
#[derive(Debug, Clone, Serialize)]
pub struct CollectorReport {
    pub chunks_collected: u64,
    pub chunks_failed: u64,
    /// Chunk indices never fully collected: failed mid-flight or never
    /// assigned because every session died first.
    pub missing_chunks: Vec<u64>,
    pub artifacts_recovered: u64,
    pub artifacts_duplicate: u64,
    pub bytes_recovered: u64,
    pub store_errors: u64,
    pub per_worker: BTreeMap<String, WorkerTally>,
}

/// Spawn the collector thread. It runs until every session thread has
/// dropped its sender, then flushes the store and reports.
pub fn spawn_collector(
    mut store: ArtifactStore,
    rx: Receiver<SessionEvent>,
    total_chunks: u64,
) -> thread::JoinHandle<CollectorReport> {
    thread::spawn(move || {
        let mut collected: HashSet<u64> = HashSet::new();
        let mut chunks_failed = 0u64;
        let mut artifacts_recovered = 0u64;
        let mut artifacts_duplicate = 0u64;
        let mut bytes_recovered = 0u64;
        let mut store_errors = 0u64;
        let mut per_worker: BTreeMap<String, WorkerTally> = BTreeMap::new();

        for event in rx {
            match event {
                SessionEvent::Artifact {
                    artifact,
                    worker_id,
                } => match store.admit(&artifact, &worker_id) {
                    Ok(Admission::Accepted) => {
                        artifacts_recovered += 1;
                        bytes_recovered += artifact.size();
                        info!(
                            "stored artifact offset={} size={} worker={}",
                            artifact.absolute_start,
                            artifact.size(),
                            worker_id
                        );
                        per_worker.entry(worker_id).or_default().artifacts_accepted += 1;
                    }
                    Ok(Admission::Duplicate) => {
                        debug!(
                            "duplicate artifact at offset {} skipped",
                            artifact.absolute_start
                        );
                        artifacts_duplicate += 1;
                        per_worker.entry(worker_id).or_default().artifacts_duplicate += 1;
                    }
                    Err(err) => {
                        store_errors += 1;
                        warn!(
                            "failed to store artifact at offset {}: {err}",
                            artifact.absolute_start
                        );
                    }
                },
                SessionEvent::ChunkCollected {
                    chunk_index,
                    worker_id,
                } => {
                    debug!("chunk {chunk_index} collected from {worker_id}");
                    collected.insert(chunk_index);
                    per_worker.entry(worker_id).or_default().chunks_collected += 1;
                }
                SessionEvent::ChunkFailed {
                    chunk_index,
                    worker_id,
                } => {
                    warn!("chunk {chunk_index} lost with worker {worker_id}");
                    chunks_failed += 1;
                }
            }
        }

        if let Err(err) = store.flush() {
            store_errors += 1;
            warn!("manifest flush error: {err}");
        }

        let missing_chunks: Vec<u64> = (0..total_chunks)
            .filter(|index| !collected.contains(index))
            .collect();

        CollectorReport {
            chunks_collected: collected.len() as u64,
            chunks_failed,
            missing_chunks,
            artifacts_recovered,
            artifacts_duplicate,
            bytes_recovered,
            store_errors,
            per_worker,
        }
    })
}
