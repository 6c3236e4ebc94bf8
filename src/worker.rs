//! # Worker
//!
//! Connects to a coordinator, registers during its window, and then carves
//! every chunk it is handed until the coordinator says stop. The carving
//! policy (size bounds) comes from the coordinator's welcome, so all
//! workers of a run apply identical rules.

use std::net::TcpStream;

use anyhow::{Context, Result, bail};
use tracing::{debug, info};

use crate::carve::JpegCarver;
use crate::protocol::{self, Message};

/// Counters reported when the worker drains its connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerStats {
    pub chunks_processed: u64,
    pub artifacts_sent: u64,
    pub bytes_scanned: u64,
}

/// Stable per-process worker identity, reused across reconnects of the
/// same process.
pub fn worker_id() -> String {
    format!("worker_{}", std::process::id())
}

fn hostname() -> String {
    if let Ok(name) = std::env::var("HOSTNAME") {
        if !name.trim().is_empty() {
            return name.trim().to_string();
        }
    }
    if let Ok(name) = std::fs::read_to_string("/etc/hostname") {
        if !name.trim().is_empty() {
            return name.trim().to_string();
        }
    }
    "unknown".to_string()
}

/// Register with the coordinator at `host:port` and process assignments
/// until shutdown.
pub fn run(host: &str, port: u16) -> Result<WorkerStats> {
    let id = worker_id();
    let mut stream = TcpStream::connect((host, port))
        .with_context(|| format!("connecting to coordinator at {host}:{port}"))?;
    info!("connected to coordinator at {host}:{port} as {id}");

    protocol::write_message(
        &mut stream,
        &Message::Hello {
            worker_id: id.clone(),
            hostname: hostname(),
        },
    )?;
    let carver = match protocol::read_message(&mut stream)? {
        Message::Welcome {
            min_artifact_bytes,
            max_artifact_bytes,
        } => {
            debug!(
                "registered, carving bounds min={} max={}",
                min_artifact_bytes, max_artifact_bytes
            );
            JpegCarver::new(min_artifact_bytes, max_artifact_bytes)
        }
        other => {
            bail!("coordinator answered registration with {}", other.kind());
        }
    };

    let mut stats = WorkerStats::default();
    loop {
        match protocol::read_message(&mut stream)? {
            Message::Assignment {
                chunk_index,
                primary_start,
                primary_end,
                overlap_end,
            } => {
                let spans = (
                    primary_end.checked_sub(primary_start),
                    overlap_end.checked_sub(primary_start),
                );
                let (primary_len, expected) = match spans {
                    (Some(primary_len), Some(expected)) if primary_len <= expected => {
                        (primary_len, expected)
                    }
                    _ => bail!(
                        "malformed assignment for chunk {}: {}..{} overlap {} is not ordered",
                        chunk_index,
                        primary_start,
                        primary_end,
                        overlap_end
                    ),
                };
                let limit = u32::try_from(expected)
                    .with_context(|| format!("chunk {chunk_index} exceeds the frame limit"))?;
                let data = protocol::read_frame(&mut stream, limit)?;
                if data.len() as u64 != expected {
                    bail!(
                        "chunk {} carried {} bytes, assignment said {}",
                        chunk_index,
                        data.len(),
                        expected
                    );
                }

                let artifacts = carver.carve(&data, primary_len, primary_start);
                debug!(
                    "chunk {} scanned {} bytes, {} artifacts",
                    chunk_index,
                    data.len(),
                    artifacts.len()
                );

                protocol::write_message(
                    &mut stream,
                    &Message::ResultHeader {
                        chunk_index,
                        artifact_count: artifacts.len() as u64,
                    },
                )?;
                for artifact in &artifacts {
                    protocol::write_message(
                        &mut stream,
                        &Message::ArtifactMeta {
                            absolute_start: artifact.absolute_start,
                            size: artifact.size(),
                        },
                    )?;
                    protocol::write_frame(&mut stream, &artifact.payload)?;
                }

                stats.chunks_processed += 1;
                stats.artifacts_sent += artifacts.len() as u64;
                stats.bytes_scanned += data.len() as u64;
            }
            Message::Shutdown => {
                debug!("shutdown received");
                break;
            }
            other => {
                bail!("unexpected {} while waiting for an assignment", other.kind());
            }
        }
    }

    info!(
        "worker {} done: chunks={} artifacts={} bytes_scanned={}",
        id, stats.chunks_processed, stats.artifacts_sent, stats.bytes_scanned
    );
    Ok(stats)
}
