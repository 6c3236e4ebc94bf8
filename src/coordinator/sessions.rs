//! # Worker Sessions
//!
//! Registration of incoming worker connections and the per-session dispatch
//! threads. Each registered worker gets one thread that pulls chunks from
//! the shared queue, ships them, and streams the results to the collector.
//! A transport error ends only the owning session; chunks still queued are
//! picked up by whichever sessions survive.

use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::carve::Artifact;
use crate::chunk::ChunkDescriptor;
use crate::protocol::{self, Message, ProtocolError};
use crate::source::{ByteSource, SourceError, read_range};

use super::events::SessionEvent;

/// A worker connection that survived the registration handshake.
pub struct WorkerSession {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    pub worker_id: String,
    pub hostname: String,
}

#[derive(Debug, Error)]
enum SessionError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("source error: {0}")]
    Source(#[from] SourceError),
    #[error("artifact of {size} bytes exceeds the {limit} byte carve policy")]
    OversizedArtifact { size: u64, limit: u64 },
    #[error("artifact payload of {got} bytes does not match announced size {announced}")]
    SizeMismatch { announced: u64, got: u64 },
}

/// Complete the handshake on a freshly accepted connection: the worker must
/// deliver a valid hello before the window runs out, and gets the carve
/// policy back. Anything else rejects the connection without closing the
/// window.
pub fn register_worker(
    mut stream: TcpStream,
    peer: SocketAddr,
    remaining: Duration,
    welcome: &Message,
) -> Result<WorkerSession, ProtocolError> {
    stream.set_read_timeout(Some(remaining))?;
    let hello = protocol::read_message(&mut stream)?;
    let (worker_id, hostname) = match hello {
        Message::Hello {
            worker_id,
            hostname,
        } => (worker_id, hostname),
        other => {
            return Err(ProtocolError::Unexpected {
                expected: "hello",
                got: other.kind().to_string(),
            });
        }
    };
    protocol::write_message(&mut stream, welcome)?;
    stream.set_read_timeout(None)?;
    Ok(WorkerSession {
        stream,
        peer,
        worker_id,
        hostname,
    })
}

/// Spawn one dispatch thread per registered worker. Threads end when the
/// chunk queue is drained (after releasing their worker) or when their
/// session dies.
pub fn spawn_session_threads(
    sessions: Vec<WorkerSession>,
    source: Arc<dyn ByteSource>,
    max_artifact_bytes: u64,
    chunk_rx: Receiver<ChunkDescriptor>,
    event_tx: Sender<SessionEvent>,
) -> Vec<thread::JoinHandle<()>> {
    let mut handles = Vec::new();
    for session in sessions {
        let source = source.clone();
        let chunk_rx = chunk_rx.clone();
        let event_tx = event_tx.clone();
        handles.push(thread::spawn(move || {
            run_session(session, source, max_artifact_bytes, chunk_rx, event_tx);
        }));
    }
    handles
}

fn run_session(
    mut session: WorkerSession,
    source: Arc<dyn ByteSource>,
    max_artifact_bytes: u64,
    chunk_rx: Receiver<ChunkDescriptor>,
    event_tx: Sender<SessionEvent>,
) {
    let worker_id = session.worker_id.clone();
    for chunk in chunk_rx {
        let chunk_index = chunk.chunk_index;
        match dispatch_chunk(
            &mut session,
            source.as_ref(),
            max_artifact_bytes,
            &chunk,
            &event_tx,
        ) {
            Ok(artifact_count) => {
                debug!(
                    "chunk {chunk_index} collected from {worker_id}: {artifact_count} artifacts"
                );
                if event_tx
                    .send(SessionEvent::ChunkCollected {
                        chunk_index,
                        worker_id: worker_id.clone(),
                    })
                    .is_err()
                {
                    warn!("event channel closed while recording chunk {chunk_index}");
                    return;
                }
            }
            Err(err) => {
                warn!("session with {worker_id} failed on chunk {chunk_index}: {err}");
                let _ = event_tx.send(SessionEvent::ChunkFailed {
                    chunk_index,
                    worker_id: worker_id.clone(),
                });
                return;
            }
        }
    }

    // queue drained: release the worker
    if let Err(err) = protocol::write_message(&mut session.stream, &Message::Shutdown) {
        debug!("worker {worker_id} was already gone at shutdown: {err}");
    }
    info!("session with {worker_id} finished");
}

/// Ship one chunk and stream its results to the collector. Returns the
/// number of artifacts the worker reported.
fn dispatch_chunk(
    session: &mut WorkerSession,
    source: &dyn ByteSource,
    max_artifact_bytes: u64,
    chunk: &ChunkDescriptor,
    event_tx: &Sender<SessionEvent>,
) -> Result<u64, SessionError> {
    let data = read_range(source, chunk.primary_start, chunk.overlap_end)?;
    protocol::write_message(
        &mut session.stream,
        &Message::Assignment {
            chunk_index: chunk.chunk_index,
            primary_start: chunk.primary_start,
            primary_end: chunk.primary_end,
            overlap_end: chunk.overlap_end,
        },
    )?;
    protocol::write_frame(&mut session.stream, &data)?;
    drop(data);

    let header = protocol::read_message(&mut session.stream)?;
    let artifact_count = match header {
        Message::ResultHeader {
            chunk_index,
            artifact_count,
        } if chunk_index == chunk.chunk_index => artifact_count,
        Message::ResultHeader { chunk_index, .. } => {
            return Err(ProtocolError::Unexpected {
                expected: "result_header for the assigned chunk",
                got: format!("result_header for chunk {chunk_index}"),
            }
            .into());
        }
        other => {
            return Err(ProtocolError::Unexpected {
                expected: "result_header",
                got: other.kind().to_string(),
            }
            .into());
        }
    };

    for _ in 0..artifact_count {
        let meta = protocol::read_message(&mut session.stream)?;
        let (absolute_start, size) = match meta {
            Message::ArtifactMeta {
                absolute_start,
                size,
            } => (absolute_start, size),
            other => {
                return Err(ProtocolError::Unexpected {
                    expected: "artifact_meta",
                    got: other.kind().to_string(),
                }
                .into());
            }
        };
        if size > max_artifact_bytes {
            return Err(SessionError::OversizedArtifact {
                size,
                limit: max_artifact_bytes,
            });
        }
        // max_artifact_bytes is validated to fit a frame, so the cast holds
        let payload = protocol::read_frame(&mut session.stream, size as u32)?;
        if payload.len() as u64 != size {
            return Err(SessionError::SizeMismatch {
                announced: size,
                got: payload.len() as u64,
            });
        }

        let artifact = Artifact::from_payload(absolute_start, payload);
        if event_tx
            .send(SessionEvent::Artifact {
                artifact,
                worker_id: session.worker_id.clone(),
            })
            .is_err()
        {
            warn!("event channel closed while sending an artifact");
        }
    }

    Ok(artifact_count)
}
