//! # Coordinator
//!
//! Owns a recovery run end to end: load the image, plan the chunk layout,
//! hold the registration window open for workers, fan chunks out over the
//! registered sessions, and fold everything the workers return through the
//! dedup store into a single summary.

pub mod events;
pub mod sessions;

use std::net::{SocketAddr, TcpListener};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use crossbeam_channel::unbounded;
use serde::Serialize;
use tracing::{info, warn};

use crate::chunk::plan_chunks;
use crate::config::{Config, LoadedConfig};
use crate::protocol::Message;
use crate::source::{ByteSource, RawImageSource};
use crate::store::ArtifactStore;

use events::CollectorReport;
use sessions::WorkerSession;

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Time source for the registration window, injectable so window behavior
/// is testable without real waits.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// The bounded interval during which worker registrations are accepted.
/// Once it closes the worker roster is fixed for the whole run.
pub struct RegistrationWindow {
    deadline: Instant,
}

impl RegistrationWindow {
    pub fn open(clock: &dyn Clock, duration: Duration) -> Self {
        Self {
            deadline: clock.now() + duration,
        }
    }

    pub fn is_open(&self, clock: &dyn Clock) -> bool {
        clock.now() < self.deadline
    }

    pub fn remaining(&self, clock: &dyn Clock) -> Duration {
        self.deadline.saturating_duration_since(clock.now())
    }
}

/// Coordinator lifecycle, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    LoadingSource,
    AwaitingWorkers,
    Distributing,
    Collecting,
    Done,
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Init => "init",
            Phase::LoadingSource => "loading_source",
            Phase::AwaitingWorkers => "awaiting_workers",
            Phase::Distributing => "distributing",
            Phase::Collecting => "collecting",
            Phase::Done => "done",
        }
    }
}

/// Final report of a run, also written as `summary.json` in the run
/// directory.
#[derive(Debug, Clone, Serialize)]
pub struct RecoverySummary {
    pub run_id: String,
    pub config_hash: String,
    pub tool_version: String,
    pub image_len: u64,
    pub total_chunks: u64,
    pub started_at: String,
    pub finished_at: String,
    #[serde(flatten)]
    pub outcome: CollectorReport,
}

pub struct Coordinator {
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    cfg: Config,
    config_hash: String,
    output_root: PathBuf,
    clock: Arc<dyn Clock>,
    phase: Phase,
}

impl Coordinator {
    pub fn bind(loaded: &LoadedConfig, output_root: &Path) -> Result<Self> {
        Self::bind_with_clock(loaded, output_root, Arc::new(SystemClock))
    }

    pub fn bind_with_clock(
        loaded: &LoadedConfig,
        output_root: &Path,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        loaded.config.validate()?;
        let addr = SocketAddr::from(([0, 0, 0, 0], loaded.config.listen_port));
        let listener = TcpListener::bind(addr).with_context(|| format!("binding {addr}"))?;
        let local_addr = listener.local_addr()?;
        info!("listening on {local_addr}");
        Ok(Self {
            listener: Some(listener),
            local_addr,
            cfg: loaded.config.clone(),
            config_hash: loaded.config_hash.clone(),
            output_root: output_root.to_path_buf(),
            clock,
            phase: Phase::Init,
        })
    }

    /// Address the listener actually bound, for configs with port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn enter(&mut self, phase: Phase) {
        self.phase = phase;
        info!("phase={}", phase.name());
    }

    /// Drive one full recovery run over `image_path`.
    pub fn run(mut self, image_path: &Path) -> Result<RecoverySummary> {
        let started = chrono::Utc::now();

        self.enter(Phase::LoadingSource);
        let source = RawImageSource::open(image_path)
            .with_context(|| format!("opening image {}", image_path.display()))?;
        let image_len = source.len();
        let source: Arc<dyn ByteSource> = Arc::new(source);
        let chunks = plan_chunks(image_len, self.cfg.chunk_size, self.cfg.overlap_bytes)?;
        let total_chunks = chunks.len() as u64;
        info!(
            "image_len={} chunk_count={} chunk_size={} overlap={}",
            image_len, total_chunks, self.cfg.chunk_size, self.cfg.overlap_bytes
        );

        self.enter(Phase::AwaitingWorkers);
        let listener = self.listener.take().expect("listener already taken");
        let sessions = self.registration_loop(&listener)?;
        // closing the listener is what rejects late arrivals
        drop(listener);
        if sessions.is_empty() {
            bail!(
                "no workers registered within the {}s window",
                self.cfg.registration_window_secs
            );
        }
        info!("workers_registered={}", sessions.len());

        let run_dir = self.output_root.join(&self.cfg.run_id);
        std::fs::create_dir_all(&run_dir)
            .with_context(|| format!("creating run directory {}", run_dir.display()))?;
        let store = ArtifactStore::create(&run_dir)?;

        self.enter(Phase::Distributing);
        let (chunk_tx, chunk_rx) = unbounded();
        for chunk in chunks {
            chunk_tx
                .send(chunk)
                .context("chunk queue closed before distribution")?;
        }
        drop(chunk_tx);

        let (event_tx, event_rx) = unbounded();
        let collector = events::spawn_collector(store, event_rx, total_chunks);
        let handles = sessions::spawn_session_threads(
            sessions,
            source,
            self.cfg.max_artifact_bytes,
            chunk_rx,
            event_tx,
        );

        self.enter(Phase::Collecting);
        for handle in handles {
            let _ = handle.join();
        }
        let report = collector
            .join()
            .map_err(|_| anyhow!("collector thread panicked"))?;

        let summary = RecoverySummary {
            run_id: self.cfg.run_id.clone(),
            config_hash: self.config_hash.clone(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            image_len,
            total_chunks,
            started_at: started.to_rfc3339(),
            finished_at: chrono::Utc::now().to_rfc3339(),
            outcome: report,
        };
        let summary_path = run_dir.join("summary.json");
        let file = std::fs::File::create(&summary_path)
            .with_context(|| format!("creating {}", summary_path.display()))?;
        serde_json::to_writer_pretty(file, &summary)?;

        info!(
            "run_summary artifacts_recovered={} duplicates={} bytes_recovered={} chunks_collected={}/{}",
            summary.outcome.artifacts_recovered,
            summary.outcome.artifacts_duplicate,
            summary.outcome.bytes_recovered,
            summary.outcome.chunks_collected,
            summary.total_chunks
        );
        if !summary.outcome.missing_chunks.is_empty() {
            warn!(
                "missing chunk coverage: {:?}",
                summary.outcome.missing_chunks
            );
        }

        self.enter(Phase::Done);
        Ok(summary)
    }

    fn registration_loop(&self, listener: &TcpListener) -> Result<Vec<WorkerSession>> {
        let window = RegistrationWindow::open(
            self.clock.as_ref(),
            Duration::from_secs(self.cfg.registration_window_secs),
        );
        let welcome = Message::Welcome {
            min_artifact_bytes: self.cfg.min_artifact_bytes,
            max_artifact_bytes: self.cfg.max_artifact_bytes,
        };
        let mut sessions = Vec::new();

        listener
            .set_nonblocking(true)
            .context("switching the listener to nonblocking accepts")?;
        while window.is_open(self.clock.as_ref()) {
            match listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(err) = stream.set_nonblocking(false) {
                        warn!("rejected connection from {peer}: {err}");
                        continue;
                    }
                    let remaining = window
                        .remaining(self.clock.as_ref())
                        .max(Duration::from_millis(10));
                    match sessions::register_worker(stream, peer, remaining, &welcome) {
                        Ok(session) => {
                            info!(
                                "worker registered id={} host={} peer={}",
                                session.worker_id, session.hostname, session.peer
                            );
                            sessions.push(session);
                            if let Some(expected) = self.cfg.await_workers {
                                if sessions.len() >= expected {
                                    info!(
                                        "expected worker count reached, closing registration early"
                                    );
                                    break;
                                }
                            }
                        }
                        Err(err) => warn!("rejected connection from {peer}: {err}"),
                    }
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(err) => return Err(err).context("accepting worker connections"),
            }
        }

        Ok(sessions)
    }
}
