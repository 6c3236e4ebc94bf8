use anyhow::Result;
use tracing::{info, warn};

use scattercarve::{cli, config, coordinator, logging};

fn main() -> Result<()> {
    logging::init_logging();

    let opts = cli::parse_coordinator();
    let loaded = config::load_config(opts.config_path.as_deref())?;
    let mut cfg = loaded.config;
    if let Some(port) = opts.port {
        cfg.listen_port = port;
    }
    if let Some(mib) = opts.chunk_size_mib {
        cfg.chunk_size = mib.saturating_mul(1024 * 1024);
    }
    if let Some(kib) = opts.overlap_kib {
        cfg.overlap_bytes = kib.saturating_mul(1024);
    }
    if let Some(secs) = opts.registration_window_secs {
        cfg.registration_window_secs = secs;
    }
    if let Some(count) = opts.await_workers {
        cfg.await_workers = Some(count);
    }
    let loaded = config::LoadedConfig {
        config: cfg,
        config_hash: loaded.config_hash,
    };

    info!(
        "starting run {} on {} (port {})",
        loaded.config.run_id,
        opts.image.display(),
        loaded.config.listen_port
    );
    let coordinator = coordinator::Coordinator::bind(&loaded, &opts.output)?;
    let summary = coordinator.run(&opts.image)?;

    info!(
        "recovered {} artifacts ({} bytes), {} duplicates skipped",
        summary.outcome.artifacts_recovered,
        summary.outcome.bytes_recovered,
        summary.outcome.artifacts_duplicate
    );
    if !summary.outcome.missing_chunks.is_empty() {
        warn!(
            "{} of {} chunks were never collected",
            summary.outcome.missing_chunks.len(),
            summary.total_chunks
        );
    }
    Ok(())
}
