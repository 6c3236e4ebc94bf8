use anyhow::Result;
use tracing::info;

use scattercarve::{cli, logging, worker};

fn main() -> Result<()> {
    logging::init_logging();

    let opts = cli::parse_worker();
    let stats = worker::run(&opts.coordinator, opts.port)?;
    info!(
        "done: {} chunks, {} artifacts, {} bytes scanned",
        stats.chunks_processed, stats.artifacts_sent, stats.bytes_scanned
    );
    Ok(())
}
