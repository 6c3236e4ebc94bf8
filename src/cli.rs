use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "scattercarve", version, about = "Distribute a raw image to carving workers and merge what they recover")]
pub struct CoordinatorOptions {
    /// Raw image to carve
    pub image: PathBuf,

    /// Listen port for worker registration (overrides config when set)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Output directory for recovered files and reports
    #[arg(short, long, default_value = "./recovered")]
    pub output: PathBuf,

    /// Optional path to config file (YAML)
    #[arg(long)]
    pub config_path: Option<PathBuf>,

    /// Chunk size, in MiB (overrides config when set)
    #[arg(long)]
    pub chunk_size_mib: Option<u64>,

    /// Chunk overlap, in KiB (overrides config when set)
    #[arg(long)]
    pub overlap_kib: Option<u64>,

    /// Seconds to wait for workers to register
    #[arg(long)]
    pub registration_window_secs: Option<u64>,

    /// Close the registration window once this many workers joined
    #[arg(long)]
    pub await_workers: Option<usize>,
}

#[derive(Parser, Debug)]
#[command(name = "scattercarve-worker", version, about = "Carve chunks assigned by a scattercarve coordinator")]
pub struct WorkerOptions {
    /// Coordinator host name or address
    pub coordinator: String,

    /// Coordinator port
    #[arg(default_value_t = 5000)]
    pub port: u16,
}

pub fn parse_coordinator() -> CoordinatorOptions {
    CoordinatorOptions::parse()
}

pub fn parse_worker() -> WorkerOptions {
    WorkerOptions::parse()
}
