use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber. The filter comes from `RUST_LOG`,
/// defaulting to info.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
