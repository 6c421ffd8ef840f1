//! Tracing subscriber setup

/// Install the global fmt subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_level` applies to this crate.
/// Repeated calls are harmless.
pub fn init_tracing(default_level: &str) {
    let fallback = format!("hls_archiver={},reqwest=warn", default_level);
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(fallback));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
