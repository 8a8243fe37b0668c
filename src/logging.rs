/// Installs the fmt subscriber with env-filter control (`RUST_LOG`),
/// defaulting to `info`. `try_init` so tests and embedders that already
/// installed a subscriber are left alone.
pub fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
