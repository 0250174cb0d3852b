use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber for a BiReUS binary.
///
/// `RUST_LOG` controls verbosity; defaults to `info` when unset. Safe to call
/// once per process; a second call is a no-op rather than a panic, so tests
/// that spin up multiple binaries in-process don't need to guard it.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
