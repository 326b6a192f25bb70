//! A2 — process-wide `tracing` initialization.

use tracing_subscriber::EnvFilter;

/// Install a `tracing_subscriber::fmt` subscriber, env-filter driven and
/// defaulting to `info` when `RUST_LOG` is unset. Safe to call once at
/// process start; a second call is a no-op (the error is swallowed).
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
