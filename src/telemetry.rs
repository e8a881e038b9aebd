//! Tracing initialization helpers for binaries and tests embedding the core.

use tracing_subscriber::{fmt, EnvFilter};

/// Initialize a tracing subscriber honoring `RUST_LOG`, defaulting to `info`.
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// Same, but emitting JSON lines for log shippers.
pub fn init_tracing_json() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).json().try_init();
}
