//! Tracing bootstrap for binaries and tests.

use tracing_subscriber::EnvFilter;

/// Initialise a formatted tracing subscriber honoring `RUST_LOG`.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
