//! Development-time tracing for the forge binary.
//!
//! Tracing goes to stderr and is never persisted. Session records and debug
//! screenshots under the games directory are the product artifacts and are
//! written regardless of `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Falls back to `info` when `verbose` is set and `warn` otherwise.
///
/// # Example
/// ```bash
/// RUST_LOG=forge=debug forge new "a snake game"
/// ```
pub fn init(verbose: bool) {
    let fallback = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
