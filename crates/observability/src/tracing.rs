//! Tracing/logging initialization.
//!
//! `RUST_LOG` controls filtering (default `info`). Output is JSON lines so
//! entries can be shipped as-is; set `LABTRACK_LOG_PLAIN=1` for a
//! human-readable form during local debugging.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber for this process.
///
/// Calling it again is a no-op, so binaries and tests may call it freely.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let plain = std::env::var("LABTRACK_LOG_PLAIN").is_ok_and(|v| v == "1");
    if plain {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .with_target(false)
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_timer(tracing_subscriber::fmt::time::SystemTime)
            .with_target(false)
            .try_init();
    }
}
