//! Shared tracing/logging setup for labtrack binaries and tests.

/// Subscriber construction (filters, output format).
pub mod tracing;

/// Initialize process-wide logging.
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init() {
    tracing::init();
}
