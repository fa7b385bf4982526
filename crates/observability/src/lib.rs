//! Process-wide tracing setup shared by the catalog binaries.

/// Tracing subscriber configuration.
pub mod tracing;

/// Initialize structured logging for the process.
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init() {
    tracing::init();
}
