//! Tracing and logging setup shared by the stockcart binaries and tests.

/// Initialize process-wide logging from the environment.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    tracing::init(tracing::LogConfig::from_env());
}

/// Like [`init`], but routes output through the test harness so it is captured per test.
pub fn init_for_tests() {
    tracing::init_test();
}

/// Subscriber configuration (filters, formats).
pub mod tracing;
