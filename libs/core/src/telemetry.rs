//! Tracing subscriber initialization.
//!
//! The library crates only emit `tracing` events; the hosting process (or a
//! test binary) decides where they go by installing one of these
//! subscribers at startup.

use tracing_subscriber::fmt;
use tracing_subscriber::EnvFilter;

/// Initialize the stderr subscriber for a hosting process.
///
/// Honors `RUST_LOG` for filtering (default DEBUG) and annotates events
/// with their target, file, and line. Call once at startup, never from the
/// library crates.
///
/// # Panics
/// Panics if a global subscriber has already been set.
///
/// # Example
/// ```
/// foreman_core::telemetry::init_dev_subscriber();
/// tracing::info!("host started");
/// ```
pub fn init_dev_subscriber() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");
}

/// Initialize a subscriber suitable for tests.
///
/// Uses the test writer so output is captured per-test, honors `RUST_LOG`
/// (default INFO), and silently does nothing if a subscriber is already
/// installed - repeated calls from multiple tests are harmless.
pub fn init_test_subscriber() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_test_writer()
        .with_target(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}
