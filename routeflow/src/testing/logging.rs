//! Log capture for tests.

use tracing_subscriber::EnvFilter;

/// Installs a test-friendly tracing subscriber.
///
/// Honors `RUST_LOG` and defaults to `routeflow=debug`. Safe to call from
/// every test; only the first call installs the subscriber.
pub fn init_test_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("routeflow=debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
