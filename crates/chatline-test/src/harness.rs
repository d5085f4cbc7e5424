//! Test harness helpers.

use tracing_subscriber::EnvFilter;

/// Number of scheduler yields performed by [`settle`].
pub const SETTLE_YIELDS: usize = 32;

/// Set up test logging with the given filter.
///
/// Safe to call from every test; only the first call installs a
/// subscriber.
pub fn setup_test_logging(filter: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_test_writer()
        .try_init();
}

/// Set up test logging with default filter (warn level).
pub fn setup_test_logging_default() {
    setup_test_logging("warn");
}

/// Let spawned tasks run until they go idle.
///
/// Yields to the scheduler without advancing time, so it is safe to use
/// with a paused clock: pending timers stay pending.
pub async fn settle() {
    for _ in 0..SETTLE_YIELDS {
        tokio::task::yield_now().await;
    }
}
