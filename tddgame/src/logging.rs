//! Diagnostic tracing for the tracker.
//!
//! Tracing goes to stderr and is controlled by `RUST_LOG`. Scores, feedback
//! and history are product data kept in the store, never in the log.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter for one-shot commands.
pub const COMMAND_FILTER: &str = "warn";
/// Default filter for the long-running poller, which reports each cycle.
pub const DAEMON_FILTER: &str = "warn,tddgame=info";

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`; falls back to `default_filter` if unset or invalid.
///
/// # Example
/// ```bash
/// RUST_LOG=tddgame=debug tddgame poll --once
/// ```
pub fn init(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
