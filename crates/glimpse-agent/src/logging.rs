//! Tracing setup for hosts that do not bring their own subscriber.

use tracing_subscriber::EnvFilter;

/// Install a global subscriber honoring `level` (overridable via
/// `RUST_LOG`). Safe to call when a subscriber is already installed; the
/// existing one wins.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
