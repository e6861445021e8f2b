//! Logging setup for the Strand daemon.

use tracing_subscriber::EnvFilter;

/// Install the `tracing` subscriber.
///
/// `RUST_LOG` wins when set; otherwise `level` from the config is used.
pub fn init(level: &str) {
    tracing_subscriber::fmt().with_env_filter(filter(level)).init();
}

fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}
