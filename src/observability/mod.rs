//! Tracing setup
//!
//! The library only emits `tracing` events; binaries and tests decide where
//! they go by calling [`init_tracing`] once.

mod config;

pub use config::LoggingConfig;

use tracing_subscriber::EnvFilter;

/// Installs the global fmt subscriber. Returns `false` if a subscriber was
/// already installed (e.g. by an earlier test), which is not an error.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_new(&config.filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.json {
        builder
            .json()
            .with_current_span(config.with_spans)
            .with_span_list(false)
            .try_init()
            .is_ok()
    } else {
        builder.try_init().is_ok()
    }
}
