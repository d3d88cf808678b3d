//! Structured logging init, driven by [`LoggingConfig`]. One call at process
//! startup; everything downstream just uses `tracing::{info, warn, error}`.

use crate::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Installs the global `tracing` subscriber. `RUST_LOG` overrides
/// `config.level` when set, matching the gateway binary's convention.
pub fn init(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if config.json {
        subscriber.json().try_init()
    } else {
        subscriber.try_init()
    };

    if let Err(err) = result {
        // A subscriber is already installed (e.g. a second call in tests).
        // Not worth failing the run over.
        eprintln!("logging already initialised: {err}");
    }
}
