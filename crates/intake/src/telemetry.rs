//! Global tracing subscriber setup.

use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

use crate::config::LoggingConfig;
use crate::error::{IntakeError, Result};

/// Installs the global subscriber and bridges `log` records into it.
///
/// `RUST_LOG` takes precedence over the configured level. Fails if a global
/// subscriber or logger is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| IntakeError::Logging(format!("invalid log level '{}': {}", config.level, e)))?;

    tracing_log::LogTracer::init().map_err(|e| IntakeError::Logging(e.to_string()))?;

    let registry = Registry::default().with(filter);
    let installed = if config.json {
        let layer = fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true);
        tracing::subscriber::set_global_default(registry.with(layer))
    } else {
        let layer = fmt::layer().with_target(true);
        tracing::subscriber::set_global_default(registry.with(layer))
    };
    installed.map_err(|e| IntakeError::Logging(e.to_string()))
}

