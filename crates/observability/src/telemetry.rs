//! Subscriber assembly: EnvFilter plus an optional fmt layer on stderr.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::config::ObservabilityConfig;
use crate::error::ObservabilityError;

/// Installs the global tracing subscriber for the given configuration.
/// Fails if a subscriber is already installed.
pub fn init(config: ObservabilityConfig) -> Result<(), ObservabilityError> {
    let env_filter = config
        .log_level
        .as_ref()
        .map(|level| EnvFilter::new(level.as_str()))
        .unwrap_or_else(|| {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
        });

    let fmt_layer = config.enable_console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
    });

    Registry::default()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| ObservabilityError::InitFailed(e.to_string()))?;

    tracing::debug!(service.name = %config.service_name, "tracing initialized");
    Ok(())
}

/// Initializes with configuration pulled from the environment.
pub fn init_from_env() -> Result<(), ObservabilityError> {
    init(ObservabilityConfig::from_env())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_fails_cleanly() {
        let first = init(ObservabilityConfig::new("test").with_console(false));
        let second = init(ObservabilityConfig::new("test").with_console(false));
        // Another test in the process may have installed a subscriber
        // already; either way the second call here must error, not panic.
        if first.is_ok() {
            assert!(matches!(second, Err(ObservabilityError::InitFailed(_))));
        } else {
            assert!(second.is_err());
        }
    }
}
