//! Configuration for tracing initialization.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Service name recorded on startup (e.g. "strata").
    pub service_name: String,

    /// Log level filter (e.g. "info", "debug", "strata_gateway=trace").
    /// Defaults to "info" when neither this nor the environment sets one.
    pub log_level: Option<String>,

    /// Write formatted events to stderr.
    pub enable_console: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: "strata".to_string(),
            log_level: None,
            enable_console: true,
        }
    }
}

impl ObservabilityConfig {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = Some(level.into());
        self
    }

    pub fn with_console(mut self, enable: bool) -> Self {
        self.enable_console = enable;
        self
    }

    /// Builds from environment variables.
    ///
    /// Reads:
    /// - `STRATA_SERVICE_NAME` → service_name
    /// - `STRATA_LOG` or `RUST_LOG` → log_level
    pub fn from_env() -> Self {
        let service_name =
            std::env::var("STRATA_SERVICE_NAME").unwrap_or_else(|_| "strata".to_string());
        let log_level = std::env::var("STRATA_LOG")
            .or_else(|_| std::env::var("RUST_LOG"))
            .ok();
        Self {
            service_name,
            log_level,
            enable_console: true,
        }
    }
}
