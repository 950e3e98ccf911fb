//! Reusable tracing setup for strata binaries.
//!
//! # Quick start
//!
//! ```no_run
//! use strata_observability::ObservabilityConfig;
//!
//! let config = ObservabilityConfig::new("strata").with_log_level("info");
//! strata_observability::init(config).expect("tracing init");
//!
//! // Or pull everything from the environment:
//! // strata_observability::init_from_env().expect("tracing init");
//!
//! tracing::info!("gateway starting");
//! ```
//!
//! # Environment variables
//!
//! - `STRATA_LOG` or `RUST_LOG` - log level filter
//! - `STRATA_SERVICE_NAME` - service name recorded on startup

pub mod config;
pub mod error;
pub mod telemetry;

pub use config::ObservabilityConfig;
pub use error::ObservabilityError;
pub use telemetry::{init, init_from_env};
