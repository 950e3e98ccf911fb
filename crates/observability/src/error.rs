//! Error types for the observability crate.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ObservabilityError {
    /// The global subscriber could not be installed.
    #[error("Failed to initialize observability: {0}")]
    InitFailed(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}
