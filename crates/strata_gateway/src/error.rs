//! Gateway error types.
//!
//! Every error that can reach a caller of the gateway is one of these
//! variants; transport-level errors are classified into them at the router
//! boundary and never escape raw.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    /// Unknown server, action, or other missing entity.
    #[error("not found: {0}")]
    NotFound(String),

    /// Caller-supplied arguments failed validation against the action's
    /// parameter schema. `field` names the offending argument.
    #[error("invalid argument '{field}': {message}")]
    InvalidArgument { field: String, message: String },

    /// The server exists but has no live connection.
    #[error("server '{0}' is unavailable")]
    Unavailable(String),

    /// A downstream call exceeded its time budget.
    #[error("timed out after {0} ms")]
    Timeout(u64),

    /// Downstream rejected our credentials.
    #[error("authentication failed for server '{server}': {message}")]
    AuthFailure { server: String, message: String },

    /// The downstream server returned an error of its own.
    #[error("downstream error from '{server}': {message}")]
    Downstream { server: String, message: String },

    /// Administrative / configuration error (duplicate name, bad params).
    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GatewayError {
    /// Stable machine-readable kind, used in the execution outcome envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::NotFound(_) => "not_found",
            GatewayError::InvalidArgument { .. } => "invalid_argument",
            GatewayError::Unavailable(_) => "unavailable",
            GatewayError::Timeout(_) => "timeout",
            GatewayError::AuthFailure { .. } => "auth_failure",
            GatewayError::Downstream { .. } => "downstream_error",
            GatewayError::Config(_) => "config",
            GatewayError::Io(_) => "io",
            GatewayError::Json(_) => "json",
        }
    }

    /// The offending field for `InvalidArgument`, if any.
    pub fn field(&self) -> Option<&str> {
        match self {
            GatewayError::InvalidArgument { field, .. } => Some(field),
            _ => None,
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_is_stable_per_variant() {
        let err = GatewayError::InvalidArgument {
            field: "path".to_string(),
            message: "missing required field".to_string(),
        };
        assert_eq!(err.kind(), "invalid_argument");
        assert_eq!(err.field(), Some("path"));

        assert_eq!(GatewayError::NotFound("x".into()).kind(), "not_found");
        assert_eq!(GatewayError::Timeout(30_000).kind(), "timeout");
        assert!(GatewayError::Timeout(30_000).field().is_none());
    }

    #[test]
    fn display_includes_context() {
        let err = GatewayError::AuthFailure {
            server: "linear".to_string(),
            message: "token expired".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("linear"));
        assert!(text.contains("token expired"));
    }
}
