//! Transport adapters: one per transport kind, all behind the
//! object-safe [`Transport`] trait so the connection manager and tests
//! never care which wire they are on.

mod http;
mod oauth;
mod sse;
mod stdio;

pub use http::HttpTransport;
pub use oauth::OauthTransport;
pub use sse::SseTransport;
pub use stdio::StdioTransport;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::config::{ServerConfig, TransportKind};
use crate::protocol::{ActionSpec, InitializeResult, JsonRpcErrorObject};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    /// The downstream server answered with a JSON-RPC error.
    #[error("downstream error: {0}")]
    Downstream(String),

    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("transport closed: {0}")]
    Closed(String),

    #[error("timed out after {0} ms")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TransportError {
    pub fn is_auth(&self) -> bool {
        matches!(self, TransportError::Auth(_))
    }

    /// Maps a downstream JSON-RPC error object onto our classification.
    /// Servers signal auth problems inconsistently, so this matches on
    /// message text as well as codes.
    pub fn from_rpc(error: JsonRpcErrorObject) -> Self {
        let lowered = error.message.to_lowercase();
        let auth_hint = lowered.contains("unauthorized")
            || lowered.contains("unauthenticated")
            || lowered.contains("forbidden")
            || lowered.contains("invalid_token")
            || lowered.contains("token expired");
        if auth_hint || error.code == -32001 {
            TransportError::Auth(error.message)
        } else {
            TransportError::Downstream(format!("{} (code {})", error.message, error.code))
        }
    }
}

/// A live session with one downstream server.
///
/// Implementations must be cancel-safe: a dropped call future leaves no
/// stuck state behind (pending stdio replies are discarded, HTTP futures
/// are dropped by the client).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Runs the handshake: `initialize` followed by the
    /// `notifications/initialized` notification.
    async fn initialize(&self, timeout: Duration) -> Result<InitializeResult, TransportError>;

    /// Fetches the server's action listing (`tools/list`).
    async fn list_actions(&self, timeout: Duration) -> Result<Vec<ActionSpec>, TransportError>;

    /// Invokes one action (`tools/call`) and returns its raw result value.
    async fn invoke(
        &self,
        action: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<Value, TransportError>;

    /// Tears the session down. Idempotent.
    async fn close(&self);
}

/// Seam between configuration and live transports. The connection manager
/// only ever opens sessions through this, so tests substitute mocks here.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn open(&self, config: &ServerConfig) -> Result<Arc<dyn Transport>, TransportError>;
}

/// Production factory: picks the adapter matching the configured kind.
#[derive(Debug, Default)]
pub struct DefaultTransportFactory;

#[async_trait]
impl TransportFactory for DefaultTransportFactory {
    async fn open(&self, config: &ServerConfig) -> Result<Arc<dyn Transport>, TransportError> {
        match config.transport {
            TransportKind::Stdio => Ok(Arc::new(StdioTransport::spawn(config)?)),
            TransportKind::Http => Ok(Arc::new(HttpTransport::new(config)?)),
            TransportKind::Sse => Ok(Arc::new(SseTransport::new(config)?)),
            TransportKind::HttpOauth => Ok(Arc::new(OauthTransport::new(config)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_error_classification() {
        let auth = TransportError::from_rpc(JsonRpcErrorObject::new(-32000, "Unauthorized"));
        assert!(auth.is_auth());

        let auth_code = TransportError::from_rpc(JsonRpcErrorObject::new(-32001, "nope"));
        assert!(auth_code.is_auth());

        let plain = TransportError::from_rpc(JsonRpcErrorObject::new(-32601, "no such method"));
        assert!(!plain.is_auth());
        assert!(plain.to_string().contains("-32601"));
    }
}
