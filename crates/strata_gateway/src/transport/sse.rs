//! SSE transport: requests are posted to the server's message endpoint
//! and responses come back as event-stream bodies. Shares the JSON-RPC
//! core with the plain HTTP adapter; the only difference is the endpoint
//! convention.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::http::HttpRpc;
use super::{Transport, TransportError};
use crate::config::ServerConfig;
use crate::protocol::{ActionSpec, InitializeResult};

pub struct SseTransport {
    rpc: HttpRpc,
}

impl SseTransport {
    pub fn new(config: &ServerConfig) -> Result<Self, TransportError> {
        let url = config
            .params
            .url
            .as_deref()
            .ok_or_else(|| TransportError::Connect("sse transport requires a url".into()))?;
        let headers = HttpRpc::build_headers(config)?;
        Ok(Self {
            rpc: HttpRpc::new(&config.name, message_endpoint(url), headers)?,
        })
    }
}

/// SSE servers take posts on a `/message` endpoint next to the stream
/// endpoint; configs that already point there are left alone.
fn message_endpoint(url: &str) -> String {
    if url.trim_end_matches('/').ends_with("/message") {
        url.to_string()
    } else {
        format!("{}/message", url.trim_end_matches('/'))
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn initialize(&self, timeout: Duration) -> Result<InitializeResult, TransportError> {
        self.rpc.initialize(timeout, None).await
    }

    async fn list_actions(&self, timeout: Duration) -> Result<Vec<ActionSpec>, TransportError> {
        self.rpc.list_actions(timeout, None).await
    }

    async fn invoke(
        &self,
        action: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<Value, TransportError> {
        self.rpc.invoke(action, arguments, timeout, None).await
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_endpoint_convention() {
        assert_eq!(
            message_endpoint("http://localhost:8080"),
            "http://localhost:8080/message"
        );
        assert_eq!(
            message_endpoint("http://localhost:8080/sse/"),
            "http://localhost:8080/sse/message"
        );
        assert_eq!(
            message_endpoint("http://localhost:8080/message"),
            "http://localhost:8080/message"
        );
    }
}
