//! Plain HTTP transport: JSON-RPC over POST.
//!
//! [`HttpRpc`] is the shared core. It posts one JSON-RPC message per
//! request and accepts either a JSON body or a `text/event-stream` body
//! carrying the response as SSE data lines, since streamable-HTTP servers
//! answer in both shapes. The SSE and OAuth adapters wrap this core.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use reqwest::StatusCode;
use serde_json::Value;
use tracing::debug;

use super::{Transport, TransportError};
use crate::config::ServerConfig;
use crate::protocol::{
    ActionSpec, CallActionParams, InitializeParams, InitializeResult, JsonRpcRequest,
    JsonRpcResponse, ListActionsResult,
};

pub(super) struct HttpRpc {
    client: reqwest::Client,
    endpoint: String,
    server: String,
    next_id: AtomicU64,
}

impl HttpRpc {
    pub(super) fn new(
        server: &str,
        endpoint: String,
        headers: HeaderMap,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| TransportError::Connect(format!("http client build failed: {e}")))?;
        Ok(Self {
            client,
            endpoint,
            server: server.to_string(),
            next_id: AtomicU64::new(1),
        })
    }

    /// Static headers from the config: custom headers, optional auth
    /// header, and the accept line both response shapes need.
    pub(super) fn build_headers(config: &ServerConfig) -> Result<HeaderMap, TransportError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/event-stream"),
        );
        for (key, value) in &config.params.headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| TransportError::Connect(format!("bad header name '{key}': {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::Connect(format!("bad header value for '{key}': {e}")))?;
            headers.insert(name, value);
        }
        if let Some(auth) = &config.params.auth {
            let value = auth
                .header_value()
                .map_err(|e| TransportError::Connect(e.to_string()))?;
            let name = HeaderName::from_bytes(auth.header_name().as_bytes())
                .map_err(|e| TransportError::Connect(format!("bad auth header: {e}")))?;
            headers.insert(
                name,
                HeaderValue::from_str(&value)
                    .map_err(|e| TransportError::Connect(format!("bad auth value: {e}")))?,
            );
        }
        Ok(headers)
    }

    async fn post(
        &self,
        message: &JsonRpcRequest,
        timeout: Duration,
        bearer: Option<&str>,
    ) -> Result<Option<JsonRpcResponse>, TransportError> {
        let mut builder = self.client.post(&self.endpoint).json(message);
        if let Some(token) = bearer {
            builder = builder.bearer_auth(token);
        }

        let outcome = tokio::time::timeout(timeout, async {
            let response = builder
                .send()
                .await
                .map_err(|e| TransportError::Connect(format!("request failed: {e}")))?;
            let status = response.status();
            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            let body = response
                .text()
                .await
                .map_err(|e| TransportError::Protocol(format!("body read failed: {e}")))?;
            Ok::<_, TransportError>((status, content_type, body))
        })
        .await;

        let (status, content_type, body) = match outcome {
            Err(_) => return Err(TransportError::Timeout(timeout.as_millis() as u64)),
            Ok(result) => result?,
        };

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(TransportError::Auth(format!(
                "server '{}' answered {status}: {}",
                self.server,
                truncate(&body, 200)
            )));
        }
        if !status.is_success() {
            return Err(TransportError::Downstream(format!(
                "server '{}' answered {status}: {}",
                self.server,
                truncate(&body, 200)
            )));
        }

        // Notifications get 202/empty bodies; there is nothing to parse.
        if message.id.is_none() || body.trim().is_empty() {
            return Ok(None);
        }

        let response = if content_type.contains("text/event-stream") {
            extract_sse_response(&body, message.id)?
        } else {
            serde_json::from_str(&body)
                .map_err(|e| TransportError::Protocol(format!("bad response body: {e}")))?
        };
        Ok(Some(response))
    }

    pub(super) async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
        bearer: Option<&str>,
    ) -> Result<Value, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let message = JsonRpcRequest::new(id, method, params);
        match self.post(&message, timeout, bearer).await? {
            Some(response) => response.into_result().map_err(TransportError::from_rpc),
            None => Err(TransportError::Protocol(format!(
                "server '{}' sent no response to '{method}'",
                self.server
            ))),
        }
    }

    pub(super) async fn notify(
        &self,
        method: &str,
        timeout: Duration,
        bearer: Option<&str>,
    ) -> Result<(), TransportError> {
        let message = JsonRpcRequest::notification(method, None);
        self.post(&message, timeout, bearer).await?;
        Ok(())
    }

    pub(super) async fn initialize(
        &self,
        timeout: Duration,
        bearer: Option<&str>,
    ) -> Result<InitializeResult, TransportError> {
        let params = serde_json::to_value(InitializeParams::default())?;
        let raw = self
            .request("initialize", Some(params), timeout, bearer)
            .await?;
        let result: InitializeResult = serde_json::from_value(raw)
            .map_err(|e| TransportError::Protocol(format!("bad initialize result: {e}")))?;
        self.notify("notifications/initialized", timeout, bearer)
            .await?;
        debug!(
            server = %self.server,
            downstream = %result.server_info.name,
            "handshake complete"
        );
        Ok(result)
    }

    pub(super) async fn list_actions(
        &self,
        timeout: Duration,
        bearer: Option<&str>,
    ) -> Result<Vec<ActionSpec>, TransportError> {
        let mut actions = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = cursor
                .take()
                .map(|c| serde_json::json!({ "cursor": c }))
                .unwrap_or_else(|| serde_json::json!({}));
            let raw = self
                .request("tools/list", Some(params), timeout, bearer)
                .await?;
            let page: ListActionsResult = serde_json::from_value(raw)
                .map_err(|e| TransportError::Protocol(format!("bad tools/list result: {e}")))?;
            actions.extend(page.tools);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(actions)
    }

    pub(super) async fn invoke(
        &self,
        action: &str,
        arguments: Value,
        timeout: Duration,
        bearer: Option<&str>,
    ) -> Result<Value, TransportError> {
        let params = serde_json::to_value(CallActionParams {
            name: action.to_string(),
            arguments: Some(arguments),
        })?;
        self.request("tools/call", Some(params), timeout, bearer)
            .await
    }
}

/// Pulls the JSON-RPC response matching `id` out of an SSE body.
fn extract_sse_response(
    body: &str,
    id: Option<u64>,
) -> Result<JsonRpcResponse, TransportError> {
    let mut fallback = None;
    for line in body.lines() {
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        let data = data.trim();
        if data.is_empty() || data == "[DONE]" {
            continue;
        }
        if let Ok(response) = serde_json::from_str::<JsonRpcResponse>(data) {
            if response.numeric_id() == id {
                return Ok(response);
            }
            if fallback.is_none() && (response.result.is_some() || response.error.is_some()) {
                fallback = Some(response);
            }
        }
    }
    fallback.ok_or_else(|| {
        TransportError::Protocol("event stream carried no matching response".to_string())
    })
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

pub struct HttpTransport {
    rpc: HttpRpc,
}

impl HttpTransport {
    pub fn new(config: &ServerConfig) -> Result<Self, TransportError> {
        let url = config
            .params
            .url
            .clone()
            .ok_or_else(|| TransportError::Connect("http transport requires a url".into()))?;
        let headers = HttpRpc::build_headers(config)?;
        Ok(Self {
            rpc: HttpRpc::new(&config.name, url, headers)?,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
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
    fn sse_body_extraction_matches_id() {
        let body = concat!(
            ": keepalive\n",
            "event: message\n",
            "data: {\"jsonrpc\":\"2.0\",\"id\":3,\"result\":{\"tools\":[]}}\n",
            "\n",
        );
        let response = extract_sse_response(body, Some(3)).unwrap();
        assert_eq!(response.numeric_id(), Some(3));
        assert!(response.result.is_some());
    }

    #[test]
    fn sse_body_falls_back_to_any_response() {
        let body = "data: {\"jsonrpc\":\"2.0\",\"id\":9,\"result\":{}}\n\n";
        let response = extract_sse_response(body, Some(1)).unwrap();
        assert_eq!(response.numeric_id(), Some(9));
    }

    #[test]
    fn sse_body_without_response_is_protocol_error() {
        assert!(extract_sse_response(": nothing here\n", Some(1)).is_err());
    }

    #[test]
    fn header_building_rejects_bad_names() {
        let mut config = ServerConfig::http("search", "http://localhost:9000/rpc");
        config
            .params
            .headers
            .insert("bad header".to_string(), "x".to_string());
        assert!(HttpRpc::build_headers(&config).is_err());

        let good = ServerConfig::http("search", "http://localhost:9000/rpc").with_auth(
            crate::config::AuthConfig::api_key("k-1", "X-Search-Key"),
        );
        let headers = HttpRpc::build_headers(&good).unwrap();
        assert_eq!(headers.get("X-Search-Key").unwrap(), "k-1");
    }
}
