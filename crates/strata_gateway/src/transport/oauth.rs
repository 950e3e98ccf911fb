//! OAuth HTTP transport: the plain HTTP adapter plus bearer-token
//! lifecycle. Before each call the cached access token is checked and,
//! when expired, refreshed with a `grant_type=refresh_token` exchange
//! against the configured token endpoint. The gateway never drives a
//! provider authorization flow; when refresh is impossible the call
//! fails as an auth error and remediation happens out of band.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::http::HttpRpc;
use super::{Transport, TransportError};
use crate::config::{OauthParams, ServerConfig};
use crate::protocol::{ActionSpec, InitializeResult};

/// Refresh this far ahead of the recorded expiry.
const EXPIRY_LEEWAY: Duration = Duration::from_secs(30);

pub struct OauthTransport {
    rpc: HttpRpc,
    server: String,
    token_client: reqwest::Client,
    state: Mutex<OauthParams>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

impl OauthTransport {
    pub fn new(config: &ServerConfig) -> Result<Self, TransportError> {
        let url = config
            .params
            .url
            .clone()
            .ok_or_else(|| TransportError::Connect("http_oauth transport requires a url".into()))?;
        let oauth = config.params.oauth.clone().ok_or_else(|| {
            TransportError::Connect("http_oauth transport requires oauth params".into())
        })?;
        let headers = HttpRpc::build_headers(config)?;
        let token_client = reqwest::Client::builder()
            .build()
            .map_err(|e| TransportError::Connect(format!("token client build failed: {e}")))?;
        Ok(Self {
            rpc: HttpRpc::new(&config.name, url, headers)?,
            server: config.name.clone(),
            token_client,
            state: Mutex::new(oauth),
        })
    }

    /// Returns a live access token, refreshing first when needed.
    async fn bearer(&self, timeout: Duration) -> Result<String, TransportError> {
        let mut state = self.state.lock().await;
        if state.needs_refresh(EXPIRY_LEEWAY) {
            self.refresh(&mut state, timeout).await?;
        }
        state.access_token.clone().ok_or_else(|| {
            TransportError::Auth(format!("no access token for server '{}'", self.server))
        })
    }

    async fn refresh(
        &self,
        state: &mut OauthParams,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let refresh_token = state.refresh_token.clone().ok_or_else(|| {
            TransportError::Auth(format!(
                "access token for server '{}' expired and no refresh token is available",
                self.server
            ))
        })?;

        debug!(server = %self.server, "refreshing access token");
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
            ("client_id", state.client_id.as_str()),
        ];
        let outcome = tokio::time::timeout(timeout, async {
            let response = self
                .token_client
                .post(&state.token_url)
                .form(&form)
                .send()
                .await
                .map_err(|e| TransportError::Connect(format!("token request failed: {e}")))?;
            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| TransportError::Protocol(format!("token body read failed: {e}")))?;
            Ok::<_, TransportError>((status, body))
        })
        .await;

        let (status, body) = match outcome {
            Err(_) => return Err(TransportError::Timeout(timeout.as_millis() as u64)),
            Ok(result) => result?,
        };
        if !status.is_success() {
            warn!(server = %self.server, %status, "token refresh rejected");
            return Err(TransportError::Auth(format!(
                "token refresh for server '{}' rejected with {status}",
                self.server
            )));
        }

        let token: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| TransportError::Protocol(format!("bad token response: {e}")))?;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs();
        state.access_token = Some(token.access_token);
        state.expires_at = token.expires_in.map(|secs| now + secs);
        if let Some(rotated) = token.refresh_token {
            state.refresh_token = Some(rotated);
        }
        Ok(())
    }

    /// Downstream said our token is bad; drop it so the next call
    /// goes through a fresh refresh.
    async fn invalidate(&self) {
        let mut state = self.state.lock().await;
        state.access_token = None;
        state.expires_at = None;
    }

    async fn checked<T>(
        &self,
        result: Result<T, TransportError>,
    ) -> Result<T, TransportError> {
        if let Err(e) = &result {
            if e.is_auth() {
                self.invalidate().await;
            }
        }
        result
    }
}

/// Budget left for the RPC after token work took `elapsed`, so a refresh
/// and the call together never exceed the caller's timeout.
fn remaining(timeout: Duration, elapsed: Duration) -> Duration {
    timeout.saturating_sub(elapsed)
}

#[async_trait]
impl Transport for OauthTransport {
    async fn initialize(&self, timeout: Duration) -> Result<InitializeResult, TransportError> {
        let started = Instant::now();
        let token = self.bearer(timeout).await?;
        let budget = remaining(timeout, started.elapsed());
        let result = self.rpc.initialize(budget, Some(&token)).await;
        self.checked(result).await
    }

    async fn list_actions(&self, timeout: Duration) -> Result<Vec<ActionSpec>, TransportError> {
        let started = Instant::now();
        let token = self.bearer(timeout).await?;
        let budget = remaining(timeout, started.elapsed());
        let result = self.rpc.list_actions(budget, Some(&token)).await;
        self.checked(result).await
    }

    async fn invoke(
        &self,
        action: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<Value, TransportError> {
        let started = Instant::now();
        let token = self.bearer(timeout).await?;
        let budget = remaining(timeout, started.elapsed());
        let result = self.rpc.invoke(action, arguments, budget, Some(&token)).await;
        self.checked(result).await
    }

    async fn close(&self) {}
}
