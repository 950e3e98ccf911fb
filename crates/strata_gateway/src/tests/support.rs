//! Mock transports and factories for scenario tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::ServerConfig;
use crate::connection::ConnectionState;
use crate::gateway::Strata;
use crate::protocol::{ActionSpec, Implementation, InitializeResult, ServerCapabilities};
use crate::transport::{Transport, TransportError, TransportFactory};

pub fn action_spec(name: &str, description: &str, schema: Value) -> ActionSpec {
    ActionSpec {
        name: name.to_string(),
        description: Some(description.to_string()),
        input_schema: schema,
        doc_url: None,
    }
}

pub fn list_dir_spec() -> ActionSpec {
    action_spec(
        "list_dir",
        "List the entries of a directory",
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Directory to list"}
            },
            "required": ["path"]
        }),
    )
}

/// Scripted transport: fixed action listing, canned invoke responses,
/// optional auth failures and slow calls.
#[derive(Default)]
pub struct MockTransport {
    actions: Vec<ActionSpec>,
    responses: Mutex<HashMap<String, Value>>,
    invoke_auth_error: Option<String>,
    invoke_delay: Option<Duration>,
    pub closes: AtomicUsize,
}

impl MockTransport {
    pub fn new(actions: Vec<ActionSpec>) -> Self {
        Self {
            actions,
            ..Default::default()
        }
    }

    pub fn with_response(self, action: &str, response: Value) -> Self {
        if let Ok(mut responses) = self.responses.lock() {
            responses.insert(action.to_string(), response);
        }
        self
    }

    /// Every invoke fails as an auth rejection with this message.
    pub fn with_invoke_auth_error(mut self, message: &str) -> Self {
        self.invoke_auth_error = Some(message.to_string());
        self
    }

    /// Every invoke takes this long; calls with a smaller budget time out.
    pub fn with_invoke_delay(mut self, delay: Duration) -> Self {
        self.invoke_delay = Some(delay);
        self
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn initialize(&self, _timeout: Duration) -> Result<InitializeResult, TransportError> {
        Ok(InitializeResult {
            protocol_version: "2024-11-05".to_string(),
            capabilities: ServerCapabilities::default(),
            server_info: Implementation::new("mock-server", "0.0.0"),
        })
    }

    async fn list_actions(&self, _timeout: Duration) -> Result<Vec<ActionSpec>, TransportError> {
        Ok(self.actions.clone())
    }

    async fn invoke(
        &self,
        action: &str,
        _arguments: Value,
        timeout: Duration,
    ) -> Result<Value, TransportError> {
        if let Some(message) = &self.invoke_auth_error {
            return Err(TransportError::Auth(message.clone()));
        }
        if let Some(delay) = self.invoke_delay {
            if delay > timeout {
                return Err(TransportError::Timeout(timeout.as_millis() as u64));
            }
            tokio::time::sleep(delay).await;
        }
        self.responses
            .lock()
            .ok()
            .and_then(|r| r.get(action).cloned())
            .ok_or_else(|| TransportError::Downstream(format!("no canned response for '{action}'")))
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::Relaxed);
    }
}

struct Script {
    transport: Arc<MockTransport>,
    fail_opens_remaining: usize,
}

/// Factory handing out registered mock transports, optionally refusing
/// the first N opens per server to exercise the retry path.
#[derive(Default)]
pub struct MockFactory {
    scripts: Mutex<HashMap<String, Script>>,
    open_counts: Mutex<HashMap<String, usize>>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, server: &str, transport: MockTransport) {
        self.register_flaky(server, transport, 0);
    }

    /// Registers a transport whose first `fail_opens` opens are refused.
    pub fn register_flaky(&self, server: &str, transport: MockTransport, fail_opens: usize) {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.insert(
                server.to_string(),
                Script {
                    transport: Arc::new(transport),
                    fail_opens_remaining: fail_opens,
                },
            );
        }
    }

    pub fn opens(&self, server: &str) -> usize {
        self.open_counts
            .lock()
            .ok()
            .and_then(|c| c.get(server).copied())
            .unwrap_or(0)
    }
}

#[async_trait]
impl TransportFactory for MockFactory {
    async fn open(&self, config: &ServerConfig) -> Result<Arc<dyn Transport>, TransportError> {
        if let Ok(mut counts) = self.open_counts.lock() {
            *counts.entry(config.name.clone()).or_insert(0) += 1;
        }
        let mut scripts = self
            .scripts
            .lock()
            .map_err(|_| TransportError::Connect("mock factory poisoned".into()))?;
        let script = scripts
            .get_mut(&config.name)
            .ok_or_else(|| TransportError::Connect(format!("no mock for '{}'", config.name)))?;
        if script.fail_opens_remaining > 0 {
            script.fail_opens_remaining -= 1;
            return Err(TransportError::Connect("mock refused the connection".into()));
        }
        Ok(Arc::clone(&script.transport) as Arc<dyn Transport>)
    }
}

/// Polls `list_servers` until the named server reaches `state`.
pub async fn wait_for_state(strata: &Strata, server: &str, state: ConnectionState) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let current = strata
            .list_servers()
            .await
            .into_iter()
            .find(|s| s.name == server)
            .map(|s| s.state);
        if current == Some(state) {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("server '{server}' never reached {state}, last seen {current:?}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// A gateway wired to the given mock factory with a fast retry schedule.
pub fn build_gateway(dir: &tempfile::TempDir, factory: Arc<MockFactory>) -> Strata {
    Strata::builder(dir.path().join("servers.toml"))
        .factory(factory)
        .backoff(Duration::from_millis(2), 2)
        .build()
        .expect("gateway builds against an empty config")
}
