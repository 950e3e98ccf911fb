//! The gateway orchestrator.
//!
//! `Strata` owns the config store, the connection manager, the catalog,
//! and the routers, and exposes the two call surfaces: administrative
//! operations (persist synchronously, converge connections in the
//! background) and the agent-facing meta-tools.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{Mutex, RwLock};
use tracing::info;

use crate::auth::{remediation_for, RemediationPayload};
use crate::catalog::{ActionDescriptor, DocMatch, ToolCatalog};
use crate::config::{ConfigStore, ServerConfig, TransportKind};
use crate::connection::{ConnectionManager, ConnectionState, ConnectionStatus};
use crate::discovery::DiscoveryGateway;
use crate::error::{GatewayError, GatewayResult};
use crate::router::{error_envelope, success_envelope, ExecutionRouter};
use crate::transport::{DefaultTransportFactory, TransportFactory};

/// One row of `list_servers`: durable config joined with live state.
#[derive(Debug, Clone, Serialize)]
pub struct ServerOverview {
    pub name: String,
    pub transport: TransportKind,
    pub enabled: bool,
    pub state: ConnectionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub actions: usize,
}

/// Outcome of the one-shot `server test` probe.
#[derive(Debug, Clone, Serialize)]
pub struct ServerTestResult {
    pub server: String,
    pub ok: bool,
    pub actions: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub struct StrataBuilder {
    config_path: PathBuf,
    factory: Option<Arc<dyn TransportFactory>>,
    backoff: Option<(Duration, u32)>,
}

impl StrataBuilder {
    /// Substitute the transport factory; tests inject mocks here.
    pub fn factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn backoff(mut self, base: Duration, max_retries: u32) -> Self {
        self.backoff = Some((base, max_retries));
        self
    }

    pub fn build(self) -> GatewayResult<Strata> {
        let store = ConfigStore::new(self.config_path);
        let configs = store
            .load()
            .map_err(|e| GatewayError::Config(e.to_string()))?;

        let catalog = Arc::new(ToolCatalog::new());
        let configs = Arc::new(RwLock::new(configs));
        let factory = self
            .factory
            .unwrap_or_else(|| Arc::new(DefaultTransportFactory));
        let mut manager = ConnectionManager::new(factory, Arc::clone(&catalog));
        if let Some((base, max_retries)) = self.backoff {
            manager = manager.with_backoff(base, max_retries);
        }
        let manager = Arc::new(manager);

        Ok(Strata {
            router: ExecutionRouter::new(Arc::clone(&catalog), Arc::clone(&manager)),
            discovery: DiscoveryGateway::new(
                Arc::clone(&catalog),
                Arc::clone(&manager),
                Arc::clone(&configs),
            ),
            store,
            configs,
            catalog,
            manager,
            admin: Mutex::new(()),
        })
    }
}

pub struct Strata {
    store: ConfigStore,
    // Shared with the discovery gateway so configured-but-disconnected
    // servers stay visible there.
    configs: Arc<RwLock<BTreeMap<String, ServerConfig>>>,
    catalog: Arc<ToolCatalog>,
    manager: Arc<ConnectionManager>,
    router: ExecutionRouter,
    discovery: DiscoveryGateway,
    // Serializes administrative mutations; racing calls on one name see
    // each other's completed effect, last writer wins.
    admin: Mutex<()>,
}

impl Strata {
    pub fn builder(config_path: impl Into<PathBuf>) -> StrataBuilder {
        StrataBuilder {
            config_path: config_path.into(),
            factory: None,
            backoff: None,
        }
    }

    /// Loads the gateway against the config file with the production
    /// transport factory.
    pub fn load(config_path: impl Into<PathBuf>) -> GatewayResult<Self> {
        Self::builder(config_path).build()
    }

    /// Kicks off connections for every enabled server. Returns once the
    /// lifecycle tasks are scheduled.
    pub async fn start(&self) {
        let enabled: Vec<ServerConfig> = self
            .configs
            .read()
            .await
            .values()
            .filter(|c| c.enabled)
            .cloned()
            .collect();
        info!(servers = enabled.len(), "starting gateway");
        for config in enabled {
            self.manager.connect(config).await;
        }
    }

    // ── Administrative surface ─────────────────────────────────────

    /// Validates, persists, and (when enabled) starts connecting the new
    /// server. Duplicate names are rejected; a failed save leaves both
    /// the file and memory untouched.
    pub async fn add_server(&self, config: ServerConfig) -> GatewayResult<()> {
        let _admin = self.admin.lock().await;
        config
            .validate()
            .map_err(|e| GatewayError::Config(e.to_string()))?;

        {
            let mut configs = self.configs.write().await;
            if configs.contains_key(&config.name) {
                return Err(GatewayError::Config(format!(
                    "server '{}' already exists",
                    config.name
                )));
            }
            let mut candidate = configs.clone();
            candidate.insert(config.name.clone(), config.clone());
            self.store
                .save(&candidate)
                .map_err(|e| GatewayError::Config(e.to_string()))?;
            *configs = candidate;
        }

        info!(server = %config.name, transport = %config.transport, "server added");
        if config.enabled {
            self.manager.connect(config).await;
        }
        Ok(())
    }

    /// Persists the removal, then tears down any live connection.
    pub async fn remove_server(&self, name: &str) -> GatewayResult<()> {
        let _admin = self.admin.lock().await;
        {
            let mut configs = self.configs.write().await;
            if !configs.contains_key(name) {
                return Err(GatewayError::NotFound(format!("server '{name}'")));
            }
            let mut candidate = configs.clone();
            candidate.remove(name);
            self.store
                .save(&candidate)
                .map_err(|e| GatewayError::Config(e.to_string()))?;
            *configs = candidate;
        }
        self.manager.remove(name).await;
        info!(server = %name, "server removed");
        Ok(())
    }

    /// Flips the enablement flag and converges the connection to match.
    pub async fn set_enabled(&self, name: &str, enabled: bool) -> GatewayResult<()> {
        let _admin = self.admin.lock().await;
        let config = {
            let mut configs = self.configs.write().await;
            let Some(existing) = configs.get(name) else {
                return Err(GatewayError::NotFound(format!("server '{name}'")));
            };
            let mut updated = existing.clone();
            updated.enabled = enabled;
            let mut candidate = configs.clone();
            candidate.insert(name.to_string(), updated.clone());
            self.store
                .save(&candidate)
                .map_err(|e| GatewayError::Config(e.to_string()))?;
            *configs = candidate;
            updated
        };
        if enabled {
            self.manager.connect(config).await;
        } else {
            self.manager.disconnect(name).await;
        }
        info!(server = %name, enabled, "enablement changed");
        Ok(())
    }

    /// Every configured server with its live state and action count.
    pub async fn list_servers(&self) -> Vec<ServerOverview> {
        let configs = self.configs.read().await;
        let statuses = self.manager.statuses().await;
        let counts = self.catalog.counts();
        configs
            .values()
            .map(|config| {
                let status = statuses.get(&config.name).cloned().unwrap_or(ConnectionStatus {
                    state: ConnectionState::Disconnected,
                    last_error: None,
                });
                ServerOverview {
                    name: config.name.clone(),
                    transport: config.transport,
                    enabled: config.enabled,
                    state: status.state,
                    last_error: status.last_error,
                    actions: counts.get(&config.name).copied().unwrap_or(0),
                }
            })
            .collect()
    }

    /// One-shot connectivity probe against a configured server, without
    /// touching its managed connection.
    pub async fn test_server(&self, name: &str) -> GatewayResult<ServerTestResult> {
        let config = self
            .configs
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(format!("server '{name}'")))?;
        match self.manager.probe(&config).await {
            Ok(actions) => Ok(ServerTestResult {
                server: name.to_string(),
                ok: true,
                actions,
                message: None,
            }),
            Err(e) => Ok(ServerTestResult {
                server: name.to_string(),
                ok: false,
                actions: 0,
                message: Some(e.to_string()),
            }),
        }
    }

    // ── Agent-facing surface ───────────────────────────────────────

    pub async fn discover_server_actions(
        &self,
        server: Option<&str>,
        query: Option<&str>,
    ) -> GatewayResult<Value> {
        self.discovery.discover_server_actions(server, query).await
    }

    pub fn get_action_details(&self, server: &str, action: &str) -> GatewayResult<ActionDescriptor> {
        self.discovery.get_action_details(server, action)
    }

    pub fn search_documentation(&self, term: &str) -> Vec<DocMatch> {
        self.discovery.search_documentation(term)
    }

    /// Executes one action and returns the outcome envelope. Auth
    /// failures carry their remediation inline so the caller never needs
    /// a second round trip to learn what to do.
    pub async fn execute_action(&self, server: &str, action: &str, args: Value) -> Value {
        match self.router.execute(server, action, args).await {
            Ok(result) => success_envelope(result),
            Err(e) => {
                let remediation = if matches!(e, GatewayError::AuthFailure { .. }) {
                    self.configs.read().await.get(server).map(remediation_for)
                } else {
                    None
                };
                error_envelope(&e, remediation.as_ref())
            }
        }
    }

    /// Remediation guidance for a server whose credentials failed.
    pub async fn handle_auth_failure(&self, server: &str) -> GatewayResult<RemediationPayload> {
        self.configs
            .read()
            .await
            .get(server)
            .map(remediation_for)
            .ok_or_else(|| GatewayError::NotFound(format!("server '{server}'")))
    }

    /// Dispatch for the gateway's own endpoint: routes a meta-tool call
    /// by name and always answers with an outcome envelope.
    pub async fn handle_meta_tool(&self, name: &str, args: &Value) -> Value {
        // execute_action produces its own envelope; unwrap-and-rewrap
        // would double it.
        if name == "execute_action" {
            let parsed = (|| {
                let server = require_str(args, "server")?;
                let action = require_str(args, "action")?;
                Ok::<_, GatewayError>((server, action))
            })();
            return match parsed {
                Ok((server, action)) => {
                    let call_args = args.get("args").cloned().unwrap_or_else(|| json!({}));
                    self.execute_action(server, action, call_args).await
                }
                Err(e) => error_envelope(&e, None),
            };
        }
        match self.dispatch_meta_tool(name, args).await {
            Ok(result) => success_envelope(result),
            Err(e) => {
                let remediation = match (&e, args.get("server").and_then(Value::as_str)) {
                    (GatewayError::AuthFailure { .. }, Some(server)) => {
                        self.configs.read().await.get(server).map(remediation_for)
                    }
                    _ => None,
                };
                error_envelope(&e, remediation.as_ref())
            }
        }
    }

    async fn dispatch_meta_tool(&self, name: &str, args: &Value) -> GatewayResult<Value> {
        match name {
            "discover_server_actions" => {
                let server = args.get("server").and_then(Value::as_str);
                let query = args.get("query").and_then(Value::as_str);
                self.discover_server_actions(server, query).await
            }
            "get_action_details" => {
                let server = require_str(args, "server")?;
                let action = require_str(args, "action")?;
                let descriptor = self.get_action_details(server, action)?;
                Ok(serde_json::to_value(descriptor)?)
            }
            "search_documentation" => {
                let term = require_str(args, "term")?;
                Ok(serde_json::to_value(self.search_documentation(term))?)
            }
            "handle_auth_failure" => {
                let server = require_str(args, "server")?;
                let payload = self.handle_auth_failure(server).await?;
                Ok(serde_json::to_value(payload)?)
            }
            other => Err(GatewayError::NotFound(format!("meta-tool '{other}'"))),
        }
    }

    /// Cancels all lifecycle tasks and closes all sessions.
    pub async fn shutdown(&self) {
        self.manager.shutdown_all().await;
    }
}

fn require_str<'a>(args: &'a Value, field: &str) -> GatewayResult<&'a str> {
    match args.get(field) {
        Some(value) => value.as_str().ok_or_else(|| GatewayError::InvalidArgument {
            field: field.to_string(),
            message: "expected a string".to_string(),
        }),
        None => Err(GatewayError::InvalidArgument {
            field: field.to_string(),
            message: "missing required field".to_string(),
        }),
    }
}
