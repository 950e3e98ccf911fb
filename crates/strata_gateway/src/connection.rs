//! Per-server connection lifecycle.
//!
//! Each enabled server gets one `Connection` record and, while it is being
//! brought up, one lifecycle task. The task opens a transport, runs the
//! handshake, fetches the action listing, and publishes it to the catalog
//! in a single swap. Failures back off exponentially for a bounded number
//! of retries, then park the connection as `Failed` until an admin acts.
//!
//! State is guarded per connection; there is no gateway-wide lock, so one
//! slow server never stalls the others.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::{ActionDescriptor, ToolCatalog};
use crate::config::ServerConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::transport::{Transport, TransportError, TransportFactory};

const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(500);
const DEFAULT_MAX_RETRIES: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Lost or never established; retrying with backoff.
    Degraded,
    /// Retry budget exhausted; waiting for administrative action.
    Failed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Degraded => "degraded",
            ConnectionState::Failed => "failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State + last error, as surfaced to admin listings.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

struct Connection {
    config: ServerConfig,
    state: ConnectionState,
    last_error: Option<String>,
    /// The live transport. Owned here and handed out as `Arc` clones for
    /// individual calls; never stored anywhere else.
    session: Option<Arc<dyn Transport>>,
}

struct LifecycleTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct ConnectionManager {
    factory: Arc<dyn TransportFactory>,
    catalog: Arc<ToolCatalog>,
    connections: RwLock<HashMap<String, Arc<Mutex<Connection>>>>,
    tasks: Mutex<HashMap<String, LifecycleTask>>,
    backoff_base: Duration,
    max_retries: u32,
}

impl ConnectionManager {
    pub fn new(factory: Arc<dyn TransportFactory>, catalog: Arc<ToolCatalog>) -> Self {
        Self {
            factory,
            catalog,
            connections: RwLock::new(HashMap::new()),
            tasks: Mutex::new(HashMap::new()),
            backoff_base: DEFAULT_BACKOFF_BASE,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Overrides the retry schedule. Tests shrink it to keep scenarios fast.
    pub fn with_backoff(mut self, base: Duration, max_retries: u32) -> Self {
        self.backoff_base = base;
        self.max_retries = max_retries;
        self
    }

    async fn connection(&self, name: &str) -> Option<Arc<Mutex<Connection>>> {
        self.connections.read().await.get(name).cloned()
    }

    /// Starts (or restarts) the connection for `config`. Idempotent: a
    /// server already `Connecting` or `Connected` is left alone. Returns
    /// once the lifecycle task is scheduled; convergence is asynchronous.
    pub async fn connect(self: &Arc<Self>, config: ServerConfig) {
        let name = config.name.clone();
        let entry = {
            let mut connections = self.connections.write().await;
            connections
                .entry(name.clone())
                .or_insert_with(|| {
                    Arc::new(Mutex::new(Connection {
                        config: config.clone(),
                        state: ConnectionState::Disconnected,
                        last_error: None,
                        session: None,
                    }))
                })
                .clone()
        };
        {
            let mut conn = entry.lock().await;
            if matches!(
                conn.state,
                ConnectionState::Connecting | ConnectionState::Connected
            ) {
                debug!(server = %name, state = %conn.state, "connect is a no-op");
                return;
            }
            conn.config = config;
            conn.state = ConnectionState::Connecting;
            conn.last_error = None;
        }
        self.spawn_lifecycle(name).await;
    }

    async fn spawn_lifecycle(self: &Arc<Self>, name: String) {
        let token = CancellationToken::new();
        let handle = {
            let manager = Arc::clone(self);
            let name = name.clone();
            let token = token.clone();
            tokio::spawn(async move { manager.run_lifecycle(name, token).await })
        };
        let mut tasks = self.tasks.lock().await;
        if let Some(previous) = tasks.insert(name, LifecycleTask { token, handle }) {
            previous.token.cancel();
            previous.handle.abort();
        }
    }

    async fn run_lifecycle(self: Arc<Self>, name: String, token: CancellationToken) {
        let mut attempt: u32 = 0;
        loop {
            if token.is_cancelled() {
                return;
            }
            let Some(entry) = self.connection(&name).await else {
                return;
            };
            let config = entry.lock().await.config.clone();
            let timeout = config.params.timeout();

            match self.open_session(&config, timeout).await {
                Ok((session, actions)) => {
                    let mut conn = entry.lock().await;
                    if token.is_cancelled() {
                        session.close().await;
                        return;
                    }
                    if let Some(stale) = conn.session.take() {
                        stale.close().await;
                    }
                    let count = actions.len();
                    conn.session = Some(session);
                    conn.state = ConnectionState::Connected;
                    conn.last_error = None;
                    self.catalog.replace_server(&name, actions);
                    info!(server = %name, actions = count, "connected");
                    return;
                }
                Err(e) => {
                    attempt += 1;
                    let exhausted = attempt > self.max_retries;
                    {
                        let mut conn = entry.lock().await;
                        if token.is_cancelled() {
                            return;
                        }
                        conn.state = if exhausted {
                            ConnectionState::Failed
                        } else {
                            ConnectionState::Degraded
                        };
                        conn.last_error = Some(e.to_string());
                    }
                    self.catalog.remove_server(&name);
                    if exhausted {
                        warn!(server = %name, error = %e, "retry budget exhausted");
                        return;
                    }
                    let delay = self.backoff_base * 2u32.saturating_pow(attempt - 1);
                    debug!(server = %name, attempt, delay_ms = delay.as_millis() as u64, error = %e, "connect failed, backing off");
                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Opens a transport and brings it to a usable state: handshake, then
    /// the first listing. Any failure closes the half-open session.
    async fn open_session(
        &self,
        config: &ServerConfig,
        timeout: Duration,
    ) -> Result<(Arc<dyn Transport>, Vec<ActionDescriptor>), TransportError> {
        let session = self.factory.open(config).await?;
        if let Err(e) = session.initialize(timeout).await {
            session.close().await;
            return Err(e);
        }
        match session.list_actions(timeout).await {
            Ok(specs) => {
                let actions = specs
                    .into_iter()
                    .map(|spec| ActionDescriptor::from_spec(&config.name, spec))
                    .collect();
                Ok((session, actions))
            }
            Err(e) => {
                session.close().await;
                Err(e)
            }
        }
    }

    /// Stops the lifecycle task, closes the session, and strips the
    /// server's catalog entries. Safe to call in any state.
    pub async fn disconnect(&self, name: &str) {
        self.cancel_task(name).await;
        if let Some(entry) = self.connection(name).await {
            let mut conn = entry.lock().await;
            if let Some(session) = conn.session.take() {
                session.close().await;
            }
            conn.state = ConnectionState::Disconnected;
            conn.last_error = None;
        }
        self.catalog.remove_server(name);
    }

    /// Disconnects and forgets the server entirely.
    pub async fn remove(&self, name: &str) {
        self.disconnect(name).await;
        self.connections.write().await.remove(name);
    }

    async fn cancel_task(&self, name: &str) {
        if let Some(task) = self.tasks.lock().await.remove(name) {
            task.token.cancel();
            task.handle.abort();
        }
    }

    /// A live session handle plus the server's call budget. `Unavailable`
    /// unless the connection is `Connected` right now.
    pub async fn session(&self, name: &str) -> GatewayResult<(Arc<dyn Transport>, Duration)> {
        let entry = self
            .connection(name)
            .await
            .ok_or_else(|| GatewayError::Unavailable(name.to_string()))?;
        let conn = entry.lock().await;
        match (&conn.state, &conn.session) {
            (ConnectionState::Connected, Some(session)) => {
                Ok((Arc::clone(session), conn.config.params.timeout()))
            }
            _ => Err(GatewayError::Unavailable(name.to_string())),
        }
    }

    pub async fn status(&self, name: &str) -> Option<ConnectionStatus> {
        let entry = self.connection(name).await?;
        let conn = entry.lock().await;
        Some(ConnectionStatus {
            state: conn.state,
            last_error: conn.last_error.clone(),
        })
    }

    pub async fn statuses(&self) -> BTreeMap<String, ConnectionStatus> {
        let entries: Vec<(String, Arc<Mutex<Connection>>)> = self
            .connections
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let mut statuses = BTreeMap::new();
        for (name, entry) in entries {
            let conn = entry.lock().await;
            statuses.insert(
                name,
                ConnectionStatus {
                    state: conn.state,
                    last_error: conn.last_error.clone(),
                },
            );
        }
        statuses
    }

    /// Called by the router when a live call hits a transport fault
    /// (timeout, closed stream). Marks the connection `Degraded`, drops
    /// its catalog entries, and restarts the lifecycle with a fresh retry
    /// budget. Auth failures do not land here; reconnecting cannot fix
    /// credentials.
    pub async fn report_failure(self: &Arc<Self>, name: &str, error: &TransportError) {
        let Some(entry) = self.connection(name).await else {
            return;
        };
        {
            let mut conn = entry.lock().await;
            if conn.state != ConnectionState::Connected {
                return;
            }
            if let Some(session) = conn.session.take() {
                session.close().await;
            }
            conn.state = ConnectionState::Degraded;
            conn.last_error = Some(error.to_string());
        }
        self.catalog.remove_server(name);
        warn!(server = %name, error = %error, "live call failed, reconnecting");
        self.spawn_lifecycle(name.to_string()).await;
    }

    /// One-shot probe used by `server test`: connect, handshake, count
    /// actions, tear down. Leaves managed state untouched.
    pub async fn probe(&self, config: &ServerConfig) -> GatewayResult<usize> {
        let timeout = config.params.timeout();
        let (session, actions) = self
            .open_session(config, timeout)
            .await
            .map_err(|e| classify_transport_error(&config.name, e))?;
        session.close().await;
        Ok(actions.len())
    }

    /// Cancels every lifecycle task and closes every session.
    pub async fn shutdown_all(&self) {
        let names: Vec<String> = self.connections.read().await.keys().cloned().collect();
        for name in names {
            self.disconnect(&name).await;
        }
        info!("all connections shut down");
    }
}

/// Transport faults as seen by callers of the gateway.
pub(crate) fn classify_transport_error(server: &str, error: TransportError) -> GatewayError {
    match error {
        TransportError::Timeout(ms) => GatewayError::Timeout(ms),
        TransportError::Auth(message) => GatewayError::AuthFailure {
            server: server.to_string(),
            message,
        },
        TransportError::Closed(_) | TransportError::Connect(_) => {
            GatewayError::Unavailable(server.to_string())
        }
        other => GatewayError::Downstream {
            server: server.to_string(),
            message: other.to_string(),
        },
    }
}
