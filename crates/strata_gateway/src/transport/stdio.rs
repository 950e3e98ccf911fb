//! Stdio transport: a child process speaking newline-delimited JSON-RPC.
//!
//! A background task owns the child's stdout and routes each reply to the
//! waiting caller through a pending-request map, so any number of calls
//! can be in flight and each one can time out or be cancelled without
//! wedging the stream. Writes to stdin are serialized behind a lock.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{Transport, TransportError};
use crate::config::ServerConfig;
use crate::protocol::{
    ActionSpec, CallActionParams, InitializeParams, InitializeResult, JsonRpcRequest,
    JsonRpcResponse, ListActionsResult,
};

type PendingMap = Arc<StdMutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

pub struct StdioTransport {
    server: String,
    child: StdMutex<Option<Child>>,
    stdin: Mutex<ChildStdin>,
    pending: PendingMap,
    reader: StdMutex<Option<JoinHandle<()>>>,
    next_id: AtomicU64,
}

impl StdioTransport {
    /// Spawns the configured command and wires up reply routing.
    pub fn spawn(config: &ServerConfig) -> Result<Self, TransportError> {
        let command = config
            .params
            .command
            .as_deref()
            .ok_or_else(|| TransportError::Connect("stdio transport requires a command".into()))?;

        let mut cmd = Command::new(command);
        cmd.args(&config.params.args)
            .envs(&config.params.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &config.params.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| TransportError::Connect(format!("failed to spawn '{command}': {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::Connect("child stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Connect("child stdout not captured".into()))?;

        let pending: PendingMap = Arc::new(StdMutex::new(HashMap::new()));
        let reader = tokio::spawn(read_loop(
            config.name.clone(),
            BufReader::new(stdout),
            Arc::clone(&pending),
        ));

        Ok(Self {
            server: config.name.clone(),
            child: StdMutex::new(Some(child)),
            stdin: Mutex::new(stdin),
            pending,
            reader: StdMutex::new(Some(reader)),
            next_id: AtomicU64::new(1),
        })
    }

    async fn write_line(&self, message: &JsonRpcRequest) -> Result<(), TransportError> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');
        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(&line)
            .await
            .map_err(|e| TransportError::Closed(format!("stdin write failed: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| TransportError::Closed(format!("stdin flush failed: {e}")))?;
        Ok(())
    }

    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(id, tx);
        }

        // The write shares the caller's budget: a wedged stdin must not
        // stall past the timeout, and whatever the write consumed comes
        // off the reply wait.
        let started = tokio::time::Instant::now();
        let request = JsonRpcRequest::new(id, method, params);
        match tokio::time::timeout(timeout, self.write_line(&request)).await {
            Err(_) => {
                self.forget(id);
                return Err(TransportError::Timeout(timeout.as_millis() as u64));
            }
            Ok(Err(e)) => {
                self.forget(id);
                return Err(e);
            }
            Ok(Ok(())) => {}
        }

        let budget = timeout.saturating_sub(started.elapsed());
        match tokio::time::timeout(budget, rx).await {
            Err(_) => {
                // Abandon the slot; the reader drops the late reply.
                self.forget(id);
                Err(TransportError::Timeout(timeout.as_millis() as u64))
            }
            Ok(Err(_)) => Err(TransportError::Closed(format!(
                "server '{}' closed the stream",
                self.server
            ))),
            Ok(Ok(response)) => response.into_result().map_err(TransportError::from_rpc),
        }
    }

    async fn notify(&self, method: &str) -> Result<(), TransportError> {
        self.write_line(&JsonRpcRequest::notification(method, None))
            .await
    }

    fn forget(&self, id: u64) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&id);
        }
    }
}

async fn read_loop(
    server: String,
    stdout: BufReader<tokio::process::ChildStdout>,
    pending: PendingMap,
) {
    let mut lines = stdout.lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<JsonRpcResponse>(line) {
                    Ok(response) => {
                        let Some(id) = response.numeric_id() else {
                            // Server-initiated traffic we do not consume.
                            debug!(server = %server, "ignoring message without numeric id");
                            continue;
                        };
                        let waiter = pending.lock().ok().and_then(|mut p| p.remove(&id));
                        match waiter {
                            Some(tx) => {
                                // Caller may have timed out or been cancelled.
                                let _ = tx.send(response);
                            }
                            None => debug!(server = %server, id, "discarding late reply"),
                        }
                    }
                    Err(e) => debug!(server = %server, error = %e, "unparseable line from server"),
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(server = %server, error = %e, "stdout read failed");
                break;
            }
        }
    }
    // EOF: dropping the senders fails every in-flight call.
    if let Ok(mut p) = pending.lock() {
        p.clear();
    }
    debug!(server = %server, "stdio reader finished");
}

#[async_trait]
impl Transport for StdioTransport {
    async fn initialize(&self, timeout: Duration) -> Result<InitializeResult, TransportError> {
        let params = serde_json::to_value(InitializeParams::default())?;
        let raw = self.request("initialize", Some(params), timeout).await?;
        let result: InitializeResult = serde_json::from_value(raw)
            .map_err(|e| TransportError::Protocol(format!("bad initialize result: {e}")))?;
        self.notify("notifications/initialized").await?;
        debug!(
            server = %self.server,
            downstream = %result.server_info.name,
            version = %result.protocol_version,
            "handshake complete"
        );
        Ok(result)
    }

    async fn list_actions(&self, timeout: Duration) -> Result<Vec<ActionSpec>, TransportError> {
        let mut actions = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = cursor
                .take()
                .map(|c| serde_json::json!({ "cursor": c }))
                .unwrap_or_else(|| serde_json::json!({}));
            let raw = self.request("tools/list", Some(params), timeout).await?;
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

    async fn invoke(
        &self,
        action: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<Value, TransportError> {
        let params = serde_json::to_value(CallActionParams {
            name: action.to_string(),
            arguments: Some(arguments),
        })?;
        self.request("tools/call", Some(params), timeout).await
    }

    async fn close(&self) {
        if let Some(reader) = self.reader.lock().ok().and_then(|mut r| r.take()) {
            reader.abort();
        }
        if let Some(mut child) = self.child.lock().ok().and_then(|mut c| c.take()) {
            if let Err(e) = child.start_kill() {
                debug!(server = %self.server, error = %e, "kill on close failed");
            }
        }
        if let Ok(mut pending) = self.pending.lock() {
            pending.clear();
        }
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.lock().ok().and_then(|mut r| r.take()) {
            reader.abort();
        }
        // kill_on_drop reaps the child.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    #[tokio::test]
    async fn unresponsive_child_times_out_within_budget() {
        let config = ServerConfig::stdio("sleeper", "sleep").with_args(vec!["5".to_string()]);
        let transport = StdioTransport::spawn(&config).expect("sleep is available");

        let started = std::time::Instant::now();
        let err = transport
            .request("tools/list", None, Duration::from_millis(100))
            .await
            .expect_err("a child that never replies must not hang the call");
        assert!(matches!(
            err,
            TransportError::Timeout(_) | TransportError::Closed(_)
        ));
        // Write plus reply wait share one budget; nothing close to the
        // child's 5 s lifetime.
        assert!(started.elapsed() < Duration::from_secs(2));

        transport.close().await;
    }
}
