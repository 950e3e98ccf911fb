//! Discovery and execution commands.
//!
//! Each command brings up the gateway, waits for the enabled servers to
//! settle, runs one operation, and shuts down.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;
use strata_gateway::{ConnectionState, Strata};

use crate::cli::ToolsAction;
use crate::output;

const SETTLE_TIMEOUT: Duration = Duration::from_secs(15);
const SETTLE_POLL: Duration = Duration::from_millis(50);

pub async fn handle(config_path: PathBuf, action: ToolsAction) -> Result<()> {
    let strata = Strata::load(config_path)?;
    strata.start().await;
    wait_for_settle(&strata).await;

    let result = run(&strata, action).await;
    strata.shutdown().await;
    result
}

async fn run(strata: &Strata, action: ToolsAction) -> Result<()> {
    match action {
        ToolsAction::Discover { server, query } => {
            let listing = strata
                .discover_server_actions(server.as_deref(), query.as_deref())
                .await?;
            output::json_pretty(&listing);
        }
        ToolsAction::Info { server, action } => {
            let descriptor = strata.get_action_details(&server, &action)?;
            output::json_pretty(&serde_json::to_value(&descriptor)?);
        }
        ToolsAction::Exec {
            server,
            action,
            args,
        } => {
            let args: Value = serde_json::from_str(&args)
                .with_context(|| format!("--args is not valid JSON: {args}"))?;
            let envelope = strata.execute_action(&server, &action, args).await;
            output::json_pretty(&envelope);
        }
        ToolsAction::SearchDocs { term } => {
            let matches = strata.search_documentation(&term);
            if matches.is_empty() {
                output::warning(&format!("No documentation matched '{term}'"));
            } else {
                output::json_pretty(&serde_json::to_value(&matches)?);
            }
        }
    }
    Ok(())
}

/// Waits until no enabled server is still connecting or retrying, so
/// discovery sees a populated catalog. Bounded; a server stuck in its
/// retry loop does not hang the command.
async fn wait_for_settle(strata: &Strata) {
    let deadline = tokio::time::Instant::now() + SETTLE_TIMEOUT;
    loop {
        let servers = strata.list_servers().await;
        let pending = servers.iter().any(|s| {
            s.enabled
                && matches!(
                    s.state,
                    ConnectionState::Connecting | ConnectionState::Degraded
                )
        });
        if !pending || tokio::time::Instant::now() >= deadline {
            return;
        }
        tokio::time::sleep(SETTLE_POLL).await;
    }
}
