//! The discovery surface shown to the agent.
//!
//! The catalog is never dumped wholesale: the agent walks it through
//! `discover_server_actions` (overview, per-server listing, or keyword
//! search), pulls full schemas one action at a time with
//! `get_action_details`, and greps documentation with
//! `search_documentation`.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::catalog::{ActionDescriptor, DocMatch, ToolCatalog};
use crate::config::ServerConfig;
use crate::connection::{ConnectionManager, ConnectionState};
use crate::error::{GatewayError, GatewayResult};

/// Definition of one meta-tool as exposed on the gateway's own endpoint.
#[derive(Debug, Clone)]
pub struct MetaToolDef {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

/// The fixed meta-tool set. This is the gateway's whole agent-facing
/// surface, independent of how many servers sit behind it.
pub fn meta_tool_definitions() -> Vec<MetaToolDef> {
    vec![
        MetaToolDef {
            name: "discover_server_actions",
            description: "Discover available servers and their actions. With no arguments, lists every server with its connection state and action count. With `server`, lists that server's actions with one-line descriptions. With `query`, searches action names and descriptions across all servers, best matches first.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "server": {
                        "type": "string",
                        "description": "Limit the listing to one server"
                    },
                    "query": {
                        "type": "string",
                        "description": "Keyword to search for across all servers"
                    }
                },
                "required": []
            }),
        },
        MetaToolDef {
            name: "get_action_details",
            description: "Fetch the full descriptor of one action: description, parameter schema, and documentation reference if any.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "server": {"type": "string", "description": "Server name"},
                    "action": {"type": "string", "description": "Action name"}
                },
                "required": ["server", "action"]
            }),
        },
        MetaToolDef {
            name: "execute_action",
            description: "Execute an action on a downstream server. Arguments are validated against the action's schema before dispatch. Always returns an outcome envelope: {ok: true, result} or {ok: false, error}.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "server": {"type": "string", "description": "Server name"},
                    "action": {"type": "string", "description": "Action name"},
                    "args": {
                        "type": "object",
                        "description": "Arguments for the action, per its parameter schema"
                    }
                },
                "required": ["server", "action"]
            }),
        },
        MetaToolDef {
            name: "search_documentation",
            description: "Search downstream action documentation and descriptions for a term. Returns matching actions with a snippet around the first match.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "term": {"type": "string", "description": "Term to search for"}
                },
                "required": ["term"]
            }),
        },
        MetaToolDef {
            name: "handle_auth_failure",
            description: "Get remediation guidance after an authentication failure on a server, including the authorization URL for OAuth servers.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "server": {"type": "string", "description": "Server name"}
                },
                "required": ["server"]
            }),
        },
    ]
}

pub struct DiscoveryGateway {
    catalog: Arc<ToolCatalog>,
    manager: Arc<ConnectionManager>,
    configs: Arc<RwLock<BTreeMap<String, ServerConfig>>>,
}

impl DiscoveryGateway {
    pub fn new(
        catalog: Arc<ToolCatalog>,
        manager: Arc<ConnectionManager>,
        configs: Arc<RwLock<BTreeMap<String, ServerConfig>>>,
    ) -> Self {
        Self {
            catalog,
            manager,
            configs,
        }
    }

    /// The three shapes of discovery, keyed by which filter is present.
    /// `query` wins when both are given.
    pub async fn discover_server_actions(
        &self,
        server: Option<&str>,
        query: Option<&str>,
    ) -> GatewayResult<Value> {
        if let Some(term) = query {
            let actions: Vec<Value> = self
                .catalog
                .search(term)
                .iter()
                .map(|d| {
                    json!({
                        "server": d.server,
                        "action": d.action,
                        "description": d.summary(),
                    })
                })
                .collect();
            return Ok(json!({ "actions": actions }));
        }

        if let Some(name) = server {
            let enabled = self
                .configs
                .read()
                .await
                .get(name)
                .map(|c| c.enabled)
                .ok_or_else(|| GatewayError::NotFound(format!("server '{name}'")))?;
            let state = self
                .manager
                .status(name)
                .await
                .map(|s| s.state)
                .unwrap_or(ConnectionState::Disconnected);
            let actions: Vec<Value> = self
                .catalog
                .server_actions(name)
                .unwrap_or_default()
                .iter()
                .map(|d| json!({ "action": d.action, "description": d.summary() }))
                .collect();
            return Ok(json!({
                "server": name,
                "enabled": enabled,
                "state": state,
                "actions": actions,
            }));
        }

        // Every configured server appears here, connected or not; a server
        // the manager has never touched reads as disconnected.
        let counts = self.catalog.counts();
        let statuses = self.manager.statuses().await;
        let servers: Vec<Value> = self
            .configs
            .read()
            .await
            .values()
            .map(|config| {
                let state = statuses
                    .get(&config.name)
                    .map(|s| s.state)
                    .unwrap_or(ConnectionState::Disconnected);
                json!({
                    "name": config.name,
                    "enabled": config.enabled,
                    "state": state,
                    "actions": counts.get(&config.name).copied().unwrap_or(0),
                })
            })
            .collect();
        Ok(json!({ "servers": servers }))
    }

    /// Full descriptor for one action. `NotFound` covers unknown servers,
    /// unknown actions, and servers with no live listing alike.
    pub fn get_action_details(&self, server: &str, action: &str) -> GatewayResult<ActionDescriptor> {
        self.catalog.get(server, action).ok_or_else(|| {
            GatewayError::NotFound(format!("action '{action}' on server '{server}'"))
        })
    }

    pub fn search_documentation(&self, term: &str) -> Vec<DocMatch> {
        self.catalog.search_docs(term)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_tools_are_the_fixed_five() {
        let defs = meta_tool_definitions();
        let names: Vec<&str> = defs.iter().map(|d| d.name).collect();
        assert_eq!(
            names,
            vec![
                "discover_server_actions",
                "get_action_details",
                "execute_action",
                "search_documentation",
                "handle_auth_failure",
            ]
        );
    }

    #[test]
    fn meta_tool_schemas_are_object_schemas() {
        for def in meta_tool_definitions() {
            assert_eq!(def.parameters["type"], "object", "{}", def.name);
            assert!(def.parameters["properties"].is_object(), "{}", def.name);
            assert!(def.parameters["required"].is_array(), "{}", def.name);
            assert!(!def.description.is_empty());
        }
    }
}
