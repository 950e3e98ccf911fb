//! The aggregated action catalog.
//!
//! Descriptors are derived only from live `tools/list` responses and are
//! swapped per server in one write, so readers always see either the
//! whole previous listing or the whole new one. A server's entries are
//! removed together with its connection; a configured-but-disconnected
//! server simply has no entries here.

use std::collections::BTreeMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::ActionSpec;

/// One callable action on one server, as the agent sees it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionDescriptor {
    pub server: String,
    pub action: String,
    pub description: String,
    /// JSON schema for the action's arguments, cached from the listing.
    pub parameter_schema: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_ref: Option<String>,
}

impl ActionDescriptor {
    pub fn from_spec(server: &str, spec: ActionSpec) -> Self {
        Self {
            server: server.to_string(),
            action: spec.name,
            description: spec.description.unwrap_or_default(),
            parameter_schema: spec.input_schema,
            doc_ref: spec.doc_url,
        }
    }

    /// First line of the description, for compact listings.
    pub fn summary(&self) -> &str {
        self.description.lines().next().unwrap_or_default()
    }
}

/// A documentation search hit.
#[derive(Debug, Clone, Serialize)]
pub struct DocMatch {
    pub server: String,
    pub action: String,
    pub snippet: String,
}

#[derive(Debug, Default)]
pub struct ToolCatalog {
    // server -> action name -> descriptor. Read-mostly; writes are rare
    // whole-server swaps, so a std RwLock is enough.
    servers: RwLock<BTreeMap<String, BTreeMap<String, ActionDescriptor>>>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces everything known about `server` in one write.
    pub fn replace_server(&self, server: &str, actions: Vec<ActionDescriptor>) {
        let entries: BTreeMap<String, ActionDescriptor> = actions
            .into_iter()
            .map(|d| (d.action.clone(), d))
            .collect();
        if let Ok(mut servers) = self.servers.write() {
            servers.insert(server.to_string(), entries);
        }
    }

    pub fn remove_server(&self, server: &str) {
        if let Ok(mut servers) = self.servers.write() {
            servers.remove(server);
        }
    }

    pub fn get(&self, server: &str, action: &str) -> Option<ActionDescriptor> {
        self.servers
            .read()
            .ok()
            .and_then(|s| s.get(server).and_then(|a| a.get(action)).cloned())
    }

    /// All of one server's descriptors, or `None` when it has none.
    pub fn server_actions(&self, server: &str) -> Option<Vec<ActionDescriptor>> {
        self.servers
            .read()
            .ok()
            .and_then(|s| s.get(server).map(|a| a.values().cloned().collect()))
    }

    /// Action count per server with any entries.
    pub fn counts(&self) -> BTreeMap<String, usize> {
        self.servers
            .read()
            .map(|s| s.iter().map(|(k, v)| (k.clone(), v.len())).collect())
            .unwrap_or_default()
    }

    /// Case-insensitive keyword search over action names and
    /// descriptions. Name hits rank above description-only hits; ties
    /// break by server name, then action name, ascending.
    pub fn search(&self, term: &str) -> Vec<ActionDescriptor> {
        let needle = term.to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        let Ok(servers) = self.servers.read() else {
            return Vec::new();
        };
        let mut hits: Vec<(u8, &ActionDescriptor)> = Vec::new();
        for actions in servers.values() {
            for descriptor in actions.values() {
                let name_hit = descriptor.action.to_lowercase().contains(&needle);
                let desc_hit = descriptor.description.to_lowercase().contains(&needle);
                if name_hit {
                    hits.push((0, descriptor));
                } else if desc_hit {
                    hits.push((1, descriptor));
                }
            }
        }
        // BTreeMap iteration already yields (server, action) ascending,
        // so a stable sort on rank alone keeps the tie order.
        hits.sort_by_key(|(rank, _)| *rank);
        hits.into_iter().map(|(_, d)| d.clone()).collect()
    }

    /// Searches documentation references and descriptions, returning a
    /// snippet around the first matching line.
    pub fn search_docs(&self, term: &str) -> Vec<DocMatch> {
        let needle = term.to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        let Ok(servers) = self.servers.read() else {
            return Vec::new();
        };
        let mut matches = Vec::new();
        for actions in servers.values() {
            for descriptor in actions.values() {
                let haystacks = [
                    descriptor.doc_ref.as_deref().unwrap_or_default(),
                    &descriptor.description,
                ];
                let hit = haystacks
                    .iter()
                    .flat_map(|text| text.lines())
                    .find(|line| line.to_lowercase().contains(&needle));
                if let Some(line) = hit {
                    matches.push(DocMatch {
                        server: descriptor.server.clone(),
                        action: descriptor.action.clone(),
                        snippet: snippet(line),
                    });
                }
            }
        }
        matches
    }
}

const SNIPPET_CHARS: usize = 160;

fn snippet(line: &str) -> String {
    let trimmed = line.trim();
    if trimmed.chars().count() <= SNIPPET_CHARS {
        trimmed.to_string()
    } else {
        let cut: String = trimmed.chars().take(SNIPPET_CHARS).collect();
        format!("{cut}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor(server: &str, action: &str, description: &str) -> ActionDescriptor {
        ActionDescriptor {
            server: server.to_string(),
            action: action.to_string(),
            description: description.to_string(),
            parameter_schema: json!({"type": "object", "properties": {}}),
            doc_ref: None,
        }
    }

    #[test]
    fn replace_is_a_whole_server_swap() {
        let catalog = ToolCatalog::new();
        catalog.replace_server(
            "files",
            vec![
                descriptor("files", "list_dir", "List a directory"),
                descriptor("files", "read_file", "Read a file"),
            ],
        );
        assert_eq!(catalog.counts().get("files"), Some(&2));

        catalog.replace_server("files", vec![descriptor("files", "stat", "Stat a path")]);
        assert!(catalog.get("files", "list_dir").is_none());
        assert!(catalog.get("files", "stat").is_some());
        assert_eq!(catalog.counts().get("files"), Some(&1));

        catalog.remove_server("files");
        assert!(catalog.counts().is_empty());
    }

    #[test]
    fn search_ranks_name_hits_first() {
        let catalog = ToolCatalog::new();
        catalog.replace_server(
            "files",
            vec![
                descriptor("files", "search_content", "Find text in files"),
                descriptor("files", "read_file", "Read a file, no search involved"),
            ],
        );
        catalog.replace_server(
            "web",
            vec![descriptor("web", "search_web", "Search the web")],
        );

        let hits = catalog.search("search");
        let keys: Vec<(String, String)> = hits
            .into_iter()
            .map(|d| (d.server, d.action))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("files".to_string(), "search_content".to_string()),
                ("web".to_string(), "search_web".to_string()),
                ("files".to_string(), "read_file".to_string()),
            ]
        );

        assert!(catalog.search("").is_empty());
        assert!(catalog.search("no-such-term").is_empty());
    }

    #[test]
    fn doc_search_returns_snippets() {
        let catalog = ToolCatalog::new();
        let mut with_docs = descriptor("files", "list_dir", "List a directory");
        with_docs.doc_ref = Some(
            "Usage notes:\nPass an absolute path to avoid surprises.\nSymlinks are not followed."
                .to_string(),
        );
        catalog.replace_server("files", vec![with_docs]);

        let matches = catalog.search_docs("absolute path");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].action, "list_dir");
        assert!(matches[0].snippet.contains("absolute path"));
    }

    #[test]
    fn long_snippets_are_truncated() {
        let long = "x".repeat(400);
        assert!(snippet(&long).chars().count() <= SNIPPET_CHARS + 1);
        assert_eq!(snippet("  short  "), "short");
    }

    #[test]
    fn descriptor_summary_is_first_line() {
        let d = descriptor("files", "list_dir", "List a directory\nMore detail here.");
        assert_eq!(d.summary(), "List a directory");
    }
}
