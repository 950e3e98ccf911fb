//! CLI argument definitions using clap derive macros.

use clap::{Parser, Subcommand, ValueEnum};

/// Multi-server tool aggregation gateway
#[derive(Parser)]
#[command(name = "strata", about, version, propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Server config file (default: <config dir>/strata/servers.toml)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Output format: text (human-readable) or json (machine-readable)
    #[arg(short, long, global = true, default_value = "text")]
    pub output: OutputFormat,
}

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum OutputFormat {
    /// Colored terminal output for humans
    #[default]
    Text,
    /// Structured JSON for machine consumption
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Manage downstream server configurations
    Server {
        #[command(subcommand)]
        action: ServerAction,
    },
    /// Discover and execute downstream actions
    Tools {
        #[command(subcommand)]
        action: ToolsAction,
    },
}

#[derive(Subcommand)]
pub enum ServerAction {
    /// Add a downstream server (local command or remote URL)
    Add {
        /// Unique server name
        name: String,
        /// Transport: stdio, sse, http, http_oauth (default: inferred)
        #[arg(short = 't', long)]
        transport: Option<String>,
        /// Command to start a local server (stdio)
        #[arg(short, long)]
        command: Option<String>,
        /// URL of a remote server (sse/http/http_oauth)
        #[arg(short, long)]
        url: Option<String>,
        /// Command-line arguments for a local server
        #[arg(short, long)]
        args: Vec<String>,
        /// Environment variables for a local server (KEY=VALUE)
        #[arg(short = 'e', long)]
        env: Vec<String>,
        /// Extra HTTP headers (NAME=VALUE)
        #[arg(long)]
        header: Vec<String>,
        /// Static auth type (bearer, api_key)
        #[arg(long)]
        auth_type: Option<String>,
        /// Static auth token ($ENV_VAR references are resolved at connect time)
        #[arg(long)]
        auth_token: Option<String>,
        /// OAuth token endpoint (http_oauth)
        #[arg(long)]
        token_url: Option<String>,
        /// OAuth client id (http_oauth)
        #[arg(long)]
        client_id: Option<String>,
        /// OAuth authorization URL shown on auth failures (http_oauth)
        #[arg(long)]
        authorization_url: Option<String>,
        /// OAuth refresh token (http_oauth)
        #[arg(long)]
        refresh_token: Option<String>,
        /// Per-server call timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Add the server without enabling it
        #[arg(long)]
        disabled: bool,
    },

    /// Remove a server configuration
    Remove {
        /// Server name
        name: String,
    },

    /// Enable a server
    Enable {
        /// Server name
        name: String,
    },

    /// Disable a server
    Disable {
        /// Server name
        name: String,
    },

    /// List configured servers with live state
    List,

    /// Probe a server: connect, handshake, count actions, disconnect
    Test {
        /// Server name
        name: String,
    },
}

#[derive(Subcommand)]
pub enum ToolsAction {
    /// Discover servers and actions (optionally filtered or searched)
    Discover {
        /// Limit to one server
        #[arg(short, long)]
        server: Option<String>,
        /// Search action names and descriptions
        #[arg(short, long)]
        query: Option<String>,
    },

    /// Show one action's full descriptor and parameter schema
    Info {
        /// Server name
        server: String,
        /// Action name
        action: String,
    },

    /// Execute an action and print the outcome envelope
    Exec {
        /// Server name
        server: String,
        /// Action name
        action: String,
        /// JSON arguments
        #[arg(short, long, default_value = "{}")]
        args: String,
    },

    /// Search downstream documentation for a term
    SearchDocs {
        /// Term to search for
        term: String,
    },
}
