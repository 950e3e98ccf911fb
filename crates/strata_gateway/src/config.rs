//! Server configuration and the durable Config Store.
//!
//! The store is a TOML file mapping server name to its transport, enablement
//! flag, and connection parameters. Nothing derived (catalog entries,
//! connection state) is ever persisted, so load → save → load is stable.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default per-call time budget when a server sets no `timeout_ms`.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Invalid server config for '{name}': {message}")]
    Invalid { name: String, message: String },
}

// ── Transport kind ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Child process speaking newline-delimited JSON-RPC over stdio.
    Stdio,
    /// HTTP POST against a message endpoint, responses as event streams.
    Sse,
    /// Plain JSON-over-HTTP POST.
    Http,
    /// HTTP with OAuth bearer tokens refreshed by the gateway.
    HttpOauth,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Stdio => "stdio",
            TransportKind::Sse => "sse",
            TransportKind::Http => "http",
            TransportKind::HttpOauth => "http_oauth",
        }
    }

    /// True for the HTTP-family kinds that require a `url`.
    pub fn is_remote(&self) -> bool {
        !matches!(self, TransportKind::Stdio)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stdio" => Ok(TransportKind::Stdio),
            "sse" => Ok(TransportKind::Sse),
            "http" => Ok(TransportKind::Http),
            "http_oauth" | "http-oauth" => Ok(TransportKind::HttpOauth),
            other => Err(format!("unknown transport kind: {other}")),
        }
    }
}

// ── Auth ───────────────────────────────────────────────────────────

/// Static authentication attached to outgoing HTTP requests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthConfig {
    /// "bearer" or "api_key".
    pub auth_type: String,
    /// Raw token, or `$VAR_NAME` to read it from the environment at
    /// connect time so secrets stay out of the config file.
    pub token: String,
    /// Header carrying the credential for `api_key` auth.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
}

impl AuthConfig {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            auth_type: "bearer".to_string(),
            token: token.into(),
            header: None,
        }
    }

    pub fn api_key(token: impl Into<String>, header: impl Into<String>) -> Self {
        Self {
            auth_type: "api_key".to_string(),
            token: token.into(),
            header: Some(header.into()),
        }
    }

    /// Resolves `$VAR_NAME` references against the environment.
    pub fn resolve_token(&self) -> Result<String, ConfigError> {
        if let Some(var_name) = self.token.strip_prefix('$') {
            std::env::var(var_name).map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))
        } else {
            Ok(self.token.clone())
        }
    }

    pub fn header_name(&self) -> &str {
        match self.auth_type.as_str() {
            "api_key" => self.header.as_deref().unwrap_or("X-Api-Key"),
            _ => "Authorization",
        }
    }

    /// The full header value, with the bearer prefix when applicable.
    pub fn header_value(&self) -> Result<String, ConfigError> {
        let token = self.resolve_token()?;
        match self.auth_type.as_str() {
            "bearer" => Ok(format!("Bearer {token}")),
            _ => Ok(token),
        }
    }
}

/// OAuth state for `http_oauth` servers. The gateway only consumes tokens
/// minted elsewhere; it refreshes them but never drives a provider flow.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OauthParams {
    /// Token endpoint used for `grant_type=refresh_token` exchanges.
    pub token_url: String,
    pub client_id: String,
    /// Where a human re-authorizes when refresh is no longer possible.
    pub authorization_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Access token expiry as unix seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
}

impl OauthParams {
    /// Whether the stored access token is missing or within `leeway` of
    /// expiry. No recorded expiry means the token is assumed live.
    pub fn needs_refresh(&self, leeway: Duration) -> bool {
        if self.access_token.is_none() {
            return true;
        }
        match self.expires_at {
            Some(expires_at) => {
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or(Duration::ZERO)
                    .as_secs();
                now + leeway.as_secs() >= expires_at
            }
            None => false,
        }
    }
}

// ── Connection parameters ──────────────────────────────────────────

/// Transport-specific connection details. Which fields matter depends on
/// the transport kind; `ServerConfig::validate` enforces the pairing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConnectionParams {
    // stdio
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,

    // HTTP family
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth: Option<OauthParams>,

    /// Per-server override of the downstream call budget.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl ConnectionParams {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS))
    }
}

// ── Server config ──────────────────────────────────────────────────

/// Everything the gateway knows about one downstream server. The name is
/// the config-store key and is not serialized into the entry itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(skip)]
    pub name: String,
    pub transport: TransportKind,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub params: ConnectionParams,
}

fn default_enabled() -> bool {
    true
}

impl ServerConfig {
    pub fn stdio(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport: TransportKind::Stdio,
            enabled: true,
            params: ConnectionParams {
                command: Some(command.into()),
                ..Default::default()
            },
        }
    }

    pub fn http(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport: TransportKind::Http,
            enabled: true,
            params: ConnectionParams {
                url: Some(url.into()),
                ..Default::default()
            },
        }
    }

    pub fn sse(name: impl Into<String>, url: impl Into<String>) -> Self {
        let mut config = Self::http(name, url);
        config.transport = TransportKind::Sse;
        config
    }

    pub fn http_oauth(name: impl Into<String>, url: impl Into<String>, oauth: OauthParams) -> Self {
        let mut config = Self::http(name, url);
        config.transport = TransportKind::HttpOauth;
        config.params.oauth = Some(oauth);
        config
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.params.args = args;
        self
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.params.env = env;
        self
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.params.headers = headers;
        self
    }

    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.params.auth = Some(auth);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.params.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Checks that the params match the transport kind.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |message: &str| {
            Err(ConfigError::Invalid {
                name: self.name.clone(),
                message: message.to_string(),
            })
        };
        if self.name.is_empty() {
            return fail("server name must not be empty");
        }
        match self.transport {
            TransportKind::Stdio => {
                if self.params.command.is_none() {
                    return fail("stdio transport requires a command");
                }
            }
            TransportKind::Sse | TransportKind::Http => {
                if self.params.url.is_none() {
                    return fail("remote transport requires a url");
                }
            }
            TransportKind::HttpOauth => {
                if self.params.url.is_none() {
                    return fail("remote transport requires a url");
                }
                match &self.params.oauth {
                    None => return fail("http_oauth transport requires oauth params"),
                    Some(oauth) if oauth.token_url.is_empty() => {
                        return fail("oauth params require a token_url")
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(())
    }
}

// ── Config store ───────────────────────────────────────────────────

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredConfig {
    #[serde(default)]
    servers: BTreeMap<String, ServerConfig>,
}

/// Load/save snapshots of the server map against a TOML file. Callers own
/// the in-memory map; the store never caches.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the full server map. A missing file is an empty map, not an
    /// error, so first launch needs no setup step.
    pub fn load(&self) -> Result<BTreeMap<String, ServerConfig>, ConfigError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let raw = std::fs::read_to_string(&self.path)?;
        let stored: StoredConfig = toml::from_str(&raw)?;
        let mut servers = stored.servers;
        for (name, config) in servers.iter_mut() {
            config.name = name.clone();
        }
        Ok(servers)
    }

    /// Writes the full server map, creating parent directories as needed.
    pub fn save(&self, servers: &BTreeMap<String, ServerConfig>) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let stored = StoredConfig {
            servers: servers.clone(),
        };
        let raw = toml::to_string_pretty(&stored)?;
        std::fs::write(&self.path, raw)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_kind_round_trips_through_str() {
        for kind in [
            TransportKind::Stdio,
            TransportKind::Sse,
            TransportKind::Http,
            TransportKind::HttpOauth,
        ] {
            assert_eq!(kind.as_str().parse::<TransportKind>().unwrap(), kind);
        }
        assert!("carrier_pigeon".parse::<TransportKind>().is_err());
    }

    #[test]
    fn auth_token_env_interpolation() {
        std::env::set_var("STRATA_TEST_TOKEN", "sekrit");
        let auth = AuthConfig::bearer("$STRATA_TEST_TOKEN");
        assert_eq!(auth.resolve_token().unwrap(), "sekrit");
        assert_eq!(auth.header_value().unwrap(), "Bearer sekrit");

        let missing = AuthConfig::bearer("$STRATA_TEST_TOKEN_MISSING");
        assert!(matches!(
            missing.resolve_token(),
            Err(ConfigError::EnvVarNotFound(_))
        ));

        let literal = AuthConfig::api_key("abc123", "X-Custom-Key");
        assert_eq!(literal.header_name(), "X-Custom-Key");
        assert_eq!(literal.header_value().unwrap(), "abc123");
    }

    #[test]
    fn validate_pairs_params_with_transport() {
        assert!(ServerConfig::stdio("files", "files-mcp").validate().is_ok());

        let mut no_command = ServerConfig::stdio("files", "files-mcp");
        no_command.params.command = None;
        assert!(no_command.validate().is_err());

        let mut no_url = ServerConfig::http("search", "http://localhost:9000");
        no_url.params.url = None;
        assert!(no_url.validate().is_err());

        let no_oauth = ServerConfig {
            name: "linear".to_string(),
            transport: TransportKind::HttpOauth,
            enabled: true,
            params: ConnectionParams {
                url: Some("https://mcp.example.com".to_string()),
                ..Default::default()
            },
        };
        assert!(no_oauth.validate().is_err());
    }

    #[test]
    fn oauth_refresh_window() {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();

        let mut oauth = OauthParams {
            token_url: "https://auth.example.com/token".to_string(),
            client_id: "strata".to_string(),
            authorization_url: "https://auth.example.com/authorize".to_string(),
            access_token: Some("tok".to_string()),
            refresh_token: Some("ref".to_string()),
            expires_at: Some(now + 3600),
        };
        assert!(!oauth.needs_refresh(Duration::from_secs(30)));

        oauth.expires_at = Some(now.saturating_sub(10));
        assert!(oauth.needs_refresh(Duration::from_secs(30)));

        oauth.access_token = None;
        oauth.expires_at = None;
        assert!(oauth.needs_refresh(Duration::from_secs(30)));
    }

    #[test]
    fn store_round_trip_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("servers.toml"));

        // Missing file reads as empty.
        assert!(store.load().unwrap().is_empty());

        let mut servers = BTreeMap::new();
        servers.insert(
            "files".to_string(),
            ServerConfig::stdio("files", "files-mcp")
                .with_args(vec!["--stdio".to_string()])
                .with_timeout_ms(5_000),
        );
        servers.insert(
            "search".to_string(),
            ServerConfig::http("search", "http://localhost:9000/rpc")
                .with_auth(AuthConfig::bearer("$SEARCH_TOKEN"))
                .disabled(),
        );
        servers.insert(
            "linear".to_string(),
            ServerConfig::http_oauth(
                "linear",
                "https://mcp.linear.dev",
                OauthParams {
                    token_url: "https://auth.linear.dev/token".to_string(),
                    client_id: "strata".to_string(),
                    authorization_url: "https://auth.linear.dev/authorize".to_string(),
                    refresh_token: Some("r-1".to_string()),
                    ..Default::default()
                },
            ),
        );

        store.save(&servers).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded, servers);

        // Save the loaded snapshot and confirm the file content is stable.
        let first = std::fs::read_to_string(store.path()).unwrap();
        store.save(&loaded).unwrap();
        let second = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(first, second);

        // Raw token values never change shape on disk.
        assert!(first.contains("$SEARCH_TOKEN"));
    }
}
