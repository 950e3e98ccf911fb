//! Auth-failure remediation.
//!
//! When a downstream rejects our credentials the caller gets a concrete
//! next step along with the error. For OAuth servers that step includes
//! the authorization URL a human can visit; the gateway itself never
//! drives the provider flow.

use serde::Serialize;

use crate::config::{ServerConfig, TransportKind};

#[derive(Debug, Clone, Serialize)]
pub struct RemediationPayload {
    pub server: String,
    pub remediation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization_url: Option<String>,
}

/// Builds the remediation hint for a server whose credentials were
/// rejected.
pub fn remediation_for(config: &ServerConfig) -> RemediationPayload {
    match config.transport {
        TransportKind::HttpOauth => {
            let authorization_url = config
                .params
                .oauth
                .as_ref()
                .map(|o| o.authorization_url.clone())
                .filter(|url| !url.is_empty());
            RemediationPayload {
                server: config.name.clone(),
                remediation: format!(
                    "authorization for '{}' has expired or was revoked; re-authorize at the authorization URL, then retry",
                    config.name
                ),
                authorization_url,
            }
        }
        TransportKind::Http | TransportKind::Sse if config.params.auth.is_some() => {
            RemediationPayload {
                server: config.name.clone(),
                remediation: format!(
                    "the configured credential for '{}' was rejected; update its token (or the environment variable it references) and reconnect",
                    config.name
                ),
                authorization_url: None,
            }
        }
        _ => RemediationPayload {
            server: config.name.clone(),
            remediation: format!(
                "server '{}' rejected the request as unauthenticated; check its configuration and reconnect",
                config.name
            ),
            authorization_url: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthConfig, OauthParams};

    #[test]
    fn oauth_remediation_carries_authorization_url() {
        let config = ServerConfig::http_oauth(
            "linear",
            "https://mcp.linear.dev",
            OauthParams {
                token_url: "https://auth.linear.dev/token".to_string(),
                client_id: "strata".to_string(),
                authorization_url: "https://auth.linear.dev/authorize".to_string(),
                ..Default::default()
            },
        );
        let payload = remediation_for(&config);
        assert_eq!(
            payload.authorization_url.as_deref(),
            Some("https://auth.linear.dev/authorize")
        );
        assert!(payload.remediation.contains("re-authorize"));
    }

    #[test]
    fn static_auth_remediation_points_at_the_token() {
        let config = ServerConfig::http("search", "http://localhost:9000/rpc")
            .with_auth(AuthConfig::bearer("$SEARCH_TOKEN"));
        let payload = remediation_for(&config);
        assert!(payload.authorization_url.is_none());
        assert!(payload.remediation.contains("token"));
    }

    #[test]
    fn unauthenticated_transports_get_a_generic_hint() {
        let config = ServerConfig::stdio("files", "files-mcp");
        let payload = remediation_for(&config);
        assert!(payload.authorization_url.is_none());
        assert!(payload.remediation.contains("files"));
    }
}
