//! Server management commands.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use strata_gateway::{AuthConfig, OauthParams, ServerConfig, Strata, TransportKind};

use crate::cli::ServerAction;
use crate::output;

pub async fn handle(config_path: PathBuf, action: ServerAction) -> Result<()> {
    let strata = Strata::load(config_path)?;

    match action {
        ServerAction::Add {
            name,
            transport,
            command,
            url,
            args,
            env,
            header,
            auth_type,
            auth_token,
            token_url,
            client_id,
            authorization_url,
            refresh_token,
            timeout_ms,
            disabled,
        } => {
            let config = build_config(
                name,
                transport,
                command,
                url,
                args,
                env,
                header,
                auth_type,
                auth_token,
                token_url,
                client_id,
                authorization_url,
                refresh_token,
                timeout_ms,
                disabled,
            )?;
            let name = config.name.clone();
            let transport = config.transport;
            strata.add_server(config).await?;
            output::success(&format!("Added server: {name} ({transport})"));
            output::dim(&format!("Check it with: strata server test {name}"));
        }
        ServerAction::Remove { name } => {
            strata.remove_server(&name).await?;
            output::success(&format!("Removed server: {name}"));
        }
        ServerAction::Enable { name } => {
            strata.set_enabled(&name, true).await?;
            output::success(&format!("Enabled server: {name}"));
        }
        ServerAction::Disable { name } => {
            strata.set_enabled(&name, false).await?;
            output::success(&format!("Disabled server: {name}"));
        }
        ServerAction::List => {
            let servers = strata.list_servers().await;
            if servers.is_empty() {
                output::warning("No servers configured.");
                output::dim("Add one with: strata server add <name> --command <command>");
            } else {
                output::header("Configured servers");
                let mut table =
                    output::table(&["Name", "Transport", "Enabled", "State", "Actions"]);
                for server in &servers {
                    output::table_row(
                        &mut table,
                        &[
                            &server.name,
                            server.transport.as_str(),
                            if server.enabled { "yes" } else { "no" },
                            server.state.as_str(),
                            &server.actions.to_string(),
                        ],
                    );
                }
                output::table_print(&table, &servers);
            }
        }
        ServerAction::Test { name } => {
            let result = strata.test_server(&name).await?;
            if result.ok {
                output::success(&format!(
                    "Server '{name}' is reachable ({} actions)",
                    result.actions
                ));
            } else {
                return Err(anyhow!(
                    "server '{name}' failed the probe: {}",
                    result.message.unwrap_or_else(|| "unknown error".to_string())
                ));
            }
        }
    }

    strata.shutdown().await;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn build_config(
    name: String,
    transport: Option<String>,
    command: Option<String>,
    url: Option<String>,
    args: Vec<String>,
    env: Vec<String>,
    header: Vec<String>,
    auth_type: Option<String>,
    auth_token: Option<String>,
    token_url: Option<String>,
    client_id: Option<String>,
    authorization_url: Option<String>,
    refresh_token: Option<String>,
    timeout_ms: Option<u64>,
    disabled: bool,
) -> Result<ServerConfig> {
    match (&command, &url) {
        (Some(_), Some(_)) => {
            return Err(anyhow!(
                "cannot specify both --command and --url; use --command for local servers, --url for remote servers"
            ));
        }
        (None, None) => {
            return Err(anyhow!(
                "either --command (local server) or --url (remote server) is required"
            ));
        }
        _ => {}
    }

    let kind = match transport.as_deref() {
        Some(name) => name
            .parse::<TransportKind>()
            .map_err(|e| anyhow!("{e}; expected stdio, sse, http, or http_oauth"))?,
        // Infer: a command means stdio; OAuth details mean http_oauth;
        // a bare URL means plain http.
        None if command.is_some() => TransportKind::Stdio,
        None if token_url.is_some() => TransportKind::HttpOauth,
        None => TransportKind::Http,
    };

    let mut config = match kind {
        TransportKind::Stdio => {
            let command = command.ok_or_else(|| anyhow!("stdio transport requires --command"))?;
            ServerConfig::stdio(name, command)
                .with_args(args)
                .with_env(parse_pairs(env, "--env")?)
        }
        TransportKind::Http => {
            let url = url.ok_or_else(|| anyhow!("http transport requires --url"))?;
            ServerConfig::http(name, url)
        }
        TransportKind::Sse => {
            let url = url.ok_or_else(|| anyhow!("sse transport requires --url"))?;
            ServerConfig::sse(name, url)
        }
        TransportKind::HttpOauth => {
            let url = url.ok_or_else(|| anyhow!("http_oauth transport requires --url"))?;
            let oauth = OauthParams {
                token_url: token_url
                    .ok_or_else(|| anyhow!("http_oauth transport requires --token-url"))?,
                client_id: client_id
                    .ok_or_else(|| anyhow!("http_oauth transport requires --client-id"))?,
                authorization_url: authorization_url
                    .ok_or_else(|| anyhow!("http_oauth transport requires --authorization-url"))?,
                access_token: None,
                refresh_token,
                expires_at: None,
            };
            ServerConfig::http_oauth(name, url, oauth)
        }
    };

    let headers = parse_pairs(header, "--header")?;
    if !headers.is_empty() {
        config = config.with_headers(headers);
    }

    match (auth_type, auth_token) {
        (Some(auth_type), Some(token)) => {
            let auth = match auth_type.as_str() {
                "bearer" => AuthConfig::bearer(token),
                "api_key" => AuthConfig::api_key(token, "X-Api-Key"),
                other => return Err(anyhow!("invalid auth type '{other}'; expected bearer or api_key")),
            };
            config = config.with_auth(auth);
        }
        (Some(_), None) => {
            return Err(anyhow!("--auth-token is required when --auth-type is provided"));
        }
        (None, Some(_)) => {
            return Err(anyhow!("--auth-type is required when --auth-token is provided"));
        }
        (None, None) => {}
    }

    if let Some(timeout_ms) = timeout_ms {
        config = config.with_timeout_ms(timeout_ms);
    }
    if disabled {
        config = config.disabled();
    }
    Ok(config)
}

fn parse_pairs(pairs: Vec<String>, flag: &str) -> Result<HashMap<String, String>> {
    let mut map = HashMap::new();
    for pair in pairs {
        match pair.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                map.insert(key.to_string(), value.to_string());
            }
            _ => return Err(anyhow!("invalid {flag} value '{pair}'; expected KEY=VALUE")),
        }
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_defaults() -> (
        Option<String>,
        Vec<String>,
        Vec<String>,
        Vec<String>,
        Option<String>,
        Option<String>,
    ) {
        (None, Vec::new(), Vec::new(), Vec::new(), None, None)
    }

    #[test]
    fn stdio_is_inferred_from_command() {
        let (transport, args, env, header, auth_type, auth_token) = add_defaults();
        let config = build_config(
            "files".to_string(),
            transport,
            Some("files-mcp".to_string()),
            None,
            args,
            env,
            header,
            auth_type,
            auth_token,
            None,
            None,
            None,
            None,
            Some(5_000),
            false,
        )
        .unwrap();
        assert_eq!(config.transport, TransportKind::Stdio);
        assert_eq!(config.params.timeout_ms, Some(5_000));
    }

    #[test]
    fn oauth_requires_the_full_flag_set() {
        let (_, args, env, header, auth_type, auth_token) = add_defaults();
        let missing = build_config(
            "linear".to_string(),
            Some("http_oauth".to_string()),
            None,
            Some("https://mcp.linear.dev".to_string()),
            args,
            env,
            header,
            auth_type,
            auth_token,
            None,
            None,
            None,
            None,
            None,
            false,
        );
        assert!(missing.is_err());
    }

    #[test]
    fn command_and_url_are_mutually_exclusive() {
        let (transport, args, env, header, auth_type, auth_token) = add_defaults();
        let both = build_config(
            "x".to_string(),
            transport,
            Some("cmd".to_string()),
            Some("http://h".to_string()),
            args,
            env,
            header,
            auth_type,
            auth_token,
            None,
            None,
            None,
            None,
            None,
            false,
        );
        assert!(both.is_err());
    }

    #[test]
    fn pair_parsing() {
        let parsed = parse_pairs(vec!["A=1".to_string(), "B=x=y".to_string()], "--env").unwrap();
        assert_eq!(parsed["A"], "1");
        assert_eq!(parsed["B"], "x=y");
        assert!(parse_pairs(vec!["broken".to_string()], "--env").is_err());
    }
}
