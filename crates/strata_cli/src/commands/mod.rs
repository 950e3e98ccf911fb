//! Command dispatch.

mod server;
mod tools;

use std::path::PathBuf;

use anyhow::Result;

use crate::cli::{Cli, Command};

/// Default config location, overridable with `--config`.
fn config_path(override_path: Option<&str>) -> PathBuf {
    match override_path {
        Some(path) => PathBuf::from(path),
        None => dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("strata")
            .join("servers.toml"),
    }
}

pub async fn handle(cli: Cli) -> Result<()> {
    let path = config_path(cli.config.as_deref());
    match cli.command {
        Command::Server { action } => server::handle(path, action).await,
        Command::Tools { action } => tools::handle(path, action).await,
    }
}
