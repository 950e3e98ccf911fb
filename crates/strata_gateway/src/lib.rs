//! Strata gateway core — one protocol endpoint fronting many downstream
//! tool servers.
//!
//! The crate is organized around a small pipeline:
//!
//! - [`config`] — durable server configuration (TOML) and connection params
//! - [`transport`] — one adapter per transport kind behind the [`transport::Transport`] trait
//! - [`connection`] — per-server connection lifecycle and state machine
//! - [`catalog`] — the aggregated action catalog built from live listings
//! - [`discovery`] / [`router`] — the agent-facing meta-operations
//! - [`gateway`] — the [`gateway::Strata`] orchestrator tying it together

pub mod auth;
pub mod catalog;
pub mod config;
pub mod connection;
pub mod discovery;
pub mod error;
pub mod gateway;
pub mod protocol;
pub mod router;
pub mod transport;

#[cfg(test)]
mod tests;

pub use catalog::{ActionDescriptor, ToolCatalog};
pub use config::{AuthConfig, ConfigStore, ConnectionParams, OauthParams, ServerConfig, TransportKind};
pub use connection::{ConnectionManager, ConnectionState, ConnectionStatus};
pub use error::{GatewayError, GatewayResult};
pub use gateway::{ServerOverview, ServerTestResult, Strata};
