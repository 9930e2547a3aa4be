//! # envgate
//!
//! An environment-aware reverse proxy gateway that fronts a set of
//! internal HTTP services behind bearer-token authentication.
//!
//! ## Architecture
//!
//! ```text
//! Client → Auth → Traffic Log Middleware → Forwarder ─→ Upstream
//!                                        └→ Composite Orchestrator
//! ```
//!
//! ## Core Features
//!
//! - **Endpoint registry**: typed catalog loaded from a directory tree
//!   of JSON files; the endpoint name is its parent directory
//! - **Proxy forwarding**: `/api/{env}/{endpoint}/{remainder?}` with
//!   header policy, streamed bodies, and verbatim upstream relay
//! - **URL rewriting**: XML and text response bodies lose their internal
//!   upstream URLs in favor of proxy URLs
//! - **Composite workflows**: `/api/{env}/composite/{name}` runs named
//!   multi-step orchestrations with template-threaded payloads
//! - **Traffic logging**: bounded drop-oldest queue, batched background
//!   writer, file or SQLite storage
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use envgate::{Gateway, config::Settings, registry::EndpointRegistry};
//! use envgate::auth::{PermissiveUrlCheck, StaticTokenVerifier};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> envgate::Result<()> {
//!     let settings = Settings::from_file("environments/settings.json").await?;
//!     let registry = EndpointRegistry::load("endpoints")?;
//!     let gateway = Gateway::new(
//!         settings,
//!         registry,
//!         Arc::new(StaticTokenVerifier::from_file("tokens.json")?),
//!         Arc::new(PermissiveUrlCheck),
//!     )?;
//!     gateway.start().await?;
//!     gateway.wait_for_shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod composite;
pub mod config;
pub mod error;
pub mod gateway;
pub mod proxy;
pub mod registry;
pub mod rewrite;
pub(crate) mod server;
pub mod traffic;

// Re-export main types
pub use error::{GatewayError, Result};
pub use gateway::Gateway;

use serde::{Deserialize, Serialize};

/// Gateway runtime state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[derive(Default)]
pub enum GatewayState {
    /// Gateway has been created but not yet started
    #[default]
    Created,
    /// Gateway is loading configuration and binding its listener
    Starting,
    /// Gateway is actively accepting and proxying requests
    Running,
    /// Gateway is draining the traffic log and shutting down
    Stopping,
    /// Gateway has fully stopped
    Stopped,
}

impl std::fmt::Display for GatewayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_state_default() {
        let state = GatewayState::default();
        assert_eq!(state, GatewayState::Created);
    }

    #[test]
    fn test_gateway_state_display() {
        assert_eq!(GatewayState::Created.to_string(), "created");
        assert_eq!(GatewayState::Starting.to_string(), "starting");
        assert_eq!(GatewayState::Running.to_string(), "running");
        assert_eq!(GatewayState::Stopping.to_string(), "stopping");
        assert_eq!(GatewayState::Stopped.to_string(), "stopped");
    }

    #[test]
    fn test_gateway_state_serialization() {
        let state = GatewayState::Running;
        let json = serde_json::to_string(&state).unwrap();
        let parsed: GatewayState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, GatewayState::Running);
    }
}
