//! Authentication and URL-safety seams
//!
//! The gateway consumes two opaque collaborators: a bearer-token
//! verifier and an upstream-URL safety check. Both are traits so
//! deployments can plug in their own token store or SSRF validator;
//! working in-tree defaults cover development and tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;

use crate::error::{GatewayError, Result};

/// Identity established for a verified bearer token
#[derive(Debug, Clone)]
pub struct TokenIdentity {
    /// Username attached to the token, when the store knows one
    pub username: Option<String>,
}

/// Verifies opaque bearer tokens
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// `None` means the token is unknown; the request gets a 403
    async fn verify(&self, token: &str) -> Option<TokenIdentity>;
}

/// Vets computed upstream URLs before dispatch
pub trait UrlSafetyCheck: Send + Sync {
    /// Whether the gateway may call this URL
    fn is_allowed(&self, url: &url::Url) -> bool;
}

/// Token verifier over a fixed token → username map
pub struct StaticTokenVerifier {
    tokens: HashMap<String, String>,
}

impl StaticTokenVerifier {
    /// Build from an in-memory map
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }

    /// A verifier that rejects every token
    pub fn deny_all() -> Self {
        Self {
            tokens: HashMap::new(),
        }
    }

    /// Load from a JSON file shaped `{ "<token>": "<username>" }`
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::Config(format!(
                "Failed to read token file {}: {}",
                path.display(),
                e
            ))
        })?;
        let tokens: HashMap<String, String> = serde_json::from_str(&content)
            .map_err(|e| GatewayError::Config(format!("Failed to parse token file: {}", e)))?;
        tracing::info!(tokens = tokens.len(), "Token store loaded");
        Ok(Self { tokens })
    }
}

#[async_trait]
impl TokenVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> Option<TokenIdentity> {
        self.tokens.get(token).map(|username| TokenIdentity {
            username: if username.is_empty() {
                None
            } else {
                Some(username.clone())
            },
        })
    }
}

/// Safety check that allows every upstream URL
pub struct PermissiveUrlCheck;

impl UrlSafetyCheck for PermissiveUrlCheck {
    fn is_allowed(&self, _url: &url::Url) -> bool {
        true
    }
}

/// Extract the bearer token from an Authorization header, if present
pub fn bearer_token(headers: &http::HeaderMap) -> Option<&str> {
    let value = headers.get(http::header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}
