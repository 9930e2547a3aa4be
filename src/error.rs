//! Centralized error types for envgate

use http::StatusCode;
use thiserror::Error;

/// Gateway error types
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Configuration file parsing or validation failed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Endpoint registry loading failed
    #[error("Registry error: {0}")]
    Registry(String),

    /// Environment label is not in the allow-list
    #[error("Environment '{0}' is not allowed.")]
    EnvironmentNotAllowed(String),

    /// No endpoint name could be extracted from the request path
    #[error("No endpoint name in request path")]
    MissingEndpointName,

    /// Endpoint name is missing or unknown
    #[error("Endpoint '{0}' not found")]
    EndpointNotFound(String),

    /// Endpoint exists but is private or composite-only
    #[error("Endpoint not accessible directly")]
    EndpointNotAccessible,

    /// HTTP method is not in the endpoint's allowed set
    #[error("Method '{method}' not allowed for endpoint '{endpoint}'")]
    MethodNotAllowed { method: String, endpoint: String },

    /// Computed upstream URL failed the safety check. The URL stays out
    /// of the client-facing message; it names internal hosts.
    #[error("Upstream URL not allowed")]
    UnsafeUrl(String),

    /// Composite step failed; `details` carries the upstream status and
    /// body for the error envelope
    #[error("Composite step '{step}' failed: {message}")]
    CompositeStep {
        step: String,
        message: String,
        details: serde_json::Value,
    },

    /// Upstream HTTP request or response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Traffic log storage error
    #[error("Traffic log storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl GatewayError {
    /// HTTP status surfaced to callers for this error. Anything not in
    /// the caller-visible taxonomy maps to a generic 500.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::EnvironmentNotAllowed(_) | Self::MissingEndpointName => StatusCode::BAD_REQUEST,
            Self::EndpointNotFound(_) => StatusCode::NOT_FOUND,
            Self::EndpointNotAccessible | Self::UnsafeUrl(_) => StatusCode::FORBIDDEN,
            Self::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            Self::CompositeStep { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Convenience Result type alias
pub type Result<T> = std::result::Result<T, GatewayError>;
