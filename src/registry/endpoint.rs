//! Endpoint catalog data model

use serde::Deserialize;
use std::collections::{HashMap, HashSet};

/// Endpoint classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EndpointKind {
    /// Directly callable proxy endpoint
    #[default]
    Standard,
    /// Multi-step workflow entry
    Composite,
    /// Registry-visible but not directly callable
    Private,
}

impl EndpointKind {
    /// Parse the `Type` field of an endpoint file, case-insensitive
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "standard" => Some(Self::Standard),
            "composite" => Some(Self::Composite),
            "private" => Some(Self::Private),
            _ => None,
        }
    }
}

/// A named, method-filtered proxy to a single upstream URL
///
/// Constructed during registry load and immutable for the process lifetime.
#[derive(Debug, Clone)]
pub struct EndpointDefinition {
    /// Endpoint name, derived from the parent directory of its file
    pub name: String,
    /// Absolute upstream base URL
    pub url: String,
    /// Allowed HTTP method tokens, stored uppercase
    pub methods: HashSet<String>,
    /// Endpoint classification
    pub kind: EndpointKind,
    /// Private endpoints exist for composites but reject direct calls
    pub is_private: bool,
    /// Workflow definition, required when `kind` is Composite
    pub composite: Option<CompositeDefinition>,
}

impl EndpointDefinition {
    /// Check whether a method token is in the allowed set, case-insensitive
    pub fn allows_method(&self, method: &str) -> bool {
        self.methods.contains(&method.to_ascii_uppercase())
    }

    /// Whether `/api/{env}/{name}` may hit this endpoint directly
    pub fn directly_callable(&self) -> bool {
        !self.is_private && self.kind != EndpointKind::Composite
    }

    /// Whether this endpoint carries a composite workflow
    pub fn is_composite(&self) -> bool {
        self.kind == EndpointKind::Composite || self.composite.is_some()
    }
}

/// A named, ordered workflow of proxied steps
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CompositeDefinition {
    /// Workflow name
    #[serde(default)]
    pub name: String,
    /// Human-readable description
    #[serde(default)]
    pub description: String,
    /// Steps, executed sequentially in declared order
    #[serde(default)]
    pub steps: Vec<CompositeStep>,
}

/// One step of a composite workflow
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CompositeStep {
    /// Step name, unique within the workflow
    pub name: String,
    /// Registry endpoint this step calls
    pub endpoint: String,
    /// HTTP method for the call; must be allowed by the endpoint
    pub method: String,
    /// Use the named prior step's result as this step's payload
    #[serde(default)]
    pub depends_on: Option<String>,
    /// Fan out over a request array, one call per element
    #[serde(default)]
    pub is_array: bool,
    /// Request property holding the fan-out array
    #[serde(default)]
    pub array_property: Option<String>,
    /// Request property to use as the payload
    #[serde(default)]
    pub source_property: Option<String>,
    /// Target field → template expression applied before dispatch
    #[serde(default)]
    pub template_transformations: HashMap<String, String>,
}
