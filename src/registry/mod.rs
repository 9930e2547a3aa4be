//! Endpoint registry — typed catalog of proxy endpoints
//!
//! Endpoint definitions live in a directory tree as JSON files; the
//! endpoint name is the immediate parent directory of each file, which
//! keeps the registry compatible with existing deployment layouts. The
//! registry is loaded once at startup and read-only thereafter.

mod endpoint;

pub use endpoint::{CompositeDefinition, CompositeStep, EndpointDefinition, EndpointKind};

use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{GatewayError, Result};

/// Raw shape of an endpoint JSON file
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EndpointFile {
    #[serde(default)]
    url: String,
    #[serde(default)]
    methods: Vec<String>,
    #[serde(default, rename = "Type")]
    kind: Option<String>,
    #[serde(default)]
    is_private: bool,
    #[serde(default)]
    composite_config: Option<CompositeDefinition>,
}

/// Case-insensitive mapping from endpoint name to definition
pub struct EndpointRegistry {
    /// Keyed by lowercased endpoint name
    endpoints: HashMap<String, EndpointDefinition>,
}

impl EndpointRegistry {
    /// Load the registry from a directory tree.
    ///
    /// A missing root is created. An empty registry is seeded with two
    /// sample definitions and reloaded so a fresh install has something
    /// to serve.
    pub fn load(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        if !root.exists() {
            fs::create_dir_all(root)?;
            tracing::warn!(root = %root.display(), "Endpoint directory missing, created");
        }

        let mut registry = Self::scan(root);
        if registry.is_empty() {
            tracing::warn!(
                root = %root.display(),
                "No endpoint definitions found, seeding samples"
            );
            match Self::seed_samples(root) {
                Ok(()) => registry = Self::scan(root),
                Err(e) => {
                    tracing::error!(root = %root.display(), error = %e, "Failed to seed sample endpoints");
                }
            }
        }

        tracing::info!(
            endpoints = registry.len(),
            composites = registry.composites().len(),
            "Endpoint registry loaded"
        );
        Ok(registry)
    }

    /// Build an empty registry
    pub fn empty() -> Self {
        Self {
            endpoints: HashMap::new(),
        }
    }

    /// Scan a directory tree for endpoint files. Per-file errors are
    /// logged and skipped; an unreadable root yields an empty registry.
    fn scan(root: &Path) -> Self {
        let mut files = Vec::new();
        if let Err(e) = collect_json_files(root, &mut files) {
            tracing::error!(root = %root.display(), error = %e, "Endpoint directory unreadable");
            return Self::empty();
        }
        // Deterministic load order; on name collision the later path wins
        files.sort();

        let mut endpoints: HashMap<String, EndpointDefinition> = HashMap::new();
        for path in &files {
            match load_endpoint_file(path) {
                Ok(def) => {
                    let key = def.name.to_ascii_lowercase();
                    if let Some(previous) = endpoints.insert(key, def) {
                        tracing::warn!(
                            endpoint = previous.name,
                            path = %path.display(),
                            "Duplicate endpoint name, later definition wins"
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping endpoint file");
                }
            }
        }

        // Composite closure: a composite whose steps are structurally
        // invalid or reference unknown endpoints is rejected wholesale.
        let known: HashSet<String> = endpoints.keys().cloned().collect();
        endpoints.retain(|_, def| match validate_composite(def, &known) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(endpoint = def.name, error = %e, "Rejecting composite endpoint");
                false
            }
        });

        Self { endpoints }
    }

    /// Look up an endpoint by name, case-insensitive
    pub fn get(&self, name: &str) -> Option<&EndpointDefinition> {
        self.endpoints.get(&name.to_ascii_lowercase())
    }

    /// All endpoints carrying a composite workflow
    pub fn composites(&self) -> Vec<&EndpointDefinition> {
        let mut list: Vec<&EndpointDefinition> = self
            .endpoints
            .values()
            .filter(|def| def.is_composite())
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    /// Number of registered endpoints
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Whether the registry holds no endpoints
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Sorted endpoint names, for startup logging
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.endpoints.values().map(|d| d.name.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Write one Standard and one Composite sample under the root
    fn seed_samples(root: &Path) -> Result<()> {
        let items_dir = root.join("SampleItems");
        fs::create_dir_all(&items_dir)?;
        fs::write(
            items_dir.join("endpoint.json"),
            r#"{
  "Url": "http://localhost:8020/api/items",
  "Methods": ["GET", "POST"]
}
"#,
        )?;

        let order_dir = root.join("SampleOrder");
        fs::create_dir_all(&order_dir)?;
        fs::write(
            order_dir.join("endpoint.json"),
            r#"{
  "Url": "http://localhost:8020/api/orders",
  "Methods": ["POST"],
  "Type": "Composite",
  "CompositeConfig": {
    "Name": "SampleOrder",
    "Description": "Create items, then confirm them as one order",
    "Steps": [
      {
        "Name": "CreateItems",
        "Endpoint": "SampleItems",
        "Method": "POST",
        "IsArray": true,
        "ArrayProperty": "Items",
        "TemplateTransformations": { "TransactionKey": "$guid" }
      },
      {
        "Name": "ConfirmOrder",
        "Endpoint": "SampleItems",
        "Method": "POST",
        "DependsOn": "CreateItems"
      }
    ]
  }
}
"#,
        )?;
        Ok(())
    }
}

/// Recursively collect regular `*.json` files under a directory
fn collect_json_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_json_files(&path, out)?;
        } else if path.extension().and_then(|e| e.to_str()) == Some("json") {
            out.push(path);
        }
    }
    Ok(())
}

/// Parse one endpoint file; the endpoint name is the parent directory name
fn load_endpoint_file(path: &Path) -> Result<EndpointDefinition> {
    let name = path
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            GatewayError::Registry(format!(
                "Cannot derive endpoint name from {}",
                path.display()
            ))
        })?
        .to_string();

    let content = fs::read_to_string(path)?;
    let raw: EndpointFile = serde_json::from_str(&content)?;

    if raw.url.trim().is_empty() {
        return Err(GatewayError::Registry(format!(
            "Endpoint '{}' has an empty Url",
            name
        )));
    }
    if raw.methods.is_empty() {
        return Err(GatewayError::Registry(format!(
            "Endpoint '{}' has no Methods",
            name
        )));
    }

    let kind = match raw.kind.as_deref() {
        None => EndpointKind::Standard,
        Some(value) => EndpointKind::parse(value).ok_or_else(|| {
            GatewayError::Registry(format!("Endpoint '{}' has unknown Type '{}'", name, value))
        })?,
    };

    Ok(EndpointDefinition {
        name,
        url: raw.url,
        methods: raw
            .methods
            .iter()
            .map(|m| m.to_ascii_uppercase())
            .collect(),
        kind,
        is_private: raw.is_private,
        composite: raw.composite_config,
    })
}

/// Structural validation of a composite definition against the full catalog
fn validate_composite(def: &EndpointDefinition, known: &HashSet<String>) -> Result<()> {
    if def.kind == EndpointKind::Composite && def.composite.is_none() {
        return Err(GatewayError::Registry(
            "Type is Composite but CompositeConfig is missing".to_string(),
        ));
    }

    let Some(composite) = &def.composite else {
        return Ok(());
    };

    if composite.steps.is_empty() {
        return Err(GatewayError::Registry(
            "CompositeConfig.Steps must not be empty".to_string(),
        ));
    }

    let mut seen: HashSet<&str> = HashSet::new();
    for step in &composite.steps {
        if !seen.insert(step.name.as_str()) {
            return Err(GatewayError::Registry(format!(
                "Duplicate step name '{}'",
                step.name
            )));
        }
        if !known.contains(&step.endpoint.to_ascii_lowercase()) {
            return Err(GatewayError::Registry(format!(
                "Step '{}' references unknown endpoint '{}'",
                step.name, step.endpoint
            )));
        }
        if let Some(dep) = &step.depends_on {
            // dependsOn must name an earlier step; `seen` already holds
            // this step's own name, so a self-reference is also caught
            if dep == &step.name || !seen.contains(dep.as_str()) {
                return Err(GatewayError::Registry(format!(
                    "Step '{}' depends on '{}' which is not an earlier step",
                    step.name, dep
                )));
            }
        }
        if step.is_array
            && step
                .array_property
                .as_deref()
                .map(|p| p.trim().is_empty())
                .unwrap_or(true)
        {
            return Err(GatewayError::Registry(format!(
                "Step '{}' fans out but has no ArrayProperty",
                step.name
            )));
        }
    }
    Ok(())
}
