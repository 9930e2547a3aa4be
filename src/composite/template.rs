//! Template expressions for composite step payloads
//!
//! A transformation value is one of a small set of tagged prefixes
//! (`$guid`, `$requestid`, `$context.<var>`, `$prev.<step>.<path>`);
//! anything else is a literal written through unchanged.

use serde_json::{Map, Value};
use std::collections::HashMap;
use uuid::Uuid;

/// Per-invocation execution state for a composite request
#[derive(Debug)]
pub struct ExecutionContext {
    /// Fresh UUID identifying this composite invocation
    pub request_id: String,
    /// Named variables resolvable via `$context.<var>`: the environment
    /// label plus any members of the request's top-level `Context` object
    pub variables: HashMap<String, Value>,
}

impl ExecutionContext {
    /// Create a fresh context with a new request id and no variables
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            variables: HashMap::new(),
        }
    }

    /// Context for one composite invocation. Binds `environment` to the
    /// request's environment label, then merges the members of the
    /// request body's top-level `Context` object, which win on name
    /// collisions.
    pub fn for_request(env: &str, body: &Value) -> Self {
        let mut ctx = Self::new();
        ctx.variables
            .insert("environment".to_string(), Value::String(env.to_string()));
        if let Some(Value::Object(members)) = body.get("Context") {
            for (name, value) in members {
                ctx.variables.insert(name.clone(), value.clone());
            }
        }
        ctx
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

/// A parsed template expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateExpr {
    /// `$guid` — a fresh UUID v4 per evaluation
    Guid,
    /// `$requestid` — the context's request id
    RequestId,
    /// `$context.<var>` — a context variable
    Context(String),
    /// `$prev.<step>.<path>` — a value from an earlier step's result
    Prev { step: String, path: Vec<String> },
    /// Anything else, written through unchanged
    Literal(String),
}

impl TemplateExpr {
    /// Parse a raw transformation value
    pub fn parse(raw: &str) -> Self {
        if raw == "$guid" {
            return Self::Guid;
        }
        if raw == "$requestid" {
            return Self::RequestId;
        }
        if let Some(var) = raw.strip_prefix("$context.") {
            if !var.is_empty() {
                return Self::Context(var.to_string());
            }
        }
        if let Some(rest) = raw.strip_prefix("$prev.") {
            let mut segments = rest.split('.');
            if let Some(step) = segments.next() {
                if !step.is_empty() {
                    return Self::Prev {
                        step: step.to_string(),
                        path: segments.map(|s| s.to_string()).collect(),
                    };
                }
            }
        }
        Self::Literal(raw.to_string())
    }

    /// Evaluate against the context and the results of earlier steps.
    ///
    /// `None` means the reference did not resolve (unknown variable,
    /// not-yet-run step, dead path); the caller leaves the target field
    /// untouched in that case.
    pub fn resolve(
        &self,
        ctx: &ExecutionContext,
        step_results: &Map<String, Value>,
    ) -> Option<Value> {
        match self {
            Self::Guid => Some(Value::String(Uuid::new_v4().to_string())),
            Self::RequestId => Some(Value::String(ctx.request_id.clone())),
            Self::Context(var) => ctx.variables.get(var).cloned(),
            Self::Prev { step, path } => {
                let mut current = step_results.get(step)?;
                for segment in path {
                    current = match current {
                        Value::Array(items) => {
                            items.get(segment.parse::<usize>().ok()?)?
                        }
                        Value::Object(map) => map.get(segment)?,
                        _ => return None,
                    };
                }
                // Clone detaches the value from the prior step's tree
                Some(current.clone())
            }
            Self::Literal(text) => Some(Value::String(text.clone())),
        }
    }
}
