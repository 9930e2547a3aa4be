//! Composite orchestrator — deterministic multi-step workflows
//!
//! A composite request runs the steps of a `CompositeDefinition`
//! sequentially, threading values between steps via template
//! transformations. The first failing step aborts the run; results of
//! completed steps are returned alongside the error.

mod template;

pub use template::{ExecutionContext, TemplateExpr};

use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::error::{GatewayError, Result};
use crate::registry::{CompositeDefinition, CompositeStep, EndpointRegistry};

/// Outcome of a full composite run, keyed by step name
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeResult {
    /// Whether every step completed
    pub success: bool,
    /// Per-step decoded results, in execution order
    pub step_results: Map<String, Value>,
    /// Name of the failing step, when `success` is false
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_step: Option<String>,
    /// Failure description, when `success` is false
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// How a composite run ended, for the HTTP layer to map
#[derive(Debug)]
pub enum CompositeOutcome {
    /// All steps completed; respond 200 with the result
    Success(CompositeResult),
    /// A step failed; respond 400 with the error envelope
    StepFailed {
        error: String,
        step: String,
        details: Value,
        result: CompositeResult,
    },
}

/// Step failure with no upstream response to attach
fn step_error(step: &CompositeStep, message: impl Into<String>) -> GatewayError {
    GatewayError::CompositeStep {
        step: step.name.clone(),
        message: message.into(),
        details: Value::Null,
    }
}

/// Runs composite workflows against the endpoint registry
pub struct Orchestrator {
    client: reqwest::Client,
    registry: Arc<EndpointRegistry>,
    server_name: String,
}

impl Orchestrator {
    /// Create an orchestrator sharing the gateway's HTTP client
    pub fn new(
        client: reqwest::Client,
        registry: Arc<EndpointRegistry>,
        server_name: impl Into<String>,
    ) -> Self {
        Self {
            client,
            registry,
            server_name: server_name.into(),
        }
    }

    /// Execute a composite definition against a request body
    pub async fn execute(
        &self,
        env: &str,
        definition: &CompositeDefinition,
        body: Value,
    ) -> CompositeOutcome {
        let ctx = ExecutionContext::for_request(env, &body);
        let mut step_results: Map<String, Value> = Map::new();

        tracing::debug!(
            composite = definition.name,
            request_id = ctx.request_id,
            steps = definition.steps.len(),
            "Composite run starting"
        );

        for step in &definition.steps {
            match self.run_step(env, step, &body, &ctx, &step_results).await {
                Ok(value) => {
                    step_results.insert(step.name.clone(), value);
                }
                Err(error) => {
                    let (message, details) = match error {
                        GatewayError::CompositeStep {
                            message, details, ..
                        } => (message, details),
                        other => (other.to_string(), Value::Null),
                    };
                    tracing::warn!(
                        composite = definition.name,
                        step = step.name,
                        error = message,
                        "Composite step failed, aborting run"
                    );
                    let result = CompositeResult {
                        success: false,
                        step_results,
                        error_step: Some(step.name.clone()),
                        error_message: Some(message.clone()),
                    };
                    return CompositeOutcome::StepFailed {
                        error: message,
                        step: step.name.clone(),
                        details,
                        result,
                    };
                }
            }
        }

        CompositeOutcome::Success(CompositeResult {
            success: true,
            step_results,
            error_step: None,
            error_message: None,
        })
    }

    /// Run one step: select its payload, apply transformations, dispatch
    async fn run_step(
        &self,
        env: &str,
        step: &CompositeStep,
        body: &Value,
        ctx: &ExecutionContext,
        step_results: &Map<String, Value>,
    ) -> Result<Value> {
        // Fan-out: one call per array element
        if step.is_array {
            if let Some(items) = step
                .array_property
                .as_deref()
                .and_then(|p| body.get(p))
                .and_then(|v| v.as_array())
            {
                let mut collected = Vec::with_capacity(items.len());
                for item in items {
                    let payload = self.prepare_payload(step, item.clone(), ctx, step_results);
                    collected.push(self.dispatch(env, step, &payload).await?);
                }
                return Ok(Value::Array(collected));
            }
        }

        let input = self.select_input(step, body, step_results);
        let payload = self.prepare_payload(step, input, ctx, step_results);
        self.dispatch(env, step, &payload).await
    }

    /// Payload selection: prior-step result, named property, or full body.
    /// Clones produce detached values, so later mutation of a payload
    /// never reaches into stored step results.
    fn select_input(
        &self,
        step: &CompositeStep,
        body: &Value,
        step_results: &Map<String, Value>,
    ) -> Value {
        if let Some(dep) = &step.depends_on {
            if let Some(prior) = step_results.get(dep) {
                return prior.clone();
            }
        }
        if let Some(source) = &step.source_property {
            if let Some(value) = body.get(source) {
                return value.clone();
            }
        }
        body.clone()
    }

    /// Apply template transformations to an object payload
    fn prepare_payload(
        &self,
        step: &CompositeStep,
        mut payload: Value,
        ctx: &ExecutionContext,
        step_results: &Map<String, Value>,
    ) -> Value {
        if step.template_transformations.is_empty() {
            return payload;
        }
        if let Value::Object(object) = &mut payload {
            for (field, raw) in &step.template_transformations {
                let expr = TemplateExpr::parse(raw);
                match expr.resolve(ctx, step_results) {
                    Some(value) => {
                        object.insert(field.clone(), value);
                    }
                    None => {
                        tracing::warn!(
                            step = step.name,
                            field = field,
                            expression = raw,
                            "Template expression did not resolve, field left unchanged"
                        );
                    }
                }
            }
        }
        payload
    }

    /// Resolve the step's endpoint and send the call upstream
    async fn dispatch(&self, env: &str, step: &CompositeStep, payload: &Value) -> Result<Value> {
        let Some(endpoint) = self.registry.get(&step.endpoint) else {
            return Err(step_error(
                step,
                format!("Unknown endpoint '{}'", step.endpoint),
            ));
        };
        if !endpoint.allows_method(&step.method) {
            return Err(step_error(
                step,
                format!(
                    "Method '{}' not allowed for endpoint '{}'",
                    step.method, step.endpoint
                ),
            ));
        }

        let method = reqwest::Method::from_bytes(step.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| step_error(step, format!("Invalid method '{}'", step.method)))?;
        let carries_body = method != reqwest::Method::GET && method != reqwest::Method::DELETE;

        let mut request = self
            .client
            .request(method, &endpoint.url)
            .header("ServerName", self.server_name.as_str())
            .header("DatabaseName", env)
            .header("Accept", "application/json,text/javascript; charset=utf-8");
        if carries_body {
            let serialized = serde_json::to_string(payload)
                .map_err(|e| step_error(step, format!("Payload serialization failed: {}", e)))?;
            request = request
                .header("Content-Type", "application/json; charset=utf-8")
                .body(serialized);
        }

        let response = request
            .send()
            .await
            .map_err(|e| step_error(step, format!("Upstream request failed: {}", e)))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| step_error(step, format!("Upstream body read failed: {}", e)))?;

        if !status.is_success() {
            let body_value: Value =
                serde_json::from_str(&text).unwrap_or_else(|_| Value::String(text.clone()));
            return Err(GatewayError::CompositeStep {
                step: step.name.clone(),
                message: format!("Endpoint '{}' returned {}", step.endpoint, status.as_u16()),
                details: json!({ "statusCode": status.as_u16(), "body": body_value }),
            });
        }

        // JSON when it parses, raw string otherwise
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }
}
