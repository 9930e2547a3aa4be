//! HTTP entrypoint — accept loop, request routing, middleware glue
//!
//! Every accepted connection gets its own task. `/api/{env}/...`
//! requests pass through bearer-token auth and the traffic-logging
//! middleware before dispatching to the composite orchestrator
//! (`composite/{name}`) or the proxy forwarder.

use bytes::Bytes;
use chrono::Utc;
use http::header::{CONTENT_TYPE, HOST};
use http::{Method, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;

use crate::auth::{bearer_token, TokenVerifier};
use crate::composite::{CompositeOutcome, Orchestrator};
use crate::config::Settings;
use crate::proxy::{ForwardRequest, Forwarder, RequestBody};
use crate::registry::EndpointRegistry;
use crate::traffic::{
    new_trace_id, redact_headers, truncate_body, TrafficLogEntry, TrafficLogSink,
};

/// Shared per-process state for request handling
pub struct AppState {
    pub settings: Arc<Settings>,
    pub registry: Arc<EndpointRegistry>,
    pub forwarder: Forwarder,
    pub orchestrator: Orchestrator,
    pub verifier: Arc<dyn TokenVerifier>,
    pub sink: Arc<TrafficLogSink>,
    pub started_at: Instant,
}

/// What one dispatched request produced, for the response and the log
struct Dispatched {
    response: Response<Full<Bytes>>,
    endpoint_name: String,
    target_url: String,
    request_size: u64,
    response_size: u64,
    request_capture: Option<String>,
    response_capture: Option<String>,
}

/// Accept connections until the task is aborted
pub async fn run(listener: TcpListener, state: Arc<AppState>) {
    loop {
        let (stream, remote_addr) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::error!(error = %e, "Failed to accept connection");
                continue;
            }
        };

        let state = state.clone();
        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let _ = http1::Builder::new()
                .serve_connection(
                    io,
                    service_fn(move |req| handle_request(req, remote_addr, state.clone())),
                )
                .await;
        });
    }
}

async fn handle_request(
    req: hyper::Request<Incoming>,
    remote_addr: SocketAddr,
    state: Arc<AppState>,
) -> std::result::Result<Response<Full<Bytes>>, hyper::Error> {
    let path = req.uri().path().to_string();

    if path == "/health" {
        return Ok(health_response(&state));
    }

    match path.strip_prefix("/api/") {
        Some(api_path) if !api_path.is_empty() => {
            let api_path = api_path.to_string();
            Ok(handle_api_request(req, api_path, remote_addr, state).await)
        }
        _ => Ok(json_error(StatusCode::NOT_FOUND, "Not found")),
    }
}

fn health_response(state: &AppState) -> Response<Full<Bytes>> {
    let body = json!({
        "status": "running",
        "uptimeSecs": state.started_at.elapsed().as_secs(),
        "endpoints": state.registry.len(),
        "trafficLogDropped": state.sink.dropped(),
    })
    .to_string();
    json_response(StatusCode::OK, &body)
}

/// Auth, dispatch, and the traffic-logging middleware around both
async fn handle_api_request(
    req: hyper::Request<Incoming>,
    api_path: String,
    remote_addr: SocketAddr,
    state: Arc<AppState>,
) -> Response<Full<Bytes>> {
    let trace_id = new_trace_id();
    let started = Instant::now();
    let timestamp = Utc::now().to_rfc3339();
    let method = req.method().clone();
    let query = req.uri().query().map(str::to_string);
    let path = format!("/api/{}", api_path);
    let headers = req.headers().clone();
    let client_ip = remote_addr.ip().to_string();

    let (env, rest) = match api_path.split_once('/') {
        Some((env, rest)) => (env.to_string(), rest.to_string()),
        None => (api_path.clone(), String::new()),
    };

    // Auth runs before anything touches the registry
    let username = match authenticate(&state, &headers).await {
        Ok(username) => username,
        Err(response) => {
            let entry = TrafficLogEntry {
                trace_id: trace_id.clone(),
                timestamp,
                method: method.to_string(),
                path,
                query: query.unwrap_or_default(),
                env,
                status_code: response.status().as_u16(),
                client_ip,
                request_headers: redact_headers(&headers),
                ..TrafficLogEntry::default()
            };
            log_completion(&state, &trace_id, entry, started);
            return response;
        }
    };

    let dispatched = if rest == "composite" || rest.starts_with("composite/") {
        let name = rest
            .strip_prefix("composite/")
            .unwrap_or("")
            .trim_end_matches('/')
            .to_string();
        handle_composite(req, &state, &env, &name, &method).await
    } else {
        handle_forward(req, &state, &env, &rest, &method, &headers, query.clone()).await
    };

    let entry = TrafficLogEntry {
        trace_id: trace_id.clone(),
        timestamp,
        method: method.to_string(),
        path,
        query: query.unwrap_or_default(),
        env,
        endpoint_name: dispatched.endpoint_name,
        target_url: dispatched.target_url,
        status_code: dispatched.response.status().as_u16(),
        request_size: dispatched.request_size,
        response_size: dispatched.response_size,
        duration_ms: 0, // set in log_completion
        username,
        client_ip,
        request_body: dispatched.request_capture,
        response_body: dispatched.response_capture,
        request_headers: redact_headers(&headers),
    };
    log_completion(&state, &trace_id, entry, started);
    dispatched.response
}

/// Fill in the duration, enqueue the entry once, and emit the
/// synchronous per-request log line with the same trace id
fn log_completion(state: &AppState, trace_id: &str, mut entry: TrafficLogEntry, started: Instant) {
    entry.duration_ms = started.elapsed().as_millis() as u64;
    tracing::info!(
        trace_id = trace_id,
        method = entry.method,
        path = entry.path,
        status = entry.status_code,
        duration_ms = entry.duration_ms,
        endpoint = entry.endpoint_name,
        "Request completed"
    );
    state.sink.log(entry);
}

/// Missing header is 401, unknown token is 403
async fn authenticate(
    state: &AppState,
    headers: &http::HeaderMap,
) -> std::result::Result<Option<String>, Response<Full<Bytes>>> {
    let Some(token) = bearer_token(headers) else {
        return Err(json_error(
            StatusCode::UNAUTHORIZED,
            "Missing Authorization header",
        ));
    };
    match state.verifier.verify(token).await {
        Some(identity) => Ok(identity.username),
        None => Err(json_error(StatusCode::FORBIDDEN, "Invalid token")),
    }
}

/// Standard proxy path: stream or buffer the body, then forward
async fn handle_forward(
    req: hyper::Request<Incoming>,
    state: &AppState,
    env: &str,
    rest: &str,
    method: &Method,
    headers: &http::HeaderMap,
    query: Option<String>,
) -> Dispatched {
    let capture = &state.settings.traffic_log;
    let content_length = headers
        .get(http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);

    let wants_body = !matches!(method.as_str(), "GET" | "HEAD");
    let (body, request_size, request_capture) = if capture.capture_request_body && wants_body {
        let bytes = match req.into_body().collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                tracing::warn!(error = %e, "Request body read failed during capture");
                Bytes::new()
            }
        };
        let captured = std::str::from_utf8(&bytes)
            .ok()
            .map(|text| truncate_body(text, capture.max_body_capture_size_bytes));
        let size = bytes.len() as u64;
        (RequestBody::Buffered(bytes), size, captured)
    } else {
        (RequestBody::Stream(req.into_body()), content_length, None)
    };

    let host = headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost")
        .to_string();

    let outcome = state
        .forwarder
        .forward(ForwardRequest {
            method: method.clone(),
            headers: headers.clone(),
            env: env.to_string(),
            rest: rest.to_string(),
            query,
            scheme: "http".to_string(),
            host,
            body,
        })
        .await;

    let response_capture = if capture.capture_response_body {
        outcome
            .body_text
            .as_deref()
            .map(|text| truncate_body(text, capture.max_body_capture_size_bytes))
    } else {
        None
    };

    Dispatched {
        response: outcome.response,
        endpoint_name: outcome.endpoint_name.unwrap_or_default(),
        target_url: outcome.target_url.unwrap_or_default(),
        request_size,
        response_size: outcome.response_size,
        request_capture,
        response_capture,
    }
}

/// `POST /api/{env}/composite/{name}` — run a workflow
async fn handle_composite(
    req: hyper::Request<Incoming>,
    state: &AppState,
    env: &str,
    name: &str,
    method: &Method,
) -> Dispatched {
    let capture = &state.settings.traffic_log;

    let bytes = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            tracing::warn!(error = %e, "Composite body read failed");
            Bytes::new()
        }
    };
    let request_size = bytes.len() as u64;
    let request_capture = if capture.capture_request_body {
        std::str::from_utf8(&bytes)
            .ok()
            .map(|text| truncate_body(text, capture.max_body_capture_size_bytes))
    } else {
        None
    };

    let dispatched = |response: Response<Full<Bytes>>,
                          target_url: String,
                          body_text: String| {
        let response_capture = if capture.capture_response_body {
            Some(truncate_body(&body_text, capture.max_body_capture_size_bytes))
        } else {
            None
        };
        Dispatched {
            response,
            endpoint_name: name.to_string(),
            target_url,
            request_size,
            response_size: body_text.len() as u64,
            request_capture: request_capture.clone(),
            response_capture,
        }
    };

    if !state.settings.is_environment_allowed(env) {
        let body = json!({ "error": format!("Environment '{}' is not allowed.", env) }).to_string();
        return dispatched(
            json_response(StatusCode::BAD_REQUEST, &body),
            String::new(),
            body,
        );
    }
    if name.is_empty() {
        let body = json!({ "error": "No composite name in request path" }).to_string();
        return dispatched(
            json_response(StatusCode::BAD_REQUEST, &body),
            String::new(),
            body,
        );
    }
    if method != Method::POST {
        let body = json!({ "error": "Composites are invoked with POST" }).to_string();
        return dispatched(
            json_response(StatusCode::METHOD_NOT_ALLOWED, &body),
            String::new(),
            body,
        );
    }

    let resolved = state
        .registry
        .get(name)
        .and_then(|endpoint| {
            endpoint
                .composite
                .clone()
                .map(|definition| (definition, endpoint.url.clone()))
        });
    let Some((definition, target_url)) = resolved else {
        let body = json!({ "error": format!("Composite '{}' not found", name) }).to_string();
        return dispatched(
            json_response(StatusCode::NOT_FOUND, &body),
            String::new(),
            body,
        );
    };

    let body_value: serde_json::Value = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        match serde_json::from_slice(&bytes) {
            Ok(value) => value,
            Err(_) => {
                let body = json!({ "error": "Request body is not valid JSON" }).to_string();
                return dispatched(
                    json_response(StatusCode::BAD_REQUEST, &body),
                    target_url,
                    body,
                );
            }
        }
    };

    match state.orchestrator.execute(env, &definition, body_value).await {
        CompositeOutcome::Success(result) => {
            let body = serde_json::to_string(&result).unwrap_or_default();
            dispatched(json_response(StatusCode::OK, &body), target_url, body)
        }
        CompositeOutcome::StepFailed {
            error,
            step,
            details,
            result,
        } => {
            let body = json!({
                "error": error,
                "step": step,
                "details": details,
                "result": result,
            })
            .to_string();
            dispatched(
                json_response(StatusCode::BAD_REQUEST, &body),
                target_url,
                body,
            )
        }
    }
}

fn json_response(status: StatusCode, body: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap_or_default()
}

fn json_error(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    json_response(status, &json!({ "error": message }).to_string())
}
