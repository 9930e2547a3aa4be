//! Proxy forwarder — request reconstruction, header policy, upstream
//! dispatch, response relay
//!
//! Handles `{method} /api/{env}/{endpoint}/{remainder?}`: validates the
//! environment and endpoint, reassembles the upstream URL, forwards the
//! request with the gateway's header policy, and relays the upstream
//! response after URL rewriting. Upstream non-2xx statuses are relayed
//! verbatim; network failures become a generic 500.

use bytes::Bytes;
use futures_util::TryStreamExt;
use http::header::{HeaderMap, CONTENT_TYPE};
use http::{Method, Response, StatusCode};
use http_body_util::{BodyStream, Full};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde_json::json;
use std::sync::Arc;
use url::Url;

use crate::auth::UrlSafetyCheck;
use crate::config::Settings;
use crate::error::{GatewayError, Result};
use crate::registry::EndpointRegistry;
use crate::rewrite::UrlRewriter;

/// Characters percent-encoded when the remainder becomes one path segment
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'<')
    .add(b'>')
    .add(b'`')
    .add(b'#')
    .add(b'?')
    .add(b'{')
    .add(b'}')
    .add(b'/')
    .add(b'%')
    .add(b'\\');

/// Headers never copied to the upstream request
const STRIPPED_HEADERS: [&str; 3] = ["host", "databasename", "servername"];

/// Incoming request body, buffered only when capture requires it
pub enum RequestBody {
    /// Fully buffered (request-body capture is on)
    Buffered(Bytes),
    /// Streaming passthrough
    Stream(hyper::body::Incoming),
}

/// Everything the forwarder needs from the inbound request
pub struct ForwardRequest {
    pub method: Method,
    pub headers: HeaderMap,
    /// Environment label from the path
    pub env: String,
    /// Path remainder after `/api/{env}/`
    pub rest: String,
    /// Raw query string, without the `?`
    pub query: Option<String>,
    /// Scheme the client used to reach the gateway
    pub scheme: String,
    /// Host the client used to reach the gateway
    pub host: String,
    pub body: RequestBody,
}

/// Relayed response plus the context the traffic log needs
pub struct ForwardOutcome {
    pub response: Response<Full<Bytes>>,
    /// Canonical endpoint name, once resolution got that far
    pub endpoint_name: Option<String>,
    /// Assembled upstream URL, once built
    pub target_url: Option<String>,
    /// UTF-8 view of the relayed body, for capture
    pub body_text: Option<String>,
    pub response_size: u64,
}

/// Upstream coordinates resolved before a request failed, kept so the
/// traffic log still names the endpoint on a rejection
#[derive(Default)]
struct ResolvedTarget {
    endpoint_name: Option<String>,
    target_url: Option<String>,
}

/// Map a rejection to its JSON error response. Server-side errors keep
/// the generic body; the caller never sees upstream internals.
fn error_outcome(error: GatewayError, resolved: ResolvedTarget) -> ForwardOutcome {
    let status = error.status();
    let message = if status.is_server_error() {
        "Internal Server Error".to_string()
    } else {
        error.to_string()
    };
    let body = json!({ "error": message }).to_string();
    ForwardOutcome {
        response: json_response(status, &body),
        endpoint_name: resolved.endpoint_name,
        target_url: resolved.target_url,
        response_size: body.len() as u64,
        body_text: Some(body),
    }
}

/// Validates, reassembles, and dispatches proxied requests
pub struct Forwarder {
    client: reqwest::Client,
    settings: Arc<Settings>,
    registry: Arc<EndpointRegistry>,
    safety: Arc<dyn UrlSafetyCheck>,
}

impl Forwarder {
    pub fn new(
        client: reqwest::Client,
        settings: Arc<Settings>,
        registry: Arc<EndpointRegistry>,
        safety: Arc<dyn UrlSafetyCheck>,
    ) -> Self {
        Self {
            client,
            settings,
            registry,
            safety,
        }
    }

    /// Forward one request. Never fails outward: rejections and upstream
    /// errors become JSON error responses.
    pub async fn forward(&self, request: ForwardRequest) -> ForwardOutcome {
        let mut resolved = ResolvedTarget::default();
        match self.try_forward(request, &mut resolved).await {
            Ok(outcome) => outcome,
            Err(error) => error_outcome(error, resolved),
        }
    }

    async fn try_forward(
        &self,
        request: ForwardRequest,
        resolved: &mut ResolvedTarget,
    ) -> Result<ForwardOutcome> {
        let ForwardRequest {
            method,
            headers,
            env,
            rest,
            query,
            scheme,
            host,
            body,
        } = request;

        if !self.settings.is_environment_allowed(&env) {
            return Err(GatewayError::EnvironmentNotAllowed(env));
        }

        let Some(name) = extract_endpoint_name(&rest) else {
            return Err(GatewayError::MissingEndpointName);
        };
        let Some(endpoint) = self.registry.get(name) else {
            resolved.endpoint_name = Some(name.to_string());
            return Err(GatewayError::EndpointNotFound(name.to_string()));
        };
        resolved.endpoint_name = Some(endpoint.name.clone());
        if !endpoint.directly_callable() {
            return Err(GatewayError::EndpointNotAccessible);
        }
        if !endpoint.allows_method(method.as_str()) {
            return Err(GatewayError::MethodNotAllowed {
                method: method.to_string(),
                endpoint: endpoint.name.clone(),
            });
        }

        let remainder = strip_endpoint_prefix(&rest, name);
        let target = assemble_target(&endpoint.url, remainder, query.as_deref());
        let target_url = Url::parse(&target).map_err(|e| {
            tracing::error!(
                endpoint = endpoint.name,
                url = target,
                error = %e,
                "Upstream URL did not parse"
            );
            GatewayError::Other(format!("Upstream URL did not parse: {}", e))
        })?;
        resolved.target_url = Some(target_url.to_string());
        if !self.safety.is_allowed(&target_url) {
            return Err(GatewayError::UnsafeUrl(target_url.to_string()));
        }

        let upstream = self
            .dispatch(&method, &headers, &env, body, target_url.clone())
            .await
            .map_err(|e| {
                tracing::error!(
                    endpoint = endpoint.name,
                    target = %target_url,
                    error = %e,
                    "Upstream dispatch failed"
                );
                GatewayError::Http(e)
            })?;

        let status = upstream.status();
        let upstream_headers = upstream.headers().clone();
        let raw = upstream.bytes().await.map_err(|e| {
            tracing::error!(endpoint = endpoint.name, error = %e, "Upstream body read failed");
            GatewayError::Http(e)
        })?;

        // URL rewriting applies to any textual body; binary bodies pass
        // through untouched
        let (body_bytes, body_text) = match std::str::from_utf8(&raw) {
            Ok(text) => {
                let rewriter = rewriter_for(&endpoint.url, &scheme, &host, &env, name);
                let rewritten = rewriter.rewrite(text);
                (Bytes::from(rewritten.clone()), Some(rewritten))
            }
            Err(_) => (raw.clone(), None),
        };

        let mut builder = Response::builder().status(status);
        for (header_name, value) in upstream_headers.iter() {
            // The rewritten body may have a different length
            if header_name == &http::header::CONTENT_LENGTH {
                continue;
            }
            builder = builder.header(header_name, value);
        }
        if !upstream_headers.contains_key(CONTENT_TYPE) {
            builder = builder.header(CONTENT_TYPE, "application/json");
        }
        let response_size = body_bytes.len() as u64;
        let response = builder.body(Full::new(body_bytes)).unwrap_or_else(|_| {
            json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "{\"error\":\"Internal Server Error\"}",
            )
        });

        Ok(ForwardOutcome {
            response,
            endpoint_name: Some(endpoint.name.clone()),
            target_url: Some(target_url.to_string()),
            body_text,
            response_size,
        })
    }

    /// Apply the header policy and send the upstream request
    async fn dispatch(
        &self,
        method: &Method,
        headers: &HeaderMap,
        env: &str,
        body: RequestBody,
        target: Url,
    ) -> reqwest::Result<reqwest::Response> {
        let has_body = method_carries_body(method);
        let mut builder = self.client.request(method.clone(), target);

        for (name, value) in headers.iter() {
            let lower = name.as_str();
            if STRIPPED_HEADERS.contains(&lower) || lower.starts_with("content-") {
                continue;
            }
            builder = builder.header(name, value);
        }
        builder = builder
            .header("DatabaseName", env)
            .header("ServerName", self.settings.environment.server_name.as_str());

        if has_body {
            // Entity headers travel with the entity; the transport layer
            // owns Content-Length
            for (name, value) in headers.iter() {
                let lower = name.as_str();
                if lower.starts_with("content-") && lower != "content-length" {
                    builder = builder.header(name, value);
                }
            }
            builder = match body {
                RequestBody::Buffered(bytes) => builder.body(bytes),
                RequestBody::Stream(incoming) => {
                    let stream = BodyStream::new(incoming).try_filter_map(|frame| {
                        std::future::ready(Ok::<_, hyper::Error>(frame.into_data().ok()))
                    });
                    builder.body(reqwest::Body::wrap_stream(stream))
                }
            };
        }

        builder.send().await
    }
}

/// Build the rewriter pair for one relayed response
fn rewriter_for(
    endpoint_url: &str,
    scheme: &str,
    host: &str,
    env: &str,
    name: &str,
) -> UrlRewriter {
    let (original_host, original_path) = split_upstream_base(endpoint_url);
    let proxy_host = format!("{}://{}", scheme, host);
    let proxy_path = format!("/api/{}/{}", env, name);
    UrlRewriter::new(&original_host, &original_path, &proxy_host, &proxy_path)
}

/// `scheme://host[:port]` and trimmed path of an upstream base URL
fn split_upstream_base(endpoint_url: &str) -> (String, String) {
    match Url::parse(endpoint_url) {
        Ok(url) => {
            let host = url.host_str().unwrap_or_default();
            let origin = match url.port() {
                Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
                None => format!("{}://{}", url.scheme(), host),
            };
            (origin, url.path().trim_end_matches('/').to_string())
        }
        Err(_) => (endpoint_url.trim_end_matches('/').to_string(), String::new()),
    }
}

/// Leading `[A-Za-z0-9_]+` run of the path remainder
fn extract_endpoint_name(rest: &str) -> Option<&str> {
    let end = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(rest.len());
    if end == 0 {
        None
    } else {
        Some(&rest[..end])
    }
}

/// Remainder after the endpoint name, separator stripped
fn strip_endpoint_prefix<'a>(rest: &'a str, name: &str) -> &'a str {
    let after = &rest[name.len()..];
    after.strip_prefix('/').unwrap_or(after)
}

/// Percent-encode the remainder as one path segment. A fully
/// parenthesized remainder keeps its parentheses and encodes only the
/// inner content (OData key syntax).
fn encode_remainder(remainder: &str) -> String {
    if remainder.len() >= 2 && remainder.starts_with('(') && remainder.ends_with(')') {
        let inner = &remainder[1..remainder.len() - 1];
        format!("({})", utf8_percent_encode(inner, SEGMENT))
    } else {
        utf8_percent_encode(remainder, SEGMENT).to_string()
    }
}

/// Upstream URL: base + encoded remainder + raw query string. A
/// parenthesized key attaches directly to the base (`…/Accounts(123)`);
/// anything else gets a path separator.
fn assemble_target(endpoint_url: &str, remainder: &str, query: Option<&str>) -> String {
    let mut target = endpoint_url.trim_end_matches('/').to_string();
    if !remainder.is_empty() {
        let encoded = encode_remainder(remainder);
        if !encoded.starts_with('(') {
            target.push('/');
        }
        target.push_str(&encoded);
    }
    if let Some(query) = query {
        target.push('?');
        target.push_str(query);
    }
    target
}

/// Methods whose body is forwarded upstream. MERGE is the proprietary
/// OData partial-update method.
fn method_carries_body(method: &Method) -> bool {
    matches!(
        method.as_str(),
        "POST" | "PUT" | "PATCH" | "DELETE" | "OPTIONS" | "MERGE"
    )
}

fn json_response(status: StatusCode, body: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_endpoint_name() {
        assert_eq!(extract_endpoint_name("Items"), Some("Items"));
        assert_eq!(extract_endpoint_name("Items/1"), Some("Items"));
        assert_eq!(extract_endpoint_name("Accounts(123)"), Some("Accounts"));
        assert_eq!(extract_endpoint_name("Sales_Order_2/x"), Some("Sales_Order_2"));
        assert_eq!(extract_endpoint_name("(oops)"), None);
        assert_eq!(extract_endpoint_name(""), None);
        assert_eq!(extract_endpoint_name("/leading"), None);
    }

    #[test]
    fn test_strip_endpoint_prefix() {
        assert_eq!(strip_endpoint_prefix("Items", "Items"), "");
        assert_eq!(strip_endpoint_prefix("Items/1/sub", "Items"), "1/sub");
        assert_eq!(strip_endpoint_prefix("Accounts(123)", "Accounts"), "(123)");
    }

    #[test]
    fn test_encode_remainder_plain() {
        assert_eq!(encode_remainder("1"), "1");
        assert_eq!(encode_remainder("a b"), "a%20b");
        // A remainder with slashes is one encoded segment
        assert_eq!(encode_remainder("1/sub"), "1%2Fsub");
    }

    #[test]
    fn test_encode_remainder_parenthesized() {
        assert_eq!(encode_remainder("(123)"), "(123)");
        assert_eq!(encode_remainder("('a b')"), "('a%20b')");
        // Only a fully parenthesized remainder keeps its parentheses
        assert_eq!(encode_remainder("(123"), "(123");
        assert_eq!(encode_remainder("x(1)"), "x(1)");
    }

    #[test]
    fn test_assemble_target() {
        assert_eq!(
            assemble_target("http://up:8020/items", "", None),
            "http://up:8020/items"
        );
        assert_eq!(
            assemble_target("http://up:8020/items/", "1", None),
            "http://up:8020/items/1"
        );
        assert_eq!(
            assemble_target("http://up:8020/items", "", Some("$top=2")),
            "http://up:8020/items?$top=2"
        );
        assert_eq!(
            assemble_target("http://up:8020/accounts", "(123)", None),
            "http://up:8020/accounts(123)"
        );
    }

    #[test]
    fn test_method_carries_body() {
        for m in ["POST", "PUT", "PATCH", "DELETE", "OPTIONS", "MERGE"] {
            assert!(method_carries_body(&Method::from_bytes(m.as_bytes()).unwrap()));
        }
        assert!(!method_carries_body(&Method::GET));
        assert!(!method_carries_body(&Method::HEAD));
    }

    #[test]
    fn test_split_upstream_base() {
        assert_eq!(
            split_upstream_base("http://up:8020/items/"),
            ("http://up:8020".to_string(), "/items".to_string())
        );
        assert_eq!(
            split_upstream_base("https://internal.example/svc/data"),
            ("https://internal.example".to_string(), "/svc/data".to_string())
        );
    }

    #[test]
    fn test_stripped_headers() {
        for header in ["host", "databasename", "servername"] {
            assert!(STRIPPED_HEADERS.contains(&header));
        }
        assert!(!STRIPPED_HEADERS.contains(&"accept"));
    }

    #[test]
    fn test_error_outcome_client_errors_keep_their_message() {
        let outcome = error_outcome(
            GatewayError::EnvironmentNotAllowed("qa".into()),
            ResolvedTarget::default(),
        );
        assert_eq!(outcome.response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            outcome.body_text.as_deref(),
            Some(r#"{"error":"Environment 'qa' is not allowed."}"#)
        );
    }

    #[test]
    fn test_error_outcome_server_errors_stay_generic() {
        let resolved = ResolvedTarget {
            endpoint_name: Some("Items".to_string()),
            target_url: Some("http://up:8020/items".to_string()),
        };
        let outcome = error_outcome(
            GatewayError::Other("socket reset by upstream".into()),
            resolved,
        );
        assert_eq!(outcome.response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            outcome.body_text.as_deref(),
            Some(r#"{"error":"Internal Server Error"}"#)
        );
        // Log context survives the rejection
        assert_eq!(outcome.endpoint_name.as_deref(), Some("Items"));
        assert_eq!(outcome.target_url.as_deref(), Some("http://up:8020/items"));
    }

    #[test]
    fn test_error_outcome_unsafe_url_hides_target() {
        let outcome = error_outcome(
            GatewayError::UnsafeUrl("http://10.0.0.7/items".into()),
            ResolvedTarget::default(),
        );
        assert_eq!(outcome.response.status(), StatusCode::FORBIDDEN);
        assert!(!outcome.body_text.unwrap().contains("10.0.0.7"));
    }
}
