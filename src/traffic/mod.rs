//! Traffic logging pipeline — bounded queue, batch worker, pluggable storage
//!
//! Request serving is decoupled from log persistence: the middleware
//! enqueues one entry per request without blocking, a single background
//! worker flushes batches through the configured storage driver, and
//! shutdown drains whatever is pending. Logging latency and storage
//! failures never reach the proxy path.

mod file_driver;
mod queue;
mod sql_driver;
mod worker;

pub use queue::TrafficQueue;

pub(crate) use file_driver::FileDriver;
pub(crate) use sql_driver::SqlDriver;
pub(crate) use worker::TrafficStore;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::{TrafficLogSettings, TrafficStorage};
use crate::error::Result;

/// One structured record per proxied request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficLogEntry {
    /// Short random hex id correlating log lines for one request
    pub trace_id: String,
    /// UTC timestamp, RFC 3339
    pub timestamp: String,
    pub method: String,
    pub path: String,
    pub query: String,
    pub env: String,
    pub endpoint_name: String,
    pub target_url: String,
    pub status_code: u16,
    pub request_size: u64,
    pub response_size: u64,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub client_ip: String,
    /// Captured request body, truncated to the configured ceiling
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_body: Option<String>,
    /// Captured response body, truncated to the configured ceiling
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_body: Option<String>,
    /// Inbound headers with sensitive values redacted
    pub request_headers: HashMap<String, String>,
}

/// Generate a short random hex trace id
pub fn new_trace_id() -> String {
    format!("{:016x}", Uuid::new_v4().as_u128() as u64)
}

/// Whether a header's value must never reach the traffic log
pub fn is_sensitive_header(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    matches!(
        lower.as_str(),
        "authorization" | "cookie" | "secret" | "credential" | "password"
    ) || lower.ends_with("-token")
        || lower.ends_with("-key")
}

/// Copy headers into a loggable map, redacting sensitive values
pub fn redact_headers(headers: &http::HeaderMap) -> HashMap<String, String> {
    let mut map = HashMap::with_capacity(headers.len());
    for (name, value) in headers {
        let logged = if is_sensitive_header(name.as_str()) {
            "[REDACTED]".to_string()
        } else {
            value.to_str().unwrap_or("<binary>").to_string()
        };
        map.insert(name.as_str().to_string(), logged);
    }
    map
}

/// Truncate a captured body to the ceiling, marking the cut
pub fn truncate_body(body: &str, max_bytes: usize) -> String {
    if body.len() <= max_bytes {
        return body.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

/// Handle for producers; owns the queue and the background worker
pub struct TrafficLogSink {
    queue: Option<Arc<TrafficQueue>>,
    worker: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl TrafficLogSink {
    /// Start the pipeline per configuration. Must run inside a tokio
    /// runtime; the worker task lives until `shutdown`.
    pub fn start(config: &TrafficLogSettings) -> Result<Self> {
        if !config.enabled {
            tracing::info!("Traffic logging disabled");
            return Ok(Self::disabled());
        }

        let driver: Box<dyn TrafficStore> = match config.storage {
            TrafficStorage::File => Box::new(FileDriver::new(
                Path::new(&config.directory),
                &config.file_prefix,
                config.max_file_size_mb,
                config.max_file_count,
            )?),
            TrafficStorage::Sqlite => {
                Box::new(SqlDriver::new(Path::new(&config.database_path))?)
            }
        };

        let queue = Arc::new(TrafficQueue::new(config.queue_capacity));
        let worker_queue = queue.clone();
        let batch_size = config.batch_size;
        let flush_interval = Duration::from_millis(config.flush_interval_ms.max(1));
        let handle = tokio::spawn(async move {
            worker::run(worker_queue, driver, batch_size, flush_interval).await;
        });

        tracing::info!(
            storage = ?config.storage,
            queue_capacity = config.queue_capacity,
            batch_size = config.batch_size,
            "Traffic log pipeline started"
        );

        Ok(Self {
            queue: Some(queue),
            worker: std::sync::Mutex::new(Some(handle)),
        })
    }

    /// A sink that drops everything
    pub fn disabled() -> Self {
        Self {
            queue: None,
            worker: std::sync::Mutex::new(None),
        }
    }

    /// Enqueue one entry; never blocks the request path
    pub fn log(&self, entry: TrafficLogEntry) {
        if let Some(queue) = &self.queue {
            queue.push(entry);
        }
    }

    /// Entries lost to the drop-oldest policy
    pub fn dropped(&self) -> u64 {
        self.queue.as_ref().map(|q| q.dropped()).unwrap_or(0)
    }

    /// Close the queue and wait for the worker's final drain
    pub async fn shutdown(&self) {
        if let Some(queue) = &self.queue {
            queue.close();
        }
        let handle = self.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Traffic log worker did not shut down cleanly");
            }
        }
    }
}
