//! Runtime settings for envgate
//!
//! Loaded once at startup from `environments/settings.json` and treated as
//! read-only injected configuration from then on. Keys are PascalCase to
//! match the deployed settings format; unknown fields are ignored.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{GatewayError, Result};

/// Top-level gateway settings
///
/// # Example
///
/// ```json
/// {
///   "Environment": {
///     "ServerName": "erp-prod-01",
///     "AllowedEnvironments": ["dev", "test", "600"]
///   },
///   "Listen": { "Address": "0.0.0.0:8080" },
///   "TrafficLog": { "Storage": "File", "Directory": "logs/traffic" }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Settings {
    /// Upstream environment identity and allow-list
    pub environment: EnvironmentSettings,

    /// Listener configuration
    #[serde(default)]
    pub listen: ListenSettings,

    /// Upstream client configuration
    #[serde(default)]
    pub proxy: ProxySettings,

    /// Traffic logging pipeline configuration
    #[serde(default)]
    pub traffic_log: TrafficLogSettings,
}

/// Environment identity forwarded to upstreams and the env allow-list
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EnvironmentSettings {
    /// Value injected as the `ServerName` header on every upstream request
    pub server_name: String,

    /// Environment labels accepted as the first `/api/{env}` path segment
    pub allowed_environments: Vec<String>,
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListenSettings {
    /// Listen address in "host:port" format
    #[serde(default = "default_listen_address")]
    pub address: String,
}

impl Default for ListenSettings {
    fn default() -> Self {
        Self {
            address: default_listen_address(),
        }
    }
}

fn default_listen_address() -> String {
    "0.0.0.0:8080".to_string()
}

/// Upstream client configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProxySettings {
    /// Use OS-level default credentials for upstream calls (Kerberos/NTLM
    /// interop deployments). Recorded and surfaced in the startup log.
    #[serde(default)]
    pub use_default_credentials: bool,
}

/// Traffic log storage backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TrafficStorage {
    /// Newline-delimited JSON files with size-based rollover
    #[default]
    File,
    /// Embedded SQLite database
    Sqlite,
}

/// Traffic logging pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TrafficLogSettings {
    /// Master toggle for the pipeline
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Storage driver
    #[serde(default)]
    pub storage: TrafficStorage,

    /// Bounded queue capacity; overflow evicts the oldest entry
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Maximum entries pulled per flush
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Idle flush interval in milliseconds
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Directory for the file driver
    #[serde(default = "default_directory")]
    pub directory: String,

    /// File name prefix for the file driver
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,

    /// Rollover threshold per file in megabytes
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,

    /// Oldest files beyond this count are deleted on rollover
    #[serde(default = "default_max_file_count")]
    pub max_file_count: usize,

    /// Database path for the SQLite driver
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Capture the request body (forces buffering of the incoming request)
    #[serde(default)]
    pub capture_request_body: bool,

    /// Capture the response body
    #[serde(default)]
    pub capture_response_body: bool,

    /// Captured bodies are truncated to this many bytes
    #[serde(default = "default_max_body_capture")]
    pub max_body_capture_size_bytes: usize,
}

impl Default for TrafficLogSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            storage: TrafficStorage::File,
            queue_capacity: default_queue_capacity(),
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
            directory: default_directory(),
            file_prefix: default_file_prefix(),
            max_file_size_mb: default_max_file_size_mb(),
            max_file_count: default_max_file_count(),
            database_path: default_database_path(),
            capture_request_body: false,
            capture_response_body: false,
            max_body_capture_size_bytes: default_max_body_capture(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_queue_capacity() -> usize {
    1000
}

fn default_batch_size() -> usize {
    50
}

fn default_flush_interval_ms() -> u64 {
    1000
}

fn default_directory() -> String {
    "logs/traffic".to_string()
}

fn default_file_prefix() -> String {
    "traffic".to_string()
}

fn default_max_file_size_mb() -> u64 {
    50
}

fn default_max_file_count() -> usize {
    10
}

fn default_database_path() -> String {
    "logs/traffic.db".to_string()
}

fn default_max_body_capture() -> usize {
    4096
}

impl Settings {
    /// Load settings from a JSON file
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            GatewayError::Config(format!(
                "Failed to read settings file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json(&content)
    }

    /// Parse settings from a JSON string
    pub fn from_json(content: &str) -> Result<Self> {
        let settings: Settings = serde_json::from_str(content)
            .map_err(|e| GatewayError::Config(format!("Failed to parse settings: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate the settings for consistency
    pub fn validate(&self) -> Result<()> {
        if self.environment.server_name.trim().is_empty() {
            return Err(GatewayError::Config(
                "Environment.ServerName must not be empty".to_string(),
            ));
        }
        if self.environment.allowed_environments.is_empty() {
            return Err(GatewayError::Config(
                "Environment.AllowedEnvironments must not be empty".to_string(),
            ));
        }
        if self.traffic_log.queue_capacity == 0 {
            return Err(GatewayError::Config(
                "TrafficLog.QueueCapacity must be at least 1".to_string(),
            ));
        }
        if self.traffic_log.batch_size == 0 {
            return Err(GatewayError::Config(
                "TrafficLog.BatchSize must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Check whether an environment label is in the allow-list
    pub fn is_environment_allowed(&self, env: &str) -> bool {
        self.environment
            .allowed_environments
            .iter()
            .any(|e| e.eq_ignore_ascii_case(env))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> &'static str {
        r#"{
            "Environment": {
                "ServerName": "erp-prod-01",
                "AllowedEnvironments": ["dev", "test", "600"]
            }
        }"#
    }

    #[test]
    fn test_parse_minimal_settings() {
        let settings = Settings::from_json(sample_json()).unwrap();
        assert_eq!(settings.environment.server_name, "erp-prod-01");
        assert_eq!(settings.environment.allowed_environments.len(), 3);
        assert_eq!(settings.listen.address, "0.0.0.0:8080");
        assert!(settings.traffic_log.enabled);
        assert_eq!(settings.traffic_log.storage, TrafficStorage::File);
        assert_eq!(settings.traffic_log.queue_capacity, 1000);
    }

    #[test]
    fn test_parse_full_settings() {
        let json = r#"{
            "Environment": { "ServerName": "x", "AllowedEnvironments": ["dev"] },
            "Listen": { "Address": "127.0.0.1:9000" },
            "Proxy": { "UseDefaultCredentials": true },
            "TrafficLog": {
                "Enabled": true,
                "Storage": "Sqlite",
                "QueueCapacity": 4,
                "BatchSize": 2,
                "FlushIntervalMs": 250,
                "DatabasePath": "x.db",
                "CaptureRequestBody": true,
                "MaxBodyCaptureSizeBytes": 128
            }
        }"#;
        let settings = Settings::from_json(json).unwrap();
        assert_eq!(settings.listen.address, "127.0.0.1:9000");
        assert!(settings.proxy.use_default_credentials);
        assert_eq!(settings.traffic_log.storage, TrafficStorage::Sqlite);
        assert_eq!(settings.traffic_log.queue_capacity, 4);
        assert_eq!(settings.traffic_log.batch_size, 2);
        assert!(settings.traffic_log.capture_request_body);
        assert!(!settings.traffic_log.capture_response_body);
        assert_eq!(settings.traffic_log.max_body_capture_size_bytes, 128);
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let json = r#"{
            "Environment": { "ServerName": "x", "AllowedEnvironments": ["dev"] },
            "Swagger": { "Enabled": true },
            "SomethingElse": 42
        }"#;
        assert!(Settings::from_json(json).is_ok());
    }

    #[test]
    fn test_empty_server_name_rejected() {
        let json = r#"{
            "Environment": { "ServerName": "  ", "AllowedEnvironments": ["dev"] }
        }"#;
        let result = Settings::from_json(json);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("ServerName"));
    }

    #[test]
    fn test_empty_allow_list_rejected() {
        let json = r#"{
            "Environment": { "ServerName": "x", "AllowedEnvironments": [] }
        }"#;
        assert!(Settings::from_json(json).is_err());
    }

    #[test]
    fn test_zero_queue_capacity_rejected() {
        let json = r#"{
            "Environment": { "ServerName": "x", "AllowedEnvironments": ["dev"] },
            "TrafficLog": { "QueueCapacity": 0 }
        }"#;
        assert!(Settings::from_json(json).is_err());
    }

    #[test]
    fn test_environment_allowed_case_insensitive() {
        let settings = Settings::from_json(sample_json()).unwrap();
        assert!(settings.is_environment_allowed("dev"));
        assert!(settings.is_environment_allowed("DEV"));
        assert!(settings.is_environment_allowed("600"));
        assert!(!settings.is_environment_allowed("qa"));
    }
}
