//! SQLite storage for traffic log batches
//!
//! A single `ProxyTrafficLogs` table with indexes on timestamp, trace id,
//! and endpoint name. Each flush writes its batch inside one transaction.

use rusqlite::{params, Connection};
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use super::worker::TrafficStore;
use super::TrafficLogEntry;
use crate::error::Result;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS ProxyTrafficLogs (
    Id             INTEGER PRIMARY KEY AUTOINCREMENT,
    TraceId        TEXT NOT NULL,
    Timestamp      TEXT NOT NULL,
    Method         TEXT NOT NULL,
    Path           TEXT NOT NULL,
    QueryString    TEXT NOT NULL,
    Environment    TEXT NOT NULL,
    EndpointName   TEXT NOT NULL,
    TargetUrl      TEXT NOT NULL,
    StatusCode     INTEGER NOT NULL,
    RequestSize    INTEGER NOT NULL,
    ResponseSize   INTEGER NOT NULL,
    DurationMs     INTEGER NOT NULL,
    Username       TEXT,
    ClientIp       TEXT NOT NULL,
    RequestBody    TEXT,
    ResponseBody   TEXT,
    RequestHeaders TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS IX_ProxyTrafficLogs_Timestamp ON ProxyTrafficLogs (Timestamp);
CREATE INDEX IF NOT EXISTS IX_ProxyTrafficLogs_TraceId ON ProxyTrafficLogs (TraceId);
CREATE INDEX IF NOT EXISTS IX_ProxyTrafficLogs_EndpointName ON ProxyTrafficLogs (EndpointName);
";

const INSERT: &str = "
INSERT INTO ProxyTrafficLogs (
    TraceId, Timestamp, Method, Path, QueryString, Environment, EndpointName,
    TargetUrl, StatusCode, RequestSize, ResponseSize, DurationMs, Username,
    ClientIp, RequestBody, ResponseBody, RequestHeaders
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)";

pub(crate) struct SqlDriver {
    conn: Mutex<Connection>,
}

impl SqlDriver {
    pub(crate) fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    #[cfg(test)]
    fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl TrafficStore for SqlDriver {
    fn write_batch(&self, batch: &[TrafficLogEntry]) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(INSERT)?;
            for entry in batch {
                let headers = serde_json::to_string(&entry.request_headers)?;
                stmt.execute(params![
                    entry.trace_id,
                    entry.timestamp,
                    entry.method,
                    entry.path,
                    entry.query,
                    entry.env,
                    entry.endpoint_name,
                    entry.target_url,
                    entry.status_code,
                    entry.request_size,
                    entry.response_size,
                    entry.duration_ms,
                    entry.username,
                    entry.client_ip,
                    entry.request_body,
                    entry.response_body,
                    headers,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn entry(id: &str, status: u16) -> TrafficLogEntry {
        let mut headers = HashMap::new();
        headers.insert("accept".to_string(), "application/json".to_string());
        TrafficLogEntry {
            trace_id: id.to_string(),
            timestamp: "2026-01-01T00:00:00Z".to_string(),
            method: "GET".to_string(),
            path: "/api/dev/Items".to_string(),
            query: "$top=2".to_string(),
            env: "dev".to_string(),
            endpoint_name: "Items".to_string(),
            target_url: "http://up:8020/items".to_string(),
            status_code: status,
            request_size: 0,
            response_size: 42,
            duration_ms: 7,
            username: Some("alice".to_string()),
            client_ip: "10.0.0.1".to_string(),
            request_body: None,
            response_body: None,
            request_headers: headers,
        }
    }

    #[test]
    fn test_batch_is_inserted() {
        let driver = SqlDriver::in_memory().unwrap();
        driver
            .write_batch(&[entry("a", 200), entry("b", 404)])
            .unwrap();

        let conn = driver.conn.lock().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM ProxyTrafficLogs", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 2);

        let (trace_id, status, headers): (String, u16, String) = conn
            .query_row(
                "SELECT TraceId, StatusCode, RequestHeaders FROM ProxyTrafficLogs ORDER BY Id LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!(trace_id, "a");
        assert_eq!(status, 200);
        let parsed: HashMap<String, String> = serde_json::from_str(&headers).unwrap();
        assert_eq!(parsed.get("accept").unwrap(), "application/json");
    }

    #[test]
    fn test_nullable_columns() {
        let driver = SqlDriver::in_memory().unwrap();
        let mut e = entry("c", 200);
        e.username = None;
        e.request_body = None;
        driver.write_batch(&[e]).unwrap();

        let conn = driver.conn.lock().unwrap();
        let username: Option<String> = conn
            .query_row("SELECT Username FROM ProxyTrafficLogs", [], |row| row.get(0))
            .unwrap();
        assert!(username.is_none());
    }

    #[test]
    fn test_indexes_exist() {
        let driver = SqlDriver::in_memory().unwrap();
        let conn = driver.conn.lock().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name LIKE 'IX_ProxyTrafficLogs_%'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 3);
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let driver = SqlDriver::in_memory().unwrap();
        driver.write_batch(&[]).unwrap();
        let conn = driver.conn.lock().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM ProxyTrafficLogs", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
