//! NDJSON file storage for traffic log batches
//!
//! One JSON object per line. Files are named with a prefix and a UTC
//! timestamp; when the projected size after the next batch would exceed
//! the ceiling, a fresh file is opened and the oldest files beyond the
//! retention count are deleted.

use chrono::Utc;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::worker::TrafficStore;
use super::TrafficLogEntry;
use crate::error::Result;

struct ActiveFile {
    file: File,
    written: u64,
}

pub(crate) struct FileDriver {
    directory: PathBuf,
    prefix: String,
    max_file_size: u64,
    max_file_count: usize,
    active: Mutex<ActiveFile>,
}

impl FileDriver {
    pub(crate) fn new(
        directory: &Path,
        prefix: &str,
        max_file_size_mb: u64,
        max_file_count: usize,
    ) -> Result<Self> {
        fs::create_dir_all(directory)?;
        let (file, _) = open_log_file(directory, prefix)?;
        Ok(Self {
            directory: directory.to_path_buf(),
            prefix: prefix.to_string(),
            max_file_size: max_file_size_mb.saturating_mul(1024 * 1024).max(1),
            max_file_count: max_file_count.max(1),
            active: Mutex::new(ActiveFile { file, written: 0 }),
        })
    }

    fn rollover(&self, active: &mut ActiveFile) -> Result<()> {
        let (file, path) = open_log_file(&self.directory, &self.prefix)?;
        active.file = file;
        active.written = 0;
        tracing::info!(path = %path.display(), "Traffic log rolled over");
        self.prune_old_files();
        Ok(())
    }

    /// Delete the oldest log files beyond the retention count. Name order
    /// is chronological because names embed a sortable UTC stamp.
    fn prune_old_files(&self) {
        let Ok(entries) = fs::read_dir(&self.directory) else {
            return;
        };
        let mut files: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                p.is_file()
                    && p.file_name()
                        .and_then(|n| n.to_str())
                        .map(|n| n.starts_with(self.prefix.as_str()))
                        .unwrap_or(false)
            })
            .collect();
        files.sort();
        while files.len() > self.max_file_count {
            let oldest = files.remove(0);
            match fs::remove_file(&oldest) {
                Ok(()) => tracing::info!(path = %oldest.display(), "Deleted old traffic log"),
                Err(e) => {
                    tracing::warn!(path = %oldest.display(), error = %e, "Failed to delete old traffic log");
                }
            }
        }
    }
}

impl TrafficStore for FileDriver {
    fn write_batch(&self, batch: &[TrafficLogEntry]) -> Result<()> {
        let mut lines = Vec::with_capacity(batch.len() * 256);
        for entry in batch {
            serde_json::to_writer(&mut lines, entry)?;
            lines.push(b'\n');
        }

        let mut active = self.active.lock().unwrap();
        if active.written + lines.len() as u64 > self.max_file_size && active.written > 0 {
            self.rollover(&mut active)?;
        }
        active.file.write_all(&lines)?;
        active.file.flush()?;
        active.written += lines.len() as u64;
        Ok(())
    }
}

/// Open a fresh log file named `{prefix}_{yyyyMMdd_HHmmss}.log`,
/// suffixing a counter if the second already has a file
fn open_log_file(directory: &Path, prefix: &str) -> Result<(File, PathBuf)> {
    let stamp = Utc::now().format("%Y%m%d_%H%M%S");
    let mut path = directory.join(format!("{}_{}.log", prefix, stamp));
    let mut counter = 1;
    while path.exists() {
        path = directory.join(format!("{}_{}_{}.log", prefix, stamp, counter));
        counter += 1;
    }
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    Ok((file, path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(id: &str) -> TrafficLogEntry {
        TrafficLogEntry {
            trace_id: id.to_string(),
            method: "GET".to_string(),
            status_code: 200,
            ..TrafficLogEntry::default()
        }
    }

    fn log_files(dir: &Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = fs::read_dir(dir)
            .unwrap()
            .flatten()
            .map(|e| e.path())
            .collect();
        files.sort();
        files
    }

    #[test]
    fn test_writes_one_json_object_per_line() {
        let tmp = TempDir::new().unwrap();
        let driver = FileDriver::new(tmp.path(), "traffic", 50, 10).unwrap();
        driver.write_batch(&[entry("a"), entry("b")]).unwrap();

        let files = log_files(tmp.path());
        assert_eq!(files.len(), 1);
        let content = fs::read_to_string(&files[0]).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            assert!(value.get("traceId").is_some());
        }
    }

    #[test]
    fn test_file_name_carries_prefix_and_stamp() {
        let tmp = TempDir::new().unwrap();
        let driver = FileDriver::new(tmp.path(), "traffic", 50, 10).unwrap();
        driver.write_batch(&[entry("a")]).unwrap();

        let files = log_files(tmp.path());
        let name = files[0].file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("traffic_"));
        assert!(name.ends_with(".log"));
        // traffic_YYYYMMDD_HHMMSS.log
        assert_eq!(name.len(), "traffic_".len() + 15 + ".log".len());
    }

    #[test]
    fn test_rollover_and_pruning() {
        let tmp = TempDir::new().unwrap();
        // Shrink the rollover threshold so every batch rolls the file
        let driver = FileDriver::new(tmp.path(), "traffic", 1, 2).unwrap();
        let driver = FileDriver {
            max_file_size: 64,
            ..driver
        };

        for i in 0..5 {
            driver.write_batch(&[entry(&format!("entry-{}", i))]).unwrap();
        }

        let files = log_files(tmp.path());
        // Retention keeps at most max_file_count files plus the active one
        assert!(files.len() <= 3, "expected pruning, found {}", files.len());
    }

    #[test]
    fn test_small_batches_share_one_file() {
        let tmp = TempDir::new().unwrap();
        let driver = FileDriver::new(tmp.path(), "traffic", 50, 10).unwrap();
        driver.write_batch(&[entry("a")]).unwrap();
        driver.write_batch(&[entry("b")]).unwrap();
        assert_eq!(log_files(tmp.path()).len(), 1);
    }
}
