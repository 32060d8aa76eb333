#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Structured JSON logging shared across the Worldbox modules.

use std::{
    collections::VecDeque,
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Log severity level.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    /// Debug information.
    Debug,
    /// Informational events.
    Info,
    /// Warning indicator.
    Warn,
    /// Error indicator.
    Error,
}

/// Structured log record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    /// Timestamp in ISO8601.
    pub timestamp: DateTime<Utc>,
    /// Module emitting the log.
    pub module: String,
    /// Severity.
    pub level: LogLevel,
    /// Human-readable message.
    pub message: String,
    /// Arbitrary JSON payload for metrics/fields.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl LogRecord {
    /// Creates a record with the provided info.
    #[must_use]
    pub fn new(module: impl Into<String>, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            module: module.into(),
            level,
            message: message.into(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Attaches a JSON metadata object to the record.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        if let Some(map) = metadata.as_object() {
            self.metadata = map.clone();
        }
        self
    }
}

/// Destination for structured log records.
pub trait LogSink: Send + Sync {
    /// Writes one record to the sink.
    fn log(&self, record: &LogRecord) -> Result<()>;
}

/// Thread-safe JSONL logger with append-only semantics.
#[derive(Debug)]
pub struct JsonLogger {
    path: PathBuf,
    writer: Mutex<File>,
}

impl JsonLogger {
    /// Creates or opens a logger at the desired path.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(file),
        })
    }

    /// Returns the underlying file path (useful for tests).
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogSink for JsonLogger {
    fn log(&self, record: &LogRecord) -> Result<()> {
        let mut writer = self.writer.lock();
        serde_json::to_writer(&mut *writer, record)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }
}

/// Bounded in-memory log ring. Backs the studio status view and tests.
#[derive(Debug)]
pub struct MemoryLogger {
    records: Mutex<VecDeque<LogRecord>>,
    retain: usize,
}

impl MemoryLogger {
    /// Creates a ring keeping at most `retain` records.
    #[must_use]
    pub fn new(retain: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::with_capacity(retain.min(256))),
            retain: retain.max(1),
        }
    }

    /// Returns the most recent records, oldest first.
    #[must_use]
    pub fn tail(&self, count: usize) -> Vec<LogRecord> {
        let records = self.records.lock();
        let skip = records.len().saturating_sub(count);
        records.iter().skip(skip).cloned().collect()
    }

    /// Number of retained records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether the ring is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl LogSink for MemoryLogger {
    fn log(&self, record: &LogRecord) -> Result<()> {
        let mut records = self.records.lock();
        if records.len() >= self.retain {
            records.pop_front();
        }
        records.push_back(record.clone());
        Ok(())
    }
}

/// Copies every record to several sinks; the first failure wins.
pub struct FanoutSink {
    sinks: Vec<std::sync::Arc<dyn LogSink>>,
}

impl FanoutSink {
    /// Creates a fan-out over the given sinks.
    #[must_use]
    pub fn new(sinks: Vec<std::sync::Arc<dyn LogSink>>) -> Self {
        Self { sinks }
    }
}

impl LogSink for FanoutSink {
    fn log(&self, record: &LogRecord) -> Result<()> {
        for sink in &self.sinks {
            sink.log(record)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn json_logger_writes_lines() {
        let dir = tempdir().unwrap();
        let logger = JsonLogger::new(dir.path().join("test.log")).unwrap();
        logger
            .log(&LogRecord::new("module", LogLevel::Info, "hello"))
            .unwrap();
        let content = fs::read_to_string(logger.path()).unwrap();
        assert!(content.contains("\"message\":\"hello\""));
    }

    #[test]
    fn memory_logger_retains_tail() {
        let logger = MemoryLogger::new(2);
        for n in 0..4 {
            logger
                .log(&LogRecord::new("module", LogLevel::Debug, format!("msg-{n}")))
                .unwrap();
        }
        let tail = logger.tail(10);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].message, "msg-2");
        assert_eq!(tail[1].message, "msg-3");
    }

    #[test]
    fn fanout_reaches_every_sink() {
        let a = std::sync::Arc::new(MemoryLogger::new(4));
        let b = std::sync::Arc::new(MemoryLogger::new(4));
        let fanout = FanoutSink::new(vec![a.clone(), b.clone()]);
        fanout
            .log(&LogRecord::new("module", LogLevel::Info, "copied"))
            .unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn record_metadata_builder() {
        let record = LogRecord::new("module", LogLevel::Warn, "late result")
            .with_metadata(serde_json::json!({ "lane": "dictate" }));
        assert_eq!(record.metadata.get("lane").unwrap(), "dictate");
    }
}
