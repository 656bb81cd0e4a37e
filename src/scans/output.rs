//! Result output: engine events serialized as JSON lines into the scan log.

use std::io::{self, BufWriter, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::logs::LogSink;

/// Buffered log stream shared between a scan context and its output writer.
pub type SharedLog = Arc<Mutex<BufWriter<Box<dyn LogSink>>>>;

/// One result reported by the engine. The engine decides what a result is;
/// the worker only records it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEvent {
    pub template_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    pub target: String,
    /// Engine-defined event kind, e.g. `match` or `planned`.
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_at: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extracted: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl ResultEvent {
    pub fn new(template_id: impl Into<String>, target: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            template_id: template_id.into(),
            template_name: None,
            severity: None,
            target: target.into(),
            kind: kind.into(),
            matched_at: None,
            extracted: Vec::new(),
            timestamp: Utc::now(),
        }
    }
}

/// A line in the scan log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogEntry {
    Result {
        scan_id: i64,
        result: ResultEvent,
    },
    Failure {
        scan_id: i64,
        template_id: String,
        target: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

/// Sink the engine reports results and per-task failures to.
pub trait OutputWriter: Send + Sync {
    fn write(&self, event: &ResultEvent) -> io::Result<()>;

    /// Record a failed template/target task. Failures never abort the scan.
    fn failure(&self, template_id: &str, target: &str, error: &str) -> io::Result<()>;
}

/// Writes log entries into the scan's buffered log.
pub struct LogOutputWriter {
    scan_id: i64,
    log: SharedLog,
    results: AtomicU64,
    failures: AtomicU64,
}

impl LogOutputWriter {
    pub fn new(scan_id: i64, log: SharedLog) -> Self {
        Self {
            scan_id,
            log,
            results: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn results(&self) -> u64 {
        self.results.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    fn append(&self, entry: &LogEntry) -> io::Result<()> {
        let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        serde_json::to_writer(&mut *log, entry)?;
        log.write_all(b"\n")
    }
}

impl OutputWriter for LogOutputWriter {
    fn write(&self, event: &ResultEvent) -> io::Result<()> {
        self.append(&LogEntry::Result {
            scan_id: self.scan_id,
            result: event.clone(),
        })?;
        self.results.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn failure(&self, template_id: &str, target: &str, error: &str) -> io::Result<()> {
        self.append(&LogEntry::Failure {
            scan_id: self.scan_id,
            template_id: template_id.to_string(),
            target: target.to_string(),
            error: error.to_string(),
            timestamp: Utc::now(),
        })?;
        self.failures.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
