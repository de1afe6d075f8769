//! Query audit log (queries.jsonl)
//!
//! One compact JSON record per executed query. The SQL and the question are
//! stored as SHA-256 digests only.

use crate::cache::sha256_hex;
use crate::engine::Engine;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// A single audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryLogRecord {
    /// UTC timestamp (ISO 8601, second precision)
    pub ts_utc: String,

    pub engine: Engine,

    /// Rows returned
    pub rows: usize,

    /// Execution latency, rounded to two decimals
    pub latency_ms: f64,

    /// Allow-listed models available to the query, sorted and unique
    pub model_names: Vec<String>,

    pub sql_hash: String,

    pub question_hash: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bq_est_bytes: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_hit: Option<bool>,
}

/// Inputs for one audit record
#[derive(Debug, Clone)]
pub struct QueryLogEntry<'a> {
    pub engine: Engine,
    pub rows: usize,
    pub latency_ms: f64,
    pub models: &'a [String],
    /// Sanitized SQL that was executed
    pub sql: &'a str,
    pub question: &'a str,
    pub bq_est_bytes: Option<u64>,
    pub cache_hit: Option<bool>,
}

impl QueryLogRecord {
    pub fn from_entry(entry: &QueryLogEntry<'_>) -> Self {
        let model_names: BTreeSet<&String> = entry.models.iter().collect();
        Self {
            ts_utc: chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            engine: entry.engine,
            rows: entry.rows,
            latency_ms: (entry.latency_ms * 100.0).round() / 100.0,
            model_names: model_names.into_iter().cloned().collect(),
            sql_hash: sha256_hex(entry.sql),
            question_hash: sha256_hex(entry.question),
            bq_est_bytes: entry.bq_est_bytes,
            cache_hit: entry.cache_hit,
        }
    }
}

/// Append-only JSONL audit log with size-based rotation
#[derive(Debug)]
pub struct QueryLog {
    path: PathBuf,
    max_bytes: u64,
    lock: Mutex<()>,
}

impl QueryLog {
    pub fn new(path: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            path: path.into(),
            max_bytes,
            lock: Mutex::new(()),
        }
    }

    pub fn from_settings(settings: &crate::config::LoggingSettings) -> Self {
        Self::new(&settings.query_log_path, settings.max_log_bytes)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a record, rotating the file first if it grew past the size cap
    pub fn append(&self, entry: &QueryLogEntry<'_>) -> Result<QueryLogRecord, AuditError> {
        let record = QueryLogRecord::from_entry(entry);
        let line = serde_json::to_string(&record).map_err(|e| AuditError::Serialize(e.to_string()))?;

        let _guard = self.lock.lock().map_err(|_| AuditError::Poisoned)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
            }
        }

        self.rotate_if_needed()?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_error(e))?;
        writeln!(file, "{}", line).map_err(|e| self.io_error(e))?;

        Ok(record)
    }

    fn rotate_if_needed(&self) -> Result<Option<PathBuf>, AuditError> {
        let size = match std::fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(_) => return Ok(None),
        };
        if size <= self.max_bytes {
            return Ok(None);
        }

        let rotated = self.rotated_path(&chrono::Utc::now().format("%Y%m%d-%H%M%S").to_string());
        std::fs::rename(&self.path, &rotated).map_err(|e| self.io_error(e))?;
        tracing::info!(from = %self.path.display(), to = %rotated.display(), "rotated query log");
        Ok(Some(rotated))
    }

    fn rotated_path(&self, timestamp: &str) -> PathBuf {
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "queries".to_string());
        let name = match self.path.extension() {
            Some(ext) => format!("{}-{}.{}", stem, timestamp, ext.to_string_lossy()),
            None => format!("{}-{}", stem, timestamp),
        };
        self.path.with_file_name(name)
    }

    fn io_error(&self, error: std::io::Error) -> AuditError {
        AuditError::Io(self.path.display().to_string(), error.to_string())
    }
}

/// Audit log errors
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("Failed to write query log {0}: {1}")]
    Io(String, String),

    #[error("Failed to serialize query log record: {0}")]
    Serialize(String),

    #[error("Query log lock poisoned")]
    Poisoned,
}
