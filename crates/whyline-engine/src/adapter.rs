//! Query engine trait for executing guarded SQL

use serde::{Deserialize, Serialize};
use whyline_core::Engine;

/// Per-query execution statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryStats {
    /// Rows returned by the engine
    pub rows: usize,

    /// Dry-run bytes estimate (BigQuery only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bq_est_bytes: Option<u64>,
}

/// Result of one query: column names plus JSON row values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryOutput {
    pub stats: QueryStats,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl QueryOutput {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<serde_json::Value>>) -> Self {
        Self {
            stats: QueryStats {
                rows: rows.len(),
                bq_est_bytes: None,
            },
            columns,
            rows,
        }
    }

    pub fn with_estimate(mut self, bytes: u64) -> Self {
        self.stats.bq_est_bytes = Some(bytes);
        self
    }

    pub fn total_rows(&self) -> usize {
        self.rows.len()
    }
}

/// Errors that can occur while executing a query
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecuteError {
    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Query failed: {0}")]
    QueryError(String),

    #[error("Query would bill {estimated} bytes, above the {limit} byte cap")]
    BytesBilledExceeded { estimated: u64, limit: u64 },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Backend that executes already-sanitized SQL
#[async_trait::async_trait]
pub trait QueryEngine: Send + Sync {
    /// Display name (e.g., "BigQuery", "Mock")
    fn name(&self) -> &'static str;

    /// Dialect the engine expects
    fn engine(&self) -> Engine;

    /// Run the query and return every row
    async fn execute(&self, sql: &str) -> Result<QueryOutput, ExecuteError>;

    /// Bytes the query would scan, for engines that can dry-run
    async fn estimate(&self, _sql: &str) -> Result<Option<u64>, ExecuteError> {
        Ok(None)
    }
}
