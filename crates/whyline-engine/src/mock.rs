//! Mock query engine for testing
//!
//! Returns canned results without connecting to any warehouse. Results are
//! keyed by whitespace-collapsed SQL; anything unregistered gets the default
//! result.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use whyline_engine::{MockEngine, QueryEngine, QueryOutput};
//!
//! let engine = MockEngine::new(Engine::DuckDb)
//!     .with_default(QueryOutput::new(vec!["stop_id".into()], vec![vec![json!("A")]]));
//! engine.add_result("SELECT 1\nLIMIT 5000", QueryOutput::default()).await;
//!
//! let output = engine.execute("SELECT stop_id FROM mart_access_score_by_stop").await?;
//! assert_eq!(engine.call_count(), 1);
//! ```
//!
//! ## Simulating Failures
//!
//! ```rust,ignore
//! let engine = MockEngine::new(Engine::BigQuery)
//!     .with_failure(ExecuteError::QueryError("boom".into()))
//!     .with_estimate(2_048);
//! ```

use crate::adapter::{ExecuteError, QueryEngine, QueryOutput};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use whyline_core::{collapse_whitespace, Engine};

/// In-memory query engine
pub struct MockEngine {
    engine: Engine,

    /// Canned results by collapsed SQL
    results: Arc<RwLock<HashMap<String, QueryOutput>>>,

    /// Returned for SQL with no canned result
    default_result: QueryOutput,

    /// Error returned by every `execute` call
    failure: Option<ExecuteError>,

    /// Dry-run estimate reported by `estimate`
    estimate: Option<u64>,

    /// Simulated latency (milliseconds)
    latency_ms: u64,

    calls: Arc<AtomicUsize>,
}

impl MockEngine {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            results: Arc::new(RwLock::new(HashMap::new())),
            default_result: QueryOutput::default(),
            failure: None,
            estimate: None,
            latency_ms: 0,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Register the result for one SQL string
    pub async fn add_result(&self, sql: &str, output: QueryOutput) {
        self.results.write().await.insert(collapse_whitespace(sql), output);
    }

    pub fn with_default(mut self, output: QueryOutput) -> Self {
        self.default_result = output;
        self
    }

    /// Fail every execution with `error`
    pub fn with_failure(mut self, error: ExecuteError) -> Self {
        self.failure = Some(error);
        self
    }

    pub fn with_estimate(mut self, bytes: u64) -> Self {
        self.estimate = Some(bytes);
        self
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// Number of `execute` calls so far
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn simulate_latency(&self) {
        if self.latency_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.latency_ms)).await;
        }
    }
}

impl Clone for MockEngine {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine,
            results: Arc::clone(&self.results),
            default_result: self.default_result.clone(),
            failure: self.failure.clone(),
            estimate: self.estimate,
            latency_ms: self.latency_ms,
            calls: Arc::clone(&self.calls),
        }
    }
}

#[async_trait::async_trait]
impl QueryEngine for MockEngine {
    fn name(&self) -> &'static str {
        "Mock"
    }

    fn engine(&self) -> Engine {
        self.engine
    }

    async fn execute(&self, sql: &str) -> Result<QueryOutput, ExecuteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        if let Some(error) = &self.failure {
            return Err(error.clone());
        }

        let results = self.results.read().await;
        let mut output = results
            .get(&collapse_whitespace(sql))
            .cloned()
            .unwrap_or_else(|| self.default_result.clone());

        if let Some(bytes) = self.estimate {
            output.stats.bq_est_bytes = Some(bytes);
        }
        Ok(output)
    }

    async fn estimate(&self, _sql: &str) -> Result<Option<u64>, ExecuteError> {
        Ok(self.estimate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_canned_and_default_results() {
        let engine = MockEngine::new(Engine::DuckDb)
            .with_default(QueryOutput::new(vec!["x".into()], vec![vec![json!(0)]]));
        engine
            .add_result("SELECT 1", QueryOutput::new(vec!["one".into()], vec![vec![json!(1)]]))
            .await;

        let output = engine.execute("SELECT\n  1").await.unwrap();
        assert_eq!(output.columns, vec!["one"]);

        let output = engine.execute("SELECT 2").await.unwrap();
        assert_eq!(output.columns, vec!["x"]);
        assert_eq!(engine.call_count(), 2);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let engine = MockEngine::new(Engine::BigQuery).with_failure(ExecuteError::QueryError("boom".into()));
        let err = engine.execute("SELECT 1").await.unwrap_err();
        assert_eq!(err, ExecuteError::QueryError("boom".into()));
        assert_eq!(engine.call_count(), 1);
    }

    #[tokio::test]
    async fn test_estimate_is_reported() {
        let engine = MockEngine::new(Engine::BigQuery).with_estimate(4096);
        assert_eq!(engine.estimate("SELECT 1").await.unwrap(), Some(4096));
        let output = engine.execute("SELECT 1").await.unwrap();
        assert_eq!(output.stats.bq_est_bytes, Some(4096));

        assert_eq!(MockEngine::new(Engine::DuckDb).estimate("SELECT 1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_clones_share_call_count() {
        let engine = MockEngine::new(Engine::DuckDb);
        let clone = engine.clone();
        clone.execute("SELECT 1").await.unwrap();
        assert_eq!(engine.call_count(), 1);
    }
}
