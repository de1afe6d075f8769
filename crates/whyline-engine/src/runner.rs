//! Guarded query execution
//!
//! Client-supplied SQL is always re-sanitized and adapted here before it can
//! reach an engine, whatever validation happened upstream.

use crate::adapter::{ExecuteError, QueryEngine, QueryOutput, QueryStats};
use crate::cache::QueryCache;
use serde::Serialize;
use std::time::Instant;
use whyline_core::{GuardrailSettings, ModelCatalog, QueryLog, QueryLogEntry, WarehouseTarget};
use whyline_sql::{adapt_validated_sql, sanitize_sql, GuardrailConfig, SqlValidationError};

/// Rows handed back for display; the total is still reported
pub const MAX_DISPLAY_ROWS: usize = 10_000;

/// Query run failures
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Validation(#[from] SqlValidationError),

    #[error(transparent)]
    Execution(#[from] ExecuteError),
}

/// SQL that passed the guardrails, with its dry-run estimate if any
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidatedQuery {
    pub sql: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bq_est_bytes: Option<u64>,
}

/// Result of a guarded run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunOutcome {
    /// The SQL actually executed
    pub sql: String,

    pub columns: Vec<String>,

    /// At most [`MAX_DISPLAY_ROWS`] rows
    pub rows: Vec<Vec<serde_json::Value>>,

    /// Row count before truncation
    pub total_rows: usize,

    pub stats: QueryStats,
    pub cache_hit: bool,
    pub latency_ms: f64,
}

impl RunOutcome {
    pub fn truncated(&self) -> bool {
        self.total_rows > self.rows.len()
    }
}

/// Sanitize, adapt, cache and audit queries against one engine
pub struct QueryRunner {
    engine: Box<dyn QueryEngine>,
    models: ModelCatalog,
    target: WarehouseTarget,
    config: GuardrailConfig,
    cache: QueryCache,
    log: Option<QueryLog>,
}

impl QueryRunner {
    pub fn new(
        engine: Box<dyn QueryEngine>,
        models: ModelCatalog,
        target: WarehouseTarget,
        guardrails: &GuardrailSettings,
    ) -> Self {
        let config = GuardrailConfig::for_engine(engine.engine(), &models, &target, guardrails);
        Self {
            engine,
            models,
            target,
            config,
            cache: QueryCache::default(),
            log: None,
        }
    }

    pub fn with_cache(mut self, cache: QueryCache) -> Self {
        self.cache = cache;
        self
    }

    /// Append an audit record for every executed or cached query
    pub fn with_query_log(mut self, log: QueryLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn guardrail_config(&self) -> &GuardrailConfig {
        &self.config
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    /// Guardrails plus a dry-run estimate where the engine supports it
    pub async fn validate(&self, sql: &str) -> Result<ValidatedQuery, RunError> {
        let sql = self.prepare(sql)?;

        let bq_est_bytes = match self.engine.estimate(&sql).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(engine = self.engine.name(), error = %e, "dry-run estimate failed");
                None
            }
        };

        Ok(ValidatedQuery { sql, bq_est_bytes })
    }

    /// Validate and execute, serving repeats from the query cache
    pub async fn run(&self, sql: &str, question: &str) -> Result<RunOutcome, RunError> {
        let sql = self.prepare(sql)?;
        let engine = self.config.engine;

        let (output, cache_hit, latency_ms) = match self.cache.get(engine, &sql) {
            Some(output) => {
                tracing::debug!(%engine, "query cache hit");
                (output, true, 0.0)
            }
            None => {
                let start = Instant::now();
                let output = self.engine.execute(&sql).await?;
                let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
                self.cache.insert(engine, &sql, output.clone());
                (output, false, latency_ms)
            }
        };

        self.audit(&sql, question, &output, cache_hit, latency_ms);

        let total_rows = output.total_rows();
        tracing::info!(
            %engine,
            rows = total_rows,
            latency_ms,
            cache_hit,
            "query executed"
        );

        let QueryOutput { stats, columns, mut rows } = output;
        rows.truncate(MAX_DISPLAY_ROWS);

        Ok(RunOutcome {
            sql,
            columns,
            rows,
            total_rows,
            stats,
            cache_hit,
            latency_ms,
        })
    }

    fn prepare(&self, sql: &str) -> Result<String, SqlValidationError> {
        sanitize_sql(sql, &self.config)
            .and_then(|sanitized| adapt_validated_sql(&sanitized, &self.config, Some(&self.models), &self.target))
            .inspect_err(|e| {
                tracing::warn!(engine = %self.config.engine, code = e.code(), "query rejected");
            })
    }

    fn audit(&self, sql: &str, question: &str, output: &QueryOutput, cache_hit: bool, latency_ms: f64) {
        let Some(log) = &self.log else {
            return;
        };

        let models: Vec<String> = self.config.allowed_models.iter().cloned().collect();

        let entry = QueryLogEntry {
            engine: self.config.engine,
            rows: output.total_rows(),
            latency_ms,
            models: &models,
            sql,
            question,
            bq_est_bytes: output.stats.bq_est_bytes,
            cache_hit: Some(cache_hit),
        };

        if let Err(e) = log.append(&entry) {
            tracing::warn!(error = %e, "failed to write query log");
        }
    }
}
