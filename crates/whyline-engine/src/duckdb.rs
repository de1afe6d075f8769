//! DuckDB query engine
//!
//! Runs against the exported warehouse file. Each query opens its own
//! connection on a blocking thread (read-only unless configured otherwise)
//! and applies the session PRAGMAs first; PRAGMA failures are logged and
//! ignored.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let engine = DuckDbEngine::from_settings(&settings.duckdb)?;
//! let output = engine.execute("SELECT * FROM mart_weather_impacts LIMIT 5").await?;
//! ```

use crate::adapter::{ExecuteError, QueryEngine, QueryOutput};
use std::path::Path;
use whyline_core::{DuckDbSettings, Engine};

#[cfg(feature = "duckdb")]
use ::duckdb::{
    types::{TimeUnit, Value as DuckValue},
    AccessMode, Config, Connection,
};

#[cfg(not(feature = "duckdb"))]
const NOT_COMPILED: &str = "DuckDB support not compiled. Rebuild with: cargo build --features duckdb";

/// DuckDB query engine over a local database file
#[derive(Debug, Clone)]
pub struct DuckDbEngine {
    settings: DuckDbSettings,
}

impl DuckDbEngine {
    /// Engine for the configured database file, which must exist
    #[cfg(feature = "duckdb")]
    pub fn from_settings(settings: &DuckDbSettings) -> Result<Self, ExecuteError> {
        if !settings.path.exists() {
            return Err(ExecuteError::ConfigError(format!(
                "DuckDB file not found at {}. Set DUCKDB_PATH or duckdb.path",
                settings.path.display()
            )));
        }

        tracing::info!(path = %settings.path.display(), read_only = settings.read_only, "using DuckDB warehouse");
        Ok(Self {
            settings: settings.clone(),
        })
    }

    #[cfg(not(feature = "duckdb"))]
    pub fn from_settings(settings: &DuckDbSettings) -> Result<Self, ExecuteError> {
        let _ = settings;
        Err(ExecuteError::ConfigError(NOT_COMPILED.to_string()))
    }

    pub fn path(&self) -> &Path {
        &self.settings.path
    }

    pub fn read_only(&self) -> bool {
        self.settings.read_only
    }
}

#[cfg(feature = "duckdb")]
fn open_connection(settings: &DuckDbSettings) -> Result<Connection, ExecuteError> {
    let mode = if settings.read_only {
        AccessMode::ReadOnly
    } else {
        AccessMode::ReadWrite
    };
    let config = Config::default()
        .access_mode(mode)
        .map_err(|e| ExecuteError::ConfigError(e.to_string()))?;

    let connection = Connection::open_with_flags(&settings.path, config).map_err(|e| {
        ExecuteError::ConfigError(format!("Failed to open {}: {}", settings.path.display(), e))
    })?;

    let pragmas = [
        format!("PRAGMA threads={};", settings.threads),
        format!("PRAGMA memory_limit='{}';", settings.memory_limit),
        "PRAGMA enable_progress_bar=false;".to_string(),
    ];
    for pragma in &pragmas {
        if let Err(e) = connection.execute_batch(pragma) {
            tracing::debug!(pragma = %pragma, error = %e, "DuckDB PRAGMA failed");
        }
    }

    Ok(connection)
}

#[cfg(feature = "duckdb")]
fn run_query(settings: &DuckDbSettings, sql: &str) -> Result<QueryOutput, ExecuteError> {
    let connection = open_connection(settings)?;
    let query_error = |e: ::duckdb::Error| ExecuteError::QueryError(e.to_string());

    let mut statement = connection.prepare(sql).map_err(query_error)?;
    let mut result = statement.query([]).map_err(query_error)?;
    let columns = result.as_ref().map(|s| s.column_names()).unwrap_or_default();

    let mut rows = Vec::new();
    while let Some(row) = result.next().map_err(query_error)? {
        let mut values = Vec::with_capacity(columns.len());
        for index in 0..columns.len() {
            let value: DuckValue = row.get(index).map_err(query_error)?;
            values.push(to_json(value));
        }
        rows.push(values);
    }

    Ok(QueryOutput::new(columns, rows))
}

/// DuckDB value as JSON; dates and timestamps become ISO strings
#[cfg(feature = "duckdb")]
fn to_json(value: DuckValue) -> serde_json::Value {
    use serde_json::Value;

    match value {
        DuckValue::Null => Value::Null,
        DuckValue::Boolean(b) => Value::Bool(b),
        DuckValue::TinyInt(n) => Value::from(n),
        DuckValue::SmallInt(n) => Value::from(n),
        DuckValue::Int(n) => Value::from(n),
        DuckValue::BigInt(n) => Value::from(n),
        DuckValue::HugeInt(n) => i64::try_from(n).map_or_else(|_| Value::String(n.to_string()), Value::from),
        DuckValue::UTinyInt(n) => Value::from(n),
        DuckValue::USmallInt(n) => Value::from(n),
        DuckValue::UInt(n) => Value::from(n),
        DuckValue::UBigInt(n) => Value::from(n),
        DuckValue::Float(f) => Value::from(f64::from(f)),
        DuckValue::Double(f) => Value::from(f),
        DuckValue::Decimal(d) => Value::String(d.to_string()),
        DuckValue::Text(s) | DuckValue::Enum(s) => Value::String(s),
        DuckValue::Blob(bytes) => Value::String(hex::encode(bytes)),
        DuckValue::Date32(days) => chrono::NaiveDate::from_ymd_opt(1970, 1, 1)
            .and_then(|epoch| epoch.checked_add_signed(chrono::Duration::days(i64::from(days))))
            .map_or(Value::Null, |date| Value::String(date.to_string())),
        DuckValue::Timestamp(unit, raw) => {
            let micros = match unit {
                TimeUnit::Second => raw.saturating_mul(1_000_000),
                TimeUnit::Millisecond => raw.saturating_mul(1_000),
                TimeUnit::Microsecond => raw,
                TimeUnit::Nanosecond => raw / 1_000,
            };
            chrono::DateTime::from_timestamp_micros(micros)
                .map_or(Value::Null, |ts| Value::String(ts.naive_utc().to_string()))
        }
        DuckValue::List(items) => Value::Array(items.into_iter().map(to_json).collect()),
        other => Value::String(format!("{:?}", other)),
    }
}

#[async_trait::async_trait]
impl QueryEngine for DuckDbEngine {
    fn name(&self) -> &'static str {
        "DuckDB"
    }

    fn engine(&self) -> Engine {
        Engine::DuckDb
    }

    #[cfg(feature = "duckdb")]
    async fn execute(&self, sql: &str) -> Result<QueryOutput, ExecuteError> {
        let settings = self.settings.clone();
        let sql = sql.to_string();

        let output = tokio::task::spawn_blocking(move || run_query(&settings, &sql))
            .await
            .map_err(|e| ExecuteError::QueryError(format!("DuckDB worker failed: {}", e)))??;

        tracing::debug!(rows = output.total_rows(), "DuckDB query complete");
        Ok(output)
    }

    #[cfg(not(feature = "duckdb"))]
    async fn execute(&self, _sql: &str) -> Result<QueryOutput, ExecuteError> {
        Err(ExecuteError::ConfigError(NOT_COMPILED.to_string()))
    }
}

#[cfg(all(test, not(feature = "duckdb")))]
mod tests {
    use super::*;

    fn settings_for(path: &str) -> DuckDbSettings {
        DuckDbSettings {
            path: path.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_constructor_requires_feature() {
        let err = DuckDbEngine::from_settings(&settings_for("data/warehouse.duckdb")).unwrap_err();
        assert!(matches!(err, ExecuteError::ConfigError(_)));
        assert!(err.to_string().contains("--features duckdb"));
    }
}

#[cfg(all(test, feature = "duckdb"))]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::path::PathBuf;

    fn settings_for(path: impl Into<PathBuf>) -> DuckDbSettings {
        DuckDbSettings {
            path: path.into(),
            ..Default::default()
        }
    }

    fn warehouse(dir: &Path) -> PathBuf {
        let path = dir.join("warehouse.duckdb");
        let connection = Connection::open(&path).unwrap();
        connection
            .execute_batch(
                "CREATE TABLE mart_weather_impacts AS \
                 SELECT '15' AS route_id, 'snow' AS precip_bin, -0.125::DOUBLE AS delta_pct_on_time, \
                        DATE '2024-01-02' AS service_date_mst, 42::BIGINT AS trips",
            )
            .unwrap();
        path
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = DuckDbEngine::from_settings(&settings_for("/nonexistent/warehouse.duckdb")).unwrap_err();
        assert!(matches!(err, ExecuteError::ConfigError(msg) if msg.contains("DUCKDB_PATH")));
    }

    #[tokio::test]
    async fn test_execute_reads_rows_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let engine = DuckDbEngine::from_settings(&settings_for(warehouse(dir.path()))).unwrap();

        let output = engine
            .execute("SELECT route_id, delta_pct_on_time, service_date_mst, trips FROM mart_weather_impacts")
            .await
            .unwrap();

        assert_eq!(
            output.columns,
            vec!["route_id", "delta_pct_on_time", "service_date_mst", "trips"]
        );
        assert_eq!(
            output.rows,
            vec![vec![json!("15"), json!(-0.125), json!("2024-01-02"), json!(42)]]
        );
    }

    #[tokio::test]
    async fn test_read_only_connection_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let engine = DuckDbEngine::from_settings(&settings_for(warehouse(dir.path()))).unwrap();
        assert!(engine.read_only());

        let err = engine.execute("DELETE FROM mart_weather_impacts").await.unwrap_err();
        assert!(matches!(err, ExecuteError::QueryError(_)));
    }

    #[tokio::test]
    async fn test_sql_errors_are_query_errors() {
        let dir = tempfile::tempdir().unwrap();
        let engine = DuckDbEngine::from_settings(&settings_for(warehouse(dir.path()))).unwrap();

        let err = engine.execute("SELECT * FROM mart_missing").await.unwrap_err();
        assert!(matches!(err, ExecuteError::QueryError(_)));
    }
}
