//! Integration tests for guarded query execution
//!
//! Everything here runs against [`MockEngine`], plus a DuckDB case when the
//! `duckdb` feature is on. BigQuery execution needs real credentials and is
//! marked `#[ignore]`:
//!
//! ```bash
//! GOOGLE_APPLICATION_CREDENTIALS=/path/to/key.json \
//! GCP_PROJECT_ID=whyline-denver \
//! cargo test -p whyline-engine --features bigquery --test integration_tests -- --ignored
//! ```

use pretty_assertions::assert_eq;
use serde_json::json;
use whyline_core::{
    Engine, GuardrailSettings, ModelCatalog, ModelInfo, QueryLog, QueryLogRecord, WarehouseTarget,
    ALLOWLISTED_MARTS,
};
use whyline_engine::{MockEngine, QueryEngine, QueryOutput, QueryRunner, RunError};
use whyline_sql::{SqlValidationError, PREBUILT};

fn marts() -> ModelCatalog {
    ALLOWLISTED_MARTS
        .iter()
        .map(|name| {
            let model = ModelInfo::new(*name).with_fq_name(format!("whyline-denver.mart_denver.{name}"));
            (name.to_string(), model)
        })
        .collect()
}

fn read_log(path: &std::path::Path) -> Vec<QueryLogRecord> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[tokio::test]
async fn test_runs_are_audited_with_cache_flag() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("logs").join("queries.jsonl");

    let engine = MockEngine::new(Engine::DuckDb)
        .with_default(QueryOutput::new(vec!["route_id".into()], vec![vec![json!("15")], vec![json!("0")]]));
    let runner = QueryRunner::new(
        Box::new(engine),
        marts(),
        WarehouseTarget::default(),
        &GuardrailSettings::default(),
    )
    .with_query_log(QueryLog::new(&log_path, 10 * 1024 * 1024));

    let sql = "SELECT route_id FROM mart_reliability_by_route_day";
    runner.run(sql, "Which routes?").await.unwrap();
    runner.run(sql, "Which routes?").await.unwrap();

    let records = read_log(&log_path);
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].cache_hit, Some(false));
    assert_eq!(records[1].cache_hit, Some(true));
    assert_eq!(records[0].rows, 2);
    assert_eq!(records[0].engine, Engine::DuckDb);
    assert_eq!(records[0].model_names.len(), ALLOWLISTED_MARTS.len());
    assert_eq!(records[0].sql_hash, records[1].sql_hash);
}

#[tokio::test]
async fn test_rejected_queries_are_not_audited() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("queries.jsonl");

    let engine = MockEngine::new(Engine::DuckDb);
    let runner = QueryRunner::new(
        Box::new(engine.clone()),
        marts(),
        WarehouseTarget::default(),
        &GuardrailSettings::default(),
    )
    .with_query_log(QueryLog::new(&log_path, 1024));

    let err = runner
        .run("SELECT * FROM mart_reliability_by_route_day JOIN mart_unknown ON 1=1", "q")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RunError::Validation(SqlValidationError::UnauthorizedTables(_))
    ));
    assert_eq!(engine.call_count(), 0);
    assert!(!log_path.exists());
}

#[tokio::test]
async fn test_unwritable_log_does_not_fail_query() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, "x").unwrap();

    let runner = QueryRunner::new(
        Box::new(MockEngine::new(Engine::DuckDb)),
        marts(),
        WarehouseTarget::default(),
        &GuardrailSettings::default(),
    )
    .with_query_log(QueryLog::new(blocker.join("queries.jsonl"), 1024));

    assert!(runner
        .run("SELECT * FROM mart_weather_impacts", "q")
        .await
        .is_ok());
}

#[tokio::test]
async fn test_bigquery_runner_qualifies_and_estimates() {
    let engine = MockEngine::new(Engine::BigQuery).with_estimate(123_456);
    let runner = QueryRunner::new(
        Box::new(engine.clone()),
        marts(),
        WarehouseTarget::default(),
        &GuardrailSettings::default(),
    );

    let outcome = runner
        .run("SELECT stop_id FROM mart_vulnerability_by_stop", "q")
        .await
        .unwrap();
    assert_eq!(
        outcome.sql,
        "SELECT stop_id FROM `whyline-denver.mart_denver.mart_vulnerability_by_stop`\nLIMIT 5000"
    );
    assert_eq!(outcome.stats.bq_est_bytes, Some(123_456));

    let err = runner
        .run("SELECT service_date_mst FROM mart_reliability_by_route_day", "q")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RunError::Validation(SqlValidationError::MissingPartitionFilter { .. })
    ));
    assert_eq!(engine.call_count(), 1);
}

#[tokio::test]
async fn test_prebuilt_queries_run_on_both_engines() {
    for engine in Engine::all() {
        let mock = MockEngine::new(engine);
        let runner = QueryRunner::new(
            Box::new(mock.clone()),
            marts(),
            WarehouseTarget::default(),
            &GuardrailSettings::default(),
        );

        for query in PREBUILT.iter() {
            let outcome = runner.run(query.sql, query.label).await;
            assert!(outcome.is_ok(), "{} on {}: {:?}", query.label, engine, outcome.err());
        }
        assert_eq!(mock.call_count(), PREBUILT.len());
    }
}

#[cfg(feature = "duckdb")]
#[tokio::test]
async fn test_duckdb_runner_executes_adapted_sql() {
    use whyline_core::DuckDbSettings;
    use whyline_engine::DuckDbEngine;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("warehouse.duckdb");
    {
        let connection = duckdb::Connection::open(&path).unwrap();
        connection
            .execute_batch(
                "CREATE TABLE mart_reliability_by_route_day AS \
                 SELECT '15' AS route_id, CURRENT_DATE AS service_date_mst \
                 UNION ALL SELECT '0', DATE '2000-01-01'",
            )
            .unwrap();
    }

    let settings = DuckDbSettings {
        path,
        ..Default::default()
    };
    let runner = QueryRunner::new(
        Box::new(DuckDbEngine::from_settings(&settings).unwrap()),
        marts(),
        WarehouseTarget::default(),
        &GuardrailSettings::default(),
    );

    let outcome = runner
        .run(
            "SELECT route_id FROM mart_reliability_by_route_day \
             WHERE service_date_mst >= DATE_SUB(CURRENT_DATE, INTERVAL 30 DAY)",
            "recent routes",
        )
        .await
        .unwrap();

    assert!(outcome.sql.contains("CURRENT_DATE - INTERVAL '30' DAY"));
    assert_eq!(outcome.columns, vec!["route_id"]);
    assert_eq!(outcome.rows, vec![vec![json!("15")]]);
}

#[tokio::test]
#[ignore]
async fn test_bigquery_select_one() {
    use whyline_engine::BigQueryEngine;

    let project = std::env::var("GCP_PROJECT_ID").unwrap_or_else(|_| "whyline-denver".to_string());
    let engine = BigQueryEngine::with_adc(project, 2_000_000_000).await.unwrap();

    let estimate = engine.estimate("SELECT 1 AS one").await.unwrap();
    assert!(estimate.is_some());

    let output = engine.execute("SELECT 1 AS one").await.unwrap();
    assert_eq!(output.columns, vec!["one"]);
    assert_eq!(output.total_rows(), 1);
}
