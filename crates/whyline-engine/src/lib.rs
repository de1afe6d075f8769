//! Query execution for guarded SQL
//!
//! Engines execute SQL that has already cleared the guardrails. The
//! [`QueryRunner`] owns that sequence: sanitize, adapt, cache, execute, audit.
//!
//! ## Features
//!
//! - `bigquery` - Google BigQuery execution via `gcp-bigquery-client`
//! - `duckdb` - local execution against the exported warehouse file
//!
//! ## Example
//!
//! ```rust,ignore
//! use whyline_engine::{BigQueryEngine, QueryRunner};
//!
//! let engine = BigQueryEngine::from_settings(&settings.warehouse).await?;
//! let runner = QueryRunner::new(Box::new(engine), models, settings.warehouse.target(), &settings.guardrails);
//! let outcome = runner.run("SELECT * FROM mart_weather_impacts WHERE 1=1", "weather").await?;
//! ```

pub mod adapter;
pub mod bigquery;
pub mod cache;
pub mod duckdb;
pub mod mock;
pub mod runner;

pub use adapter::{ExecuteError, QueryEngine, QueryOutput, QueryStats};
pub use bigquery::BigQueryEngine;
pub use cache::QueryCache;
pub use self::duckdb::DuckDbEngine;
pub use mock::MockEngine;
pub use runner::{QueryRunner, RunError, RunOutcome, ValidatedQuery, MAX_DISPLAY_ROWS};
