//! SQL guardrails for the WhyLine query path
//!
//! This crate handles:
//! - Rejecting anything that is not a single read-only SELECT
//! - Restricting table, project and dataset references to app-approved marts
//! - Enforcing a row limit and (on BigQuery) a partition filter
//! - Adapting validated SQL to the DuckDB or BigQuery dialect
//! - The canned prebuilt questions

pub mod error;
pub mod extract;
pub mod guardrails;
pub mod identifier;
pub mod lexer;
pub mod policy;
pub mod prebuilt;

pub use error::SqlValidationError;
pub use extract::{cte_names, referenced_tables, table_tokens};
pub use guardrails::{sanitize_sql, GuardrailConfig, DENYLIST};
pub use identifier::{split_identifier, TableReference};
pub use lexer::{literal_and_comment_spans, mask_literals_and_comments};
pub use policy::{
    adapt_sql_for_engine, adapt_validated_sql, policy_for, qualify_bigquery_tables, quote_hyphenated_tables,
    rewrite_date_sub, BigQueryPolicy, DuckDbPolicy, EnginePolicy,
};
pub use prebuilt::{prebuilt, PrebuiltQuery, PREBUILT};
