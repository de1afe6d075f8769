//! Engine-specific guardrail steps and SQL adaptation
//!
//! Each engine gets a strategy object: the last step of `sanitize_sql`
//! (`enforce`) and the dialect rewrite applied before execution (`adapt`).

use crate::error::SqlValidationError;
use crate::extract::{cte_names, TABLE_GROUP, TABLE_PATTERN};
use crate::guardrails::{suggest_partition_filter, GuardrailConfig};
use crate::lexer::mask_literals_and_comments;
use regex::Regex;
use std::borrow::Cow;
use std::sync::LazyLock;
use whyline_core::{Engine, ModelCatalog, WarehouseTarget};

static DATE_SUB_CALL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bDATE_SUB\s*\(").expect("valid DATE_SUB regex"));

static DAY_INTERVAL_TAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*INTERVAL\s+(\d+)\s+DAY\s*\)").expect("valid INTERVAL regex")
});

/// Per-engine guardrail and dialect behavior
///
/// `scan` is always byte-aligned with `sql`: either the same text, or the
/// text with literals and comments masked. Rewrites locate their targets
/// in `scan` and splice into `sql`.
pub trait EnginePolicy: Send + Sync {
    fn engine(&self) -> Engine;

    /// Final guardrail step on an already-limited statement
    fn enforce(&self, sql: String, scan: &str, config: &GuardrailConfig) -> Result<String, SqlValidationError>;

    /// Rewrite validated SQL into the engine's dialect
    fn adapt(&self, sql: &str, scan: &str, models: Option<&ModelCatalog>, target: &WarehouseTarget) -> String;
}

/// Local DuckDB over exported marts
#[derive(Debug, Clone, Copy, Default)]
pub struct DuckDbPolicy;

impl EnginePolicy for DuckDbPolicy {
    fn engine(&self) -> Engine {
        Engine::DuckDb
    }

    fn enforce(&self, sql: String, _scan: &str, _config: &GuardrailConfig) -> Result<String, SqlValidationError> {
        Ok(sql)
    }

    fn adapt(&self, sql: &str, scan: &str, _models: Option<&ModelCatalog>, _target: &WarehouseTarget) -> String {
        rewrite_date_sub_masked(sql, scan)
    }
}

/// BigQuery marts dataset
#[derive(Debug, Clone, Copy, Default)]
pub struct BigQueryPolicy;

impl EnginePolicy for BigQueryPolicy {
    fn engine(&self) -> Engine {
        Engine::BigQuery
    }

    fn enforce(&self, sql: String, scan: &str, config: &GuardrailConfig) -> Result<String, SqlValidationError> {
        suggest_partition_filter(scan, &config.partition_columns)?;
        Ok(quote_hyphenated_tables_masked(&sql, scan))
    }

    fn adapt(&self, sql: &str, scan: &str, models: Option<&ModelCatalog>, target: &WarehouseTarget) -> String {
        match models {
            Some(models) if !models.is_empty() => qualify_bigquery_tables_masked(sql, scan, models, target),
            _ => sql.to_string(),
        }
    }
}

/// Strategy object for an engine
pub fn policy_for(engine: Engine) -> &'static dyn EnginePolicy {
    match engine {
        Engine::DuckDb => &DuckDbPolicy,
        Engine::BigQuery => &BigQueryPolicy,
    }
}

/// Rewrite validated SQL for the target engine
///
/// DuckDB: `DATE_SUB(expr, INTERVAL n DAY)` becomes `expr - INTERVAL 'n' DAY`;
/// other interval units are left alone.
/// BigQuery: bare table names become `` `project.dataset.table` `` when a
/// model catalog is supplied; CTE names and dotted references are untouched.
pub fn adapt_sql_for_engine(
    sql: &str,
    engine: Engine,
    models: Option<&ModelCatalog>,
    target: &WarehouseTarget,
) -> String {
    policy_for(engine).adapt(sql, sql, models, target)
}

/// [`adapt_sql_for_engine`] under a guardrail config
///
/// With `lexical_scan` on, nothing inside a string literal or comment is
/// rewritten.
pub fn adapt_validated_sql(
    sql: &str,
    config: &GuardrailConfig,
    models: Option<&ModelCatalog>,
    target: &WarehouseTarget,
) -> Result<String, SqlValidationError> {
    let scan: Cow<'_, str> = if config.lexical_scan {
        Cow::Owned(mask_literals_and_comments(sql, config.engine)?)
    } else {
        Cow::Borrowed(sql)
    };
    Ok(policy_for(config.engine).adapt(sql, &scan, models, target))
}

/// Replace the table token of every `FROM`/`JOIN` match found in `scan`
fn rewrite_table_tokens<F>(sql: &str, scan: &str, mut rewrite: F) -> String
where
    F: FnMut(&str) -> Option<String>,
{
    let mut out = String::with_capacity(sql.len() + 64);
    let mut last = 0;
    for caps in TABLE_PATTERN.captures_iter(scan) {
        let Some(token) = caps.get(TABLE_GROUP) else {
            continue;
        };
        let Some(replacement) = rewrite(&sql[token.range()]) else {
            continue;
        };
        out.push_str(&sql[last..token.start()]);
        out.push_str(&replacement);
        last = token.end();
    }
    out.push_str(&sql[last..]);
    out
}

/// Wrap unquoted hyphenated table tokens in backticks
///
/// Tokens that already contain a backtick are left alone.
pub fn quote_hyphenated_tables(sql: &str) -> String {
    quote_hyphenated_tables_masked(sql, sql)
}

pub(crate) fn quote_hyphenated_tables_masked(sql: &str, scan: &str) -> String {
    rewrite_table_tokens(sql, scan, |token| {
        (!token.contains('`') && token.contains('-')).then(|| format!("`{token}`"))
    })
}

/// DuckDB has no `DATE_SUB(expr, INTERVAL n DAY)`
pub fn rewrite_date_sub(sql: &str) -> String {
    rewrite_date_sub_masked(sql, sql)
}

/// Rewrite day-unit `DATE_SUB` calls located in `scan`
///
/// The first argument ends at the first top-level comma of its own call, so
/// one call never swallows the next. Nested calls are rewritten too.
pub(crate) fn rewrite_date_sub_masked(sql: &str, scan: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut last = 0;
    let mut search_from = 0;

    while let Some(call) = DATE_SUB_CALL.find_at(scan, search_from) {
        search_from = call.end();

        let Some(comma) = first_argument_end(scan, call.end()) else {
            continue;
        };
        let Some(tail) = DAY_INTERVAL_TAIL.captures(&scan[comma + 1..]) else {
            continue;
        };
        let (Some(whole), Some(days)) = (tail.get(0), tail.get(1)) else {
            continue;
        };

        let expr = rewrite_date_sub_masked(&sql[call.end()..comma], &scan[call.end()..comma]);
        let end = comma + 1 + whole.end();

        out.push_str(&sql[last..call.start()]);
        out.push_str(&format!("{} - INTERVAL '{}' DAY", expr.trim(), days.as_str()));
        last = end;
        search_from = end;
    }

    out.push_str(&sql[last..]);
    out
}

/// Offset of the comma closing the first argument of a call opened just
/// before `start`, or `None` when the call closes first
fn first_argument_end(scan: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_quote = false;

    for (offset, c) in scan[start..].char_indices() {
        match c {
            '\'' => in_quote = !in_quote,
            _ if in_quote => {}
            '(' => depth += 1,
            ')' if depth == 0 => return None,
            ')' => depth -= 1,
            ',' if depth == 0 => return Some(start + offset),
            _ => {}
        }
    }
    None
}

/// Fully qualify bare model references against the warehouse target
pub fn qualify_bigquery_tables(sql: &str, models: &ModelCatalog, target: &WarehouseTarget) -> String {
    qualify_bigquery_tables_masked(sql, sql, models, target)
}

pub(crate) fn qualify_bigquery_tables_masked(
    sql: &str,
    scan: &str,
    models: &ModelCatalog,
    target: &WarehouseTarget,
) -> String {
    let ctes = cte_names(scan);

    rewrite_table_tokens(sql, scan, |token| {
        let raw = token.trim().trim_matches('`');
        if ctes.contains(&raw.to_lowercase()) || raw.contains('.') {
            return None;
        }
        let table = models.get(raw).map_or(raw, |info| info.name.as_str());
        Some(target.qualify(table))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use whyline_core::ModelInfo;

    fn catalog() -> ModelCatalog {
        let mut models = ModelCatalog::new();
        models.insert("mart_a".into(), ModelInfo::new("mart_a"));
        models
    }

    #[test]
    fn date_sub_becomes_interval_arithmetic() {
        let sql = "SELECT * FROM mart_a WHERE d >= DATE_SUB(CURRENT_DATE(), INTERVAL 30 DAY)";
        assert_eq!(
            rewrite_date_sub(sql),
            "SELECT * FROM mart_a WHERE d >= CURRENT_DATE() - INTERVAL '30' DAY"
        );
        assert_eq!(
            rewrite_date_sub("date_sub( current_date , interval 7 day )"),
            "current_date - INTERVAL '7' DAY"
        );
    }

    #[test]
    fn date_sub_call_does_not_run_into_the_next_one() {
        let sql = "SELECT * FROM mart_a WHERE a >= DATE_SUB(CURRENT_DATE(), INTERVAL 3 MONTH) \
                   AND b >= DATE_SUB(CURRENT_DATE(), INTERVAL 2 DAY)";
        assert_eq!(
            rewrite_date_sub(sql),
            "SELECT * FROM mart_a WHERE a >= DATE_SUB(CURRENT_DATE(), INTERVAL 3 MONTH) \
             AND b >= CURRENT_DATE() - INTERVAL '2' DAY"
        );
    }

    #[test]
    fn nested_date_sub_calls() {
        assert_eq!(
            rewrite_date_sub("DATE_SUB(DATE_SUB(d, INTERVAL 1 DAY), INTERVAL 2 DAY)"),
            "d - INTERVAL '1' DAY - INTERVAL '2' DAY"
        );
        assert_eq!(
            rewrite_date_sub("DATE_SUB(DATE_SUB(d, INTERVAL 1 DAY), INTERVAL 2 WEEK)"),
            "DATE_SUB(d - INTERVAL '1' DAY, INTERVAL 2 WEEK)"
        );
    }

    #[test]
    fn date_sub_argument_may_hold_commas() {
        assert_eq!(
            rewrite_date_sub("DATE_SUB(COALESCE(d, DATE '2024-01-01'), INTERVAL 5 DAY)"),
            "COALESCE(d, DATE '2024-01-01') - INTERVAL '5' DAY"
        );
        assert_eq!(
            rewrite_date_sub("DATE_SUB(CONCAT('a,b'), INTERVAL 5 DAY)"),
            "CONCAT('a,b') - INTERVAL '5' DAY"
        );
    }

    #[test]
    fn masked_rewrites_skip_literals() {
        let sql = "SELECT * FROM mart_a WHERE note = 'from stop-12' OR note = 'DATE_SUB(x, INTERVAL 1 DAY)'";
        let scan = mask_literals_and_comments(sql, Engine::BigQuery).unwrap();

        assert_eq!(quote_hyphenated_tables_masked(sql, &scan), sql);
        assert_eq!(rewrite_date_sub_masked(sql, &scan), sql);
        assert_eq!(
            qualify_bigquery_tables_masked(sql, &scan, &catalog(), &WarehouseTarget::new("p", "d")),
            "SELECT * FROM `p.d.mart_a` WHERE note = 'from stop-12' OR note = 'DATE_SUB(x, INTERVAL 1 DAY)'"
        );
    }

    #[test]
    fn hyphenated_tokens_are_quoted_once() {
        let sql = "SELECT * FROM whyline-denver.mart_denver.mart_a JOIN mart_b ON true";
        let quoted = quote_hyphenated_tables(sql);
        assert_eq!(
            quoted,
            "SELECT * FROM `whyline-denver.mart_denver.mart_a` JOIN mart_b ON true"
        );
        assert_eq!(quote_hyphenated_tables(&quoted), quoted);
        assert_eq!(
            quote_hyphenated_tables("SELECT * FROM `whyline-denver`.mart_denver.mart_a"),
            "SELECT * FROM `whyline-denver`.mart_denver.mart_a"
        );
    }

    #[test]
    fn bare_tables_are_qualified_with_alias_kept() {
        let adapted = qualify_bigquery_tables(
            "SELECT * FROM mart_a a JOIN mart_a ON true",
            &catalog(),
            &WarehouseTarget::default(),
        );
        assert_eq!(
            adapted,
            "SELECT * FROM `whyline-denver.mart_denver.mart_a` a JOIN `whyline-denver.mart_denver.mart_a` ON true"
        );
    }

    #[test]
    fn unaliased_join_targets_are_qualified() {
        let adapted = qualify_bigquery_tables(
            "SELECT * FROM mart_a JOIN mart_a USING (stop_id)",
            &catalog(),
            &WarehouseTarget::new("p", "d"),
        );
        assert_eq!(adapted, "SELECT * FROM `p.d.mart_a` JOIN `p.d.mart_a` USING (stop_id)");
    }

    #[test]
    fn ctes_and_dotted_names_are_not_qualified() {
        let sql = "WITH recent AS (SELECT * FROM mart_a) SELECT * FROM recent JOIN ds.mart_a USING (x)";
        let adapted = qualify_bigquery_tables(sql, &catalog(), &WarehouseTarget::new("p", "d"));
        assert_eq!(
            adapted,
            "WITH recent AS (SELECT * FROM `p.d.mart_a`) SELECT * FROM recent JOIN ds.mart_a USING (x)"
        );
    }

    #[test]
    fn bigquery_adapt_without_models_is_identity() {
        let sql = "SELECT * FROM mart_a";
        let target = WarehouseTarget::default();
        assert_eq!(adapt_sql_for_engine(sql, Engine::BigQuery, None, &target), sql);
        assert_eq!(
            adapt_sql_for_engine(sql, Engine::BigQuery, Some(&ModelCatalog::new()), &target),
            sql
        );
    }

    #[test]
    fn policy_for_matches_engine() {
        assert_eq!(policy_for(Engine::DuckDb).engine(), Engine::DuckDb);
        assert_eq!(policy_for(Engine::BigQuery).engine(), Engine::BigQuery);
    }
}
