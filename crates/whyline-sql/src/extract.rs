//! Lexical extraction of table references and CTE names
//!
//! Pattern-based, not a SQL parser. A `FROM` inside `EXTRACT(x FROM col)` is
//! read as a table reference; the allow-list then rejects it.

use crate::identifier::{normalize_name, split_identifier, TableReference};
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

/// `FROM`/`JOIN` followed by a dotted identifier of up to three segments,
/// each either backticked or made of word characters and hyphens
pub(crate) static TABLE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(FROM|JOIN)\s+((?:`[^`]+`|[\w-]+)(?:\.(?:`[^`]+`|[\w-]+)){0,2})")
        .expect("valid table reference regex")
});

/// `WITH name AS (` or `, name AS (`
static CTE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:\bWITH\b|,)\s+(`[^`]+`|[a-zA-Z_][\w-]*)\s+AS\s*\(")
        .expect("valid CTE regex")
});

/// Group index of the table token in [`TABLE_PATTERN`]
pub(crate) const TABLE_GROUP: usize = 2;

/// Raw table tokens following `FROM` or `JOIN`, in source order
pub fn table_tokens(sql: &str) -> Vec<&str> {
    TABLE_PATTERN
        .captures_iter(sql)
        .filter_map(|caps| caps.get(TABLE_GROUP))
        .map(|m| m.as_str().trim())
        .collect()
}

/// Lower-cased names bound by `WITH name AS (` / `, name AS (`
pub fn cte_names(sql: &str) -> HashSet<String> {
    CTE_PATTERN
        .captures_iter(sql)
        .filter_map(|caps| caps.get(1))
        .map(|m| normalize_name(m.as_str()))
        .collect()
}

/// Table references excluding those that name a CTE
///
/// A reference is dropped when its base table matches a CTE name, even if
/// it is project/dataset-qualified.
pub fn referenced_tables(sql: &str) -> Vec<TableReference> {
    let ctes = cte_names(sql);

    table_tokens(sql)
        .into_iter()
        .filter_map(split_identifier)
        .filter(|reference| !ctes.contains(&reference.table))
        .collect()
}
