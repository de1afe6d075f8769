//! Sidebar filter state and WHERE-clause injection
//!
//! Filters are only applied when the generated SQL already mentions the
//! filtered column, so a filter never drags in a column the model lacks.

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// `WHERE ...` up to the next trailing clause or end of input
static WHERE_CLAUSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)(\bWHERE\s.*?)(\bGROUP BY\b|\bORDER BY\b|\bHAVING\b|\bLIMIT\b|$)")
        .expect("valid WHERE clause regex")
});

static TRAILING_CLAUSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(GROUP BY|ORDER BY|HAVING|LIMIT)\b").expect("valid clause regex"));

/// Optional user filters attached to a question
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_id: Option<String>,

    /// Precipitation bins (`none`, `light`, `mod`, `heavy`)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub weather: Vec<String>,
}

impl FilterState {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn with_date_range(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.start_date = Some(start);
        self.end_date = Some(end);
        self
    }

    pub fn with_routes<I, S>(mut self, routes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.routes = routes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_stop_id(mut self, stop_id: impl Into<String>) -> Self {
        self.stop_id = Some(stop_id.into());
        self
    }

    pub fn with_weather<I, S>(mut self, bins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.weather = bins.into_iter().map(Into::into).collect();
        self
    }

    /// Same filters with list values sorted, for cache keys
    pub fn canonical(&self) -> Self {
        let mut canonical = self.clone();
        canonical.routes.sort();
        canonical.weather.sort();
        canonical
    }

    /// Pretty JSON for the prompt, `{}` when nothing is set
    pub fn to_prompt_json(&self) -> String {
        let fields = self.sorted_fields();
        if fields.is_empty() {
            return "{}".to_string();
        }
        serde_json::to_string_pretty(&fields).unwrap_or_else(|_| "{}".to_string())
    }

    /// Compact JSON of the canonical form
    pub fn to_cache_json(&self) -> String {
        serde_json::to_string(&self.canonical().sorted_fields()).unwrap_or_else(|_| "{}".to_string())
    }

    fn sorted_fields(&self) -> BTreeMap<String, serde_json::Value> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map.into_iter().collect(),
            _ => BTreeMap::new(),
        }
    }
}

/// Add filter conditions for every filtered column the SQL mentions
pub fn add_filter_clauses(sql: &str, filters: &FilterState) -> String {
    let lower = sql.to_lowercase();
    let mut sql = sql.to_string();

    if let (Some(start), Some(end)) = (filters.start_date, filters.end_date) {
        if lower.contains("service_date_mst") {
            let condition = format!(
                "service_date_mst BETWEEN DATE '{}' AND DATE '{}'",
                start.format("%Y-%m-%d"),
                end.format("%Y-%m-%d")
            );
            sql = inject_condition(&sql, &condition);
        }
    }

    if !filters.routes.is_empty() && lower.contains("route_id") {
        sql = inject_condition(&sql, &format!("route_id IN ({})", quote_list(&filters.routes)));
    }

    if let Some(stop_id) = filters.stop_id.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        if lower.contains("stop_id") {
            let condition = format!("stop_id = {}", quote_literal(&stop_id.to_uppercase()));
            sql = inject_condition(&sql, &condition);
        }
    }

    if !filters.weather.is_empty() && lower.contains("precip_bin") {
        sql = inject_condition(&sql, &format!("precip_bin IN ({})", quote_list(&filters.weather)));
    }

    sql
}

/// AND onto the first WHERE clause, or insert a WHERE before the first
/// trailing clause
fn inject_condition(sql: &str, condition: &str) -> String {
    if let Some(caps) = WHERE_CLAUSE.captures(sql) {
        let Some(clause) = caps.get(1) else {
            return sql.to_string();
        };
        if clause.as_str().contains(condition) {
            return sql.to_string();
        }
        return format!(
            "{}{}\n    AND {}\n{}",
            &sql[..clause.start()],
            clause.as_str().trim_end(),
            condition,
            &sql[clause.end()..]
        );
    }

    let pos = TRAILING_CLAUSE.find(sql).map_or(sql.len(), |m| m.start());
    format!("{}\nWHERE {}\n{}", &sql[..pos], condition, &sql[pos..])
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn quote_list(values: &[String]) -> String {
    values.iter().map(|v| quote_literal(v)).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn appends_to_existing_where() {
        let sql = "SELECT route_id FROM mart_a WHERE pct_on_time < 0.8 ORDER BY route_id";
        let filters = FilterState::default().with_routes(["15", "0"]);
        assert_eq!(
            add_filter_clauses(sql, &filters),
            "SELECT route_id FROM mart_a WHERE pct_on_time < 0.8\n    AND route_id IN ('15', '0')\nORDER BY route_id"
        );
    }

    #[test]
    fn inserts_where_before_group_by() {
        let sql = "SELECT route_id, service_date_mst FROM mart_a GROUP BY 1, 2";
        let filters = FilterState::default().with_date_range(date("2024-01-01"), date("2024-01-31"));
        assert_eq!(
            add_filter_clauses(sql, &filters),
            "SELECT route_id, service_date_mst FROM mart_a \n\
             WHERE service_date_mst BETWEEN DATE '2024-01-01' AND DATE '2024-01-31'\n\
             GROUP BY 1, 2"
        );
    }

    #[test]
    fn inserts_where_at_end_without_trailing_clause() {
        let sql = "SELECT precip_bin FROM mart_weather_impacts";
        let filters = FilterState::default().with_weather(["heavy"]);
        assert_eq!(
            add_filter_clauses(sql, &filters),
            "SELECT precip_bin FROM mart_weather_impacts\nWHERE precip_bin IN ('heavy')\n"
        );
    }

    #[test]
    fn unmentioned_columns_are_not_filtered() {
        let sql = "SELECT stop_id FROM mart_access_score_by_stop";
        let filters = FilterState::default()
            .with_routes(["15"])
            .with_date_range(date("2024-01-01"), date("2024-01-31"));
        assert_eq!(add_filter_clauses(sql, &filters), sql);
    }

    #[test]
    fn stop_id_is_upper_cased_and_quotes_doubled() {
        let sql = "SELECT stop_id FROM mart_a WHERE x = 1";
        let filters = FilterState::default().with_stop_id(" ab'c ");
        assert_eq!(
            add_filter_clauses(sql, &filters),
            "SELECT stop_id FROM mart_a WHERE x = 1\n    AND stop_id = 'AB''C'\n"
        );
    }

    #[test]
    fn list_values_have_quotes_doubled() {
        let sql = "SELECT route_id FROM mart_a";
        let filters = FilterState::default().with_routes(["x') OR 1=1 --"]);
        let filtered = add_filter_clauses(sql, &filters);
        assert!(filtered.contains("route_id IN ('x'') OR 1=1 --')"));
    }

    #[test]
    fn existing_condition_is_not_duplicated() {
        let sql = "SELECT route_id FROM mart_a WHERE route_id IN ('15')";
        let filters = FilterState::default().with_routes(["15"]);
        assert_eq!(add_filter_clauses(sql, &filters), sql);
    }

    #[test]
    fn prompt_json_is_sorted_and_compact_when_empty() {
        assert_eq!(FilterState::default().to_prompt_json(), "{}");

        let filters = FilterState::default().with_weather(["mod"]).with_routes(["15"]);
        assert_eq!(
            filters.to_prompt_json(),
            "{\n  \"routes\": [\n    \"15\"\n  ],\n  \"weather\": [\n    \"mod\"\n  ]\n}"
        );
    }

    #[test]
    fn canonical_sorts_lists() {
        let filters = FilterState::default().with_routes(["b", "a"]);
        assert_eq!(filters.canonical().routes, vec!["a", "b"]);
        assert_eq!(filters.to_cache_json(), r#"{"routes":["a","b"]}"#);
        assert_eq!(
            filters.to_cache_json(),
            FilterState::default().with_routes(["a", "b"]).to_cache_json()
        );
    }
}
