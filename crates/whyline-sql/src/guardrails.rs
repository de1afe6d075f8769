//! Read-only SQL guardrails
//!
//! `sanitize_sql` is the single gate between generated or user-edited SQL
//! and the warehouse. Checks run in a fixed order and stop at the first
//! violation:
//!
//! 1. normalize (trim, strip one trailing `;`)
//! 2. single statement
//! 3. read-only (`SELECT`, or `WITH ... SELECT`)
//! 4. keyword denylist
//! 5. table / project / dataset allow-lists
//! 6. row limit
//! 7. engine policy (BigQuery: partition filter, hyphenated project quoting)

use crate::error::SqlValidationError;
use crate::extract::referenced_tables;
use crate::identifier::{normalize_name, split_identifier};
use crate::lexer::mask_literals_and_comments;
use crate::policy::policy_for;
use regex::Regex;
use std::borrow::Cow;
use std::collections::BTreeSet;
use std::sync::LazyLock;
use whyline_core::{Engine, GuardrailSettings, ModelCatalog, WarehouseTarget, DEFAULT_PARTITION_COLUMN, SAFE_LIMIT};

/// Statement types that are never allowed, in reporting order
pub const DENYLIST: [&str; 14] = [
    "INSERT", "UPDATE", "DELETE", "CREATE", "DROP", "ALTER", "MERGE", "TRUNCATE", "GRANT", "REVOKE", "CALL",
    "LOAD", "EXPORT", "COPY",
];

static DENYLIST_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    DENYLIST
        .iter()
        .map(|keyword| {
            let pattern = Regex::new(&format!(r"\b{keyword}\b")).expect("valid denylist regex");
            (*keyword, pattern)
        })
        .collect()
});

static LIMIT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bLIMIT\s+(\d+)").expect("valid LIMIT regex"));

/// Guardrail policy for one engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardrailConfig {
    /// Permitted base table names
    pub allowed_models: BTreeSet<String>,

    /// Target engine
    pub engine: Engine,

    /// Columns that should be filtered when referenced (BigQuery only)
    pub partition_columns: Vec<String>,

    /// Row limit appended when the query has none
    pub enforce_limit: u64,

    /// Explicit project allow-list; derived from qualified model names when unset
    pub allowed_projects: Option<BTreeSet<String>>,

    /// Explicit dataset allow-list; derived from qualified model names when unset
    pub allowed_datasets: Option<BTreeSet<String>>,

    /// Scan with the SQL tokenizer so literals and comments are ignored
    pub lexical_scan: bool,
}

impl GuardrailConfig {
    /// Config with default partition column, `SAFE_LIMIT` and derived namespaces
    pub fn new<I, S>(allowed_models: I, engine: Engine) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed_models: allowed_models.into_iter().map(Into::into).collect(),
            engine,
            partition_columns: vec![DEFAULT_PARTITION_COLUMN.to_string()],
            enforce_limit: SAFE_LIMIT,
            allowed_projects: None,
            allowed_datasets: None,
            lexical_scan: false,
        }
    }

    /// Config for the allow-listed models of a running deployment
    ///
    /// For BigQuery the project and dataset allow-lists come from each
    /// model's qualified name, falling back to the warehouse target.
    pub fn for_engine(
        engine: Engine,
        models: &ModelCatalog,
        target: &WarehouseTarget,
        settings: &GuardrailSettings,
    ) -> Self {
        let mut config = Self::new(models.keys().cloned(), engine).with_settings(settings);

        if engine == Engine::BigQuery {
            let mut projects = BTreeSet::new();
            let mut datasets = BTreeSet::new();
            for info in models.values() {
                if let Some(reference) = split_identifier(&info.fq_name) {
                    projects.extend(reference.project);
                    datasets.extend(reference.dataset);
                }
            }
            if projects.is_empty() && !target.project_id.is_empty() {
                projects.insert(target.project_id.clone());
            }
            if datasets.is_empty() && !target.dataset.is_empty() {
                datasets.insert(target.dataset.clone());
            }
            config.allowed_projects = Some(projects);
            config.allowed_datasets = Some(datasets);
        }

        config
    }

    /// Apply `[guardrails]` settings
    pub fn with_settings(mut self, settings: &GuardrailSettings) -> Self {
        self.enforce_limit = settings.enforce_limit;
        self.partition_columns = settings.partition_columns.clone();
        self.lexical_scan = settings.lexical_scan;
        self
    }

    pub fn with_partition_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.partition_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_enforce_limit(mut self, limit: u64) -> Self {
        self.enforce_limit = limit;
        self
    }

    pub fn with_allowed_projects<I, S>(mut self, projects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_projects = Some(projects.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_allowed_datasets<I, S>(mut self, datasets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_datasets = Some(datasets.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_lexical_scan(mut self, enabled: bool) -> Self {
        self.lexical_scan = enabled;
        self
    }
}

/// Normalized allow-lists used during table validation
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct AllowedSets {
    pub tables: BTreeSet<String>,
    pub projects: BTreeSet<String>,
    pub datasets: BTreeSet<String>,
}

/// Validate `sql` and return a safe, executable rewrite
///
/// The result is the normalized statement with `LIMIT enforce_limit`
/// appended when no LIMIT is present, plus any engine-specific rewrites.
pub fn sanitize_sql(sql: &str, config: &GuardrailConfig) -> Result<String, SqlValidationError> {
    let result = run_checks(sql, config);
    match &result {
        Ok(_) => tracing::debug!(engine = %config.engine, "sql passed guardrails"),
        Err(e) => tracing::debug!(engine = %config.engine, code = e.code(), "sql rejected: {}", e),
    }
    result
}

fn run_checks(sql: &str, config: &GuardrailConfig) -> Result<String, SqlValidationError> {
    let parsed = normalize(sql)?;
    let scan: Cow<'_, str> = if config.lexical_scan {
        Cow::Owned(mask_literals_and_comments(&parsed, config.engine)?)
    } else {
        Cow::Borrowed(parsed.as_str())
    };

    ensure_single_statement(&scan)?;
    ensure_read_only(&scan)?;
    validate_tables(&scan, config)?;

    let limited = ensure_limit(&parsed, &scan, config.enforce_limit);
    let limited_scan = ensure_limit(&scan, &scan, config.enforce_limit);
    policy_for(config.engine).enforce(limited, &limited_scan, config)
}

/// Trim, then strip one trailing `;`
pub(crate) fn normalize(sql: &str) -> Result<String, SqlValidationError> {
    let trimmed = sql.trim();
    if trimmed.is_empty() {
        return Err(SqlValidationError::Empty);
    }
    let statement = trimmed.strip_suffix(';').unwrap_or(trimmed);
    Ok(statement.trim().to_string())
}

/// Any remaining `;` means more than one statement
pub(crate) fn ensure_single_statement(sql: &str) -> Result<(), SqlValidationError> {
    if sql.contains(';') {
        return Err(SqlValidationError::MultipleStatements);
    }
    Ok(())
}

/// Statement must be a SELECT, or a WITH that contains a SELECT, and must
/// not mention any denylisted keyword
pub(crate) fn ensure_read_only(sql: &str) -> Result<(), SqlValidationError> {
    let upper = sql.to_uppercase();
    let head = upper.trim_start();

    if head.starts_with("WITH") {
        if !upper.contains("SELECT") {
            return Err(SqlValidationError::CteWithoutSelect);
        }
    } else if !head.starts_with("SELECT") {
        return Err(SqlValidationError::NotSelect);
    }

    for (keyword, pattern) in DENYLIST_PATTERNS.iter() {
        if pattern.is_match(&upper) {
            return Err(SqlValidationError::DisallowedKeyword((*keyword).to_string()));
        }
    }

    Ok(())
}

/// Normalize explicit allow-lists, deriving namespaces when none are given
pub(crate) fn compile_allowed_sets(config: &GuardrailConfig) -> AllowedSets {
    let mut sets = AllowedSets::default();

    for model in &config.allowed_models {
        let Some(reference) = split_identifier(model) else {
            continue;
        };
        sets.tables.insert(reference.table);
        sets.projects.extend(reference.project);
        sets.datasets.extend(reference.dataset);
    }

    let explicit = |values: &Option<BTreeSet<String>>| -> Option<BTreeSet<String>> {
        let normalized: BTreeSet<String> = values
            .iter()
            .flatten()
            .map(|value| normalize_name(value))
            .filter(|value| !value.is_empty())
            .collect();
        (!normalized.is_empty()).then_some(normalized)
    };

    if let Some(projects) = explicit(&config.allowed_projects) {
        sets.projects = projects;
    }
    if let Some(datasets) = explicit(&config.allowed_datasets) {
        sets.datasets = datasets;
    }

    sets
}

/// Reject references outside the model, project and dataset allow-lists
///
/// Namespace violations list the offending tokens as written.
pub(crate) fn validate_tables(sql: &str, config: &GuardrailConfig) -> Result<(), SqlValidationError> {
    let allowed = compile_allowed_sets(config);
    let references = referenced_tables(sql);

    let unauthorized: BTreeSet<String> = references
        .iter()
        .filter(|reference| !allowed.tables.contains(&reference.table))
        .map(|reference| reference.table.clone())
        .collect();
    if !unauthorized.is_empty() {
        return Err(SqlValidationError::UnauthorizedTables(unauthorized.into_iter().collect()));
    }

    if allowed.projects.is_empty() && allowed.datasets.is_empty() {
        return Ok(());
    }

    let mut bad_projects = BTreeSet::new();
    let mut bad_datasets = BTreeSet::new();
    for reference in &references {
        if let Some(project) = &reference.project {
            if !allowed.projects.is_empty() && !allowed.projects.contains(project) {
                bad_projects.insert(reference.raw.clone());
            }
        }
        if let Some(dataset) = &reference.dataset {
            if !allowed.datasets.is_empty() && !allowed.datasets.contains(dataset) {
                bad_datasets.insert(reference.raw.clone());
            }
        }
    }

    if !bad_projects.is_empty() {
        return Err(SqlValidationError::UnauthorizedProjects(bad_projects.into_iter().collect()));
    }
    if !bad_datasets.is_empty() {
        return Err(SqlValidationError::UnauthorizedDatasets(bad_datasets.into_iter().collect()));
    }

    Ok(())
}

/// Append `LIMIT max_rows` unless a LIMIT clause is already present
pub(crate) fn ensure_limit(sql: &str, scan: &str, max_rows: u64) -> String {
    if LIMIT_PATTERN.is_match(scan) {
        sql.to_string()
    } else {
        format!("{sql}\nLIMIT {max_rows}")
    }
}

/// Require a WHERE clause when a partition column is referenced
pub(crate) fn suggest_partition_filter(sql: &str, partition_columns: &[String]) -> Result<(), SqlValidationError> {
    let upper = sql.to_uppercase();
    if upper.contains("WHERE") {
        return Ok(());
    }
    match partition_columns
        .iter()
        .find(|column| upper.contains(&column.to_uppercase()))
    {
        Some(column) => Err(SqlValidationError::MissingPartitionFilter { column: column.clone() }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use whyline_core::ModelInfo;

    fn duckdb() -> GuardrailConfig {
        GuardrailConfig::new(["mart_a", "mart_b"], Engine::DuckDb)
    }

    #[test]
    fn normalize_strips_one_trailing_semicolon() {
        assert_eq!(normalize("  SELECT 1 ;  ").unwrap(), "SELECT 1");
        assert_eq!(normalize("SELECT 1;;").unwrap(), "SELECT 1;");
        assert_eq!(normalize(" \n\t").unwrap_err(), SqlValidationError::Empty);
    }

    #[test]
    fn read_only_checks() {
        assert!(ensure_read_only("select * from mart_a").is_ok());
        assert!(ensure_read_only("WITH x AS (SELECT 1) SELECT * FROM x").is_ok());
        assert_eq!(
            ensure_read_only("WITH x AS (VALUES (1))").unwrap_err(),
            SqlValidationError::CteWithoutSelect
        );
        assert_eq!(ensure_read_only("SHOW TABLES").unwrap_err(), SqlValidationError::NotSelect);
    }

    #[test]
    fn denylist_reports_first_keyword_in_list_order() {
        let err = ensure_read_only("SELECT * FROM mart_a WHERE note = 'drop then insert'").unwrap_err();
        assert_eq!(err, SqlValidationError::DisallowedKeyword("INSERT".into()));
    }

    #[test]
    fn denylist_matches_whole_words_only() {
        assert!(ensure_read_only("SELECT created_at, updated_by, dropoff FROM mart_a").is_ok());
    }

    #[test]
    fn unauthorized_tables_are_sorted_and_deduplicated() {
        let err = validate_tables(
            "SELECT * FROM zeta z JOIN mart_a a ON true JOIN alpha ON true JOIN ZETA ON true",
            &duckdb(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            SqlValidationError::UnauthorizedTables(vec!["alpha".into(), "zeta".into()])
        );
    }

    #[test]
    fn explicit_namespaces_are_normalized() {
        let config = duckdb()
            .with_allowed_projects(["`Whyline-Denver`", ""])
            .with_allowed_datasets(Vec::<String>::new());
        let sets = compile_allowed_sets(&config);
        assert_eq!(sets.projects, BTreeSet::from(["whyline-denver".to_string()]));
        assert!(sets.datasets.is_empty());
    }

    #[test]
    fn qualified_allowed_models_derive_namespaces() {
        let config = GuardrailConfig::new(["whyline-denver.mart_denver.mart_a"], Engine::BigQuery);
        let sets = compile_allowed_sets(&config);
        assert!(sets.tables.contains("mart_a"));
        assert!(sets.projects.contains("whyline-denver"));
        assert!(sets.datasets.contains("mart_denver"));
    }

    #[test]
    fn projects_are_checked_before_datasets() {
        let config = duckdb()
            .with_allowed_projects(["whyline-denver"])
            .with_allowed_datasets(["mart_denver"]);
        let err = validate_tables("SELECT * FROM `other-proj.other_ds.mart_a`", &config).unwrap_err();
        assert_eq!(err, SqlValidationError::UnauthorizedProjects(vec!["`other-proj.other_ds.mart_a`".into()]));

        let err = validate_tables("SELECT * FROM `whyline-denver.other_ds.mart_a`", &config).unwrap_err();
        assert_eq!(err, SqlValidationError::UnauthorizedDatasets(vec!["`whyline-denver.other_ds.mart_a`".into()]));
    }

    #[test]
    fn ensure_limit_respects_existing_limit() {
        assert_eq!(ensure_limit("SELECT 1", "SELECT 1", 10), "SELECT 1\nLIMIT 10");
        assert_eq!(ensure_limit("SELECT 1 limit 3", "SELECT 1 limit 3", 10), "SELECT 1 limit 3");
    }

    #[test]
    fn partition_filter_requires_where() {
        let columns = vec!["service_date_mst".to_string()];
        assert!(suggest_partition_filter("SELECT service_date_mst FROM mart_a WHERE true", &columns).is_ok());
        assert!(suggest_partition_filter("SELECT stop_id FROM mart_a", &columns).is_ok());
        assert_eq!(
            suggest_partition_filter("SELECT SERVICE_DATE_MST FROM mart_a", &columns).unwrap_err(),
            SqlValidationError::MissingPartitionFilter {
                column: "service_date_mst".into()
            }
        );
    }

    #[test]
    fn for_engine_derives_bigquery_namespaces() {
        let mut models = ModelCatalog::new();
        models.insert(
            "mart_a".into(),
            ModelInfo::new("mart_a").with_fq_name("whyline-denver.mart_denver.mart_a"),
        );
        let target = WarehouseTarget::default();
        let settings = GuardrailSettings::default();

        let config = GuardrailConfig::for_engine(Engine::BigQuery, &models, &target, &settings);
        assert_eq!(config.allowed_projects, Some(BTreeSet::from(["whyline-denver".to_string()])));
        assert_eq!(config.allowed_datasets, Some(BTreeSet::from(["mart_denver".to_string()])));

        let config = GuardrailConfig::for_engine(Engine::DuckDb, &models, &target, &settings);
        assert!(config.allowed_projects.is_none());
        assert!(config.allowed_models.contains("mart_a"));
    }

    #[test]
    fn for_engine_falls_back_to_target() {
        let mut models = ModelCatalog::new();
        models.insert("mart_a".into(), ModelInfo::new("mart_a"));
        let target = WarehouseTarget {
            project_id: "proj-x".into(),
            dataset: "ds_y".into(),
        };

        let config = GuardrailConfig::for_engine(Engine::BigQuery, &models, &target, &GuardrailSettings::default());
        assert_eq!(config.allowed_projects, Some(BTreeSet::from(["proj-x".to_string()])));
        assert_eq!(config.allowed_datasets, Some(BTreeSet::from(["ds_y".to_string()])));
    }
}
