//! Configuration schema (whyline.toml)
//!
//! Every section is optional. Values from the file are then overridden by the
//! process environment (`GCP_PROJECT_ID`, `BQ_DATASET_MART`, `ENGINE`, ...),
//! which the binary populates from `.env` before loading.

use crate::engine::Engine;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default row cap appended to queries that have no LIMIT
pub const SAFE_LIMIT: u64 = 5000;

/// Default partition column for the reliability marts
pub const DEFAULT_PARTITION_COLUMN: &str = "service_date_mst";

/// Marts exposed to the app when the config does not override the list
pub const ALLOWLISTED_MARTS: [&str; 7] = [
    "mart_reliability_by_route_day",
    "mart_reliability_by_stop_hour",
    "mart_crash_proximity_by_stop",
    "mart_access_score_by_stop",
    "mart_vulnerability_by_stop",
    "mart_priority_hotspots",
    "mart_weather_impacts",
];

/// Default BigQuery project and mart dataset used to qualify bare table names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseTarget {
    pub project_id: String,
    pub dataset: String,
}

impl WarehouseTarget {
    pub fn new(project_id: impl Into<String>, dataset: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            dataset: dataset.into(),
        }
    }

    /// Backtick-quoted `project.dataset.table` reference
    pub fn qualify(&self, table: &str) -> String {
        format!("`{}.{}.{}`", self.project_id, self.dataset, table)
    }
}

impl Default for WarehouseTarget {
    fn default() -> Self {
        Self::new("whyline-denver", "mart_denver")
    }
}

/// Warehouse connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseSettings {
    /// GCP project holding the marts
    pub project_id: String,

    /// BigQuery dataset holding the marts
    pub dataset_mart: String,

    /// Engine used when a request does not name one
    pub default_engine: Engine,

    /// Hard cap on bytes billed per BigQuery query
    pub max_bytes_billed: u64,

    /// Service account key file (empty means Application Default Credentials)
    pub credentials_path: Option<PathBuf>,
}

impl Default for WarehouseSettings {
    fn default() -> Self {
        let target = WarehouseTarget::default();
        Self {
            project_id: target.project_id,
            dataset_mart: target.dataset,
            default_engine: Engine::DuckDb,
            max_bytes_billed: 2_000_000_000,
            credentials_path: None,
        }
    }
}

impl WarehouseSettings {
    pub fn target(&self) -> WarehouseTarget {
        WarehouseTarget::new(&self.project_id, &self.dataset_mart)
    }
}

/// Local DuckDB warehouse file and session limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DuckDbSettings {
    /// Exported warehouse database
    pub path: PathBuf,

    /// Open without write access
    pub read_only: bool,

    /// `PRAGMA threads`
    pub threads: u32,

    /// `PRAGMA memory_limit`
    pub memory_limit: String,
}

impl Default for DuckDbSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/warehouse.duckdb"),
            read_only: true,
            threads: 2,
            memory_limit: "1GB".to_string(),
        }
    }
}

/// Guardrail policy defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardrailSettings {
    /// Rows appended as LIMIT when a query has none
    pub enforce_limit: u64,

    /// Columns that require a WHERE clause on BigQuery
    pub partition_columns: Vec<String>,

    /// Ignore string literals and comments in the semicolon/denylist checks
    pub lexical_scan: bool,
}

impl Default for GuardrailSettings {
    fn default() -> Self {
        Self {
            enforce_limit: SAFE_LIMIT,
            partition_columns: vec![DEFAULT_PARTITION_COLUMN.to_string()],
            lexical_scan: false,
        }
    }
}

/// dbt artifact location and model allow-list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbtSettings {
    /// Directory containing manifest.json and catalog.json
    pub target_path: PathBuf,

    /// Marts exposed to the app (empty means every `allow_in_app` model)
    pub allowlisted_marts: Vec<String>,
}

impl Default for DbtSettings {
    fn default() -> Self {
        Self {
            target_path: PathBuf::from("dbt/target"),
            allowlisted_marts: ALLOWLISTED_MARTS.iter().map(|m| m.to_string()).collect(),
        }
    }
}

/// Which LLM backend proposes SQL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProviderKind {
    /// Canned keyword-matched responses, no network
    #[default]
    #[serde(alias = "default")]
    Stub,

    /// Google Gemini over the Generative Language API
    Gemini,
}

impl LlmProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stub => "stub",
            Self::Gemini => "gemini",
        }
    }
}

impl std::str::FromStr for LlmProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stub" | "default" => Ok(Self::Stub),
            "gemini" => Ok(Self::Gemini),
            other => Err(ConfigError::Invalid(format!(
                "LLM provider '{}' is not implemented yet.",
                other
            ))),
        }
    }
}

/// LLM provider settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub provider: LlmProviderKind,

    /// Provider model name
    pub model: String,

    /// API key; only ever read from the environment
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: LlmProviderKind::Stub,
            model: "gemini-2.5-flash".to_string(),
            api_key: None,
        }
    }
}

/// Cache lifetimes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub query_ttl_secs: u64,
    pub prompt_ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            query_ttl_secs: 180,
            prompt_ttl_secs: 900,
        }
    }
}

/// Audit log settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// JSONL file receiving one record per executed query
    pub query_log_path: PathBuf,

    /// Size after which the log is rotated
    pub max_log_bytes: u64,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            query_log_path: PathBuf::from("data/logs/queries.jsonl"),
            max_log_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub warehouse: WarehouseSettings,
    pub duckdb: DuckDbSettings,
    pub guardrails: GuardrailSettings,
    pub dbt: DbtSettings,
    pub llm: LlmSettings,
    pub cache: CacheSettings,
    pub logging: LoggingSettings,
}

impl Settings {
    /// Load settings from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;

        Self::from_toml(&contents)
    }

    /// Load settings from a TOML string
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        let settings: Settings =
            toml::from_str(toml).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Save settings to a TOML file
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let toml = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, toml).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (environment, test maps)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(project) = get("GCP_PROJECT_ID") {
            self.warehouse.project_id = project;
        }
        if let Some(dataset) = get("BQ_DATASET_MART") {
            self.warehouse.dataset_mart = dataset;
        }
        if let Some(engine) = get("ENGINE") {
            self.warehouse.default_engine = engine
                .parse()
                .map_err(|e: crate::engine::UnknownEngine| ConfigError::Invalid(e.to_string()))?;
        }
        if let Some(bytes) = get("MAX_BYTES_BILLED") {
            self.warehouse.max_bytes_billed = bytes.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("MAX_BYTES_BILLED must be an integer, got '{}'", bytes))
            })?;
        }
        if let Some(path) = get("GOOGLE_APPLICATION_CREDENTIALS") {
            self.warehouse.credentials_path = Some(PathBuf::from(path));
        }
        if let Some(path) = get("DUCKDB_PATH") {
            self.duckdb.path = PathBuf::from(path);
        }
        if let Some(flag) = get("DUCKDB_READ_ONLY") {
            self.duckdb.read_only = !matches!(flag.trim(), "0" | "false" | "False");
        }
        if let Some(threads) = get("DUCKDB_THREADS") {
            self.duckdb.threads = threads.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("DUCKDB_THREADS must be an integer, got '{}'", threads))
            })?;
        }
        if let Some(limit) = get("DUCKDB_MEMORY_LIMIT") {
            self.duckdb.memory_limit = limit;
        }
        if let Some(provider) = get("LLM_PROVIDER") {
            self.llm.provider = provider.parse()?;
        }
        if let Some(model) = get("GEMINI_MODEL") {
            self.llm.model = model;
        }
        if let Some(key) = get("GEMINI_API_KEY").or_else(|| get("LLM_API_KEY")) {
            self.llm.api_key = Some(key);
        }

        self.validate()
    }

    /// Minimal consistency checks
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.guardrails.enforce_limit == 0 {
            return Err(ConfigError::Invalid(
                "guardrails.enforce_limit must be greater than zero".to_string(),
            ));
        }
        if self.duckdb.threads == 0 {
            return Err(ConfigError::Invalid("duckdb.threads must be greater than zero".to_string()));
        }
        if self.warehouse.project_id.trim().is_empty() {
            return Err(ConfigError::Invalid("warehouse.project_id must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Config error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
