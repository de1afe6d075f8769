//! WhyLine Core
//!
//! Shared domain types for the WhyLine analytics backend: settings, the engine
//! selector, allow-listed model metadata, the TTL cache and the query audit log.

pub mod audit;
pub mod cache;
pub mod config;
pub mod engine;
pub mod model;

pub use audit::{AuditError, QueryLog, QueryLogEntry, QueryLogRecord};
pub use cache::{collapse_whitespace, sha256_hex, TtlCache};
pub use config::{
    CacheSettings, ConfigError, DbtSettings, DuckDbSettings, GuardrailSettings, LlmProviderKind, LlmSettings,
    LoggingSettings, Settings, WarehouseSettings, WarehouseTarget, ALLOWLISTED_MARTS,
    DEFAULT_PARTITION_COLUMN, SAFE_LIMIT,
};
pub use engine::{Engine, UnknownEngine};
pub use model::{ColumnInfo, ModelCatalog, ModelInfo};
