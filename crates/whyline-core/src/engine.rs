//! Query engine selector

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Warehouse engine a query is validated for and executed against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    /// Local DuckDB warehouse
    #[default]
    DuckDb,

    /// Google BigQuery (production)
    BigQuery,
}

impl Engine {
    /// Stable lowercase identifier, as used in config files and cache keys
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DuckDb => "duckdb",
            Self::BigQuery => "bigquery",
        }
    }

    /// All supported engines
    pub fn all() -> [Engine; 2] {
        [Self::DuckDb, Self::BigQuery]
    }
}

impl std::fmt::Display for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Engine {
    type Err = UnknownEngine;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "duckdb" => Ok(Self::DuckDb),
            "bigquery" => Ok(Self::BigQuery),
            _ => Err(UnknownEngine(s.to_string())),
        }
    }
}

/// Returned when an engine name is neither `duckdb` nor `bigquery`
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("ENGINE must be duckdb or bigquery, got '{0}'")]
pub struct UnknownEngine(pub String);
