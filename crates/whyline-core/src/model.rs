//! Allow-listed model metadata
//!
//! Read-only reference data produced by the dbt artifact loader and consumed by
//! the guardrails (allow-list, namespaces), the engine adapter (table
//! qualification) and the prompt builder (schema brief).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Model catalog keyed by model name
pub type ModelCatalog = HashMap<String, ModelInfo>;

/// A column of an allow-listed model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Column name
    pub name: String,

    /// Warehouse data type (e.g. "DATE", "INT64")
    #[serde(rename = "type")]
    pub data_type: Option<String>,

    /// Column description
    pub description: Option<String>,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: None,
            description: None,
        }
    }

    pub fn with_type(mut self, data_type: impl Into<String>) -> Self {
        self.data_type = Some(data_type.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// An allow-listed model (dbt mart) the analytics layer may query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Model name (e.g. "mart_access_score_by_stop")
    pub name: String,

    /// Fully qualified relation name, possibly backtick-quoted per segment
    pub fq_name: String,

    /// Model description
    pub description: Option<String>,

    /// Columns in warehouse order
    #[serde(default)]
    pub columns: Vec<ColumnInfo>,
}

impl ModelInfo {
    /// Create a model whose fully qualified name is just its name
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            fq_name: name.clone(),
            name,
            description: None,
            columns: Vec::new(),
        }
    }

    /// Set the fully qualified relation name
    pub fn with_fq_name(mut self, fq_name: impl Into<String>) -> Self {
        self.fq_name = fq_name.into();
        self
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Append a column
    pub fn with_column(mut self, column: ColumnInfo) -> Self {
        self.columns.push(column);
        self
    }

    /// Look up a column by name
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Column names in order
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }
}
