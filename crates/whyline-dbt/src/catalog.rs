//! dbt catalog.json parsing (warehouse column types)

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// dbt catalog.json structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub nodes: HashMap<String, CatalogNode>,
}

impl Catalog {
    pub fn from_file(path: &Path) -> Result<Self, CatalogError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| CatalogError::IoError(path.display().to_string(), e.to_string()))?;

        Self::from_str(&contents)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(json: &str) -> Result<Self, CatalogError> {
        serde_json::from_str(json).map_err(|e| CatalogError::ParseError(e.to_string()))
    }

    pub fn get_node(&self, unique_id: &str) -> Option<&CatalogNode> {
        self.nodes.get(unique_id)
    }
}

/// Catalog entry for one relation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogNode {
    #[serde(default)]
    pub columns: HashMap<String, CatalogColumn>,
}

/// Column as reported by the warehouse
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogColumn {
    #[serde(rename = "type", default)]
    pub data_type: Option<String>,

    /// Ordinal position in the relation
    #[serde(default)]
    pub index: Option<u32>,

    /// Warehouse column comment
    #[serde(default, alias = "description")]
    pub comment: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Failed to read catalog file {0}: {1}")]
    IoError(String, String),

    #[error("Failed to parse catalog JSON: {0}")]
    ParseError(String),
}
