//! dbt manifest.json parsing
//!
//! Only the fields needed to find app-exposed marts are modeled.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

/// dbt manifest.json structure (subset of fields we care about)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Metadata about the manifest
    #[serde(default)]
    pub metadata: ManifestMetadata,

    /// Model, test and seed nodes
    #[serde(default)]
    pub nodes: HashMap<String, ManifestNode>,
}

impl Manifest {
    /// Load manifest from file
    pub fn from_file(path: &Path) -> Result<Self, ManifestError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ManifestError::IoError(path.display().to_string(), e.to_string()))?;

        Self::from_str(&contents)
    }

    /// Parse manifest from JSON string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(json: &str) -> Result<Self, ManifestError> {
        serde_json::from_str(json).map_err(|e| ManifestError::ParseError(e.to_string()))
    }

    /// Model nodes keyed by unique_id
    pub fn models(&self) -> impl Iterator<Item = (&String, &ManifestNode)> {
        self.nodes
            .iter()
            .filter(|(id, node)| id.starts_with("model.") && node.resource_type == "model")
    }

    /// Get a specific node by unique_id
    pub fn get_node(&self, unique_id: &str) -> Option<&ManifestNode> {
        self.nodes.get(unique_id)
    }
}

/// Manifest metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManifestMetadata {
    #[serde(default)]
    pub dbt_schema_version: String,
    #[serde(default)]
    pub dbt_version: String,
    #[serde(default)]
    pub generated_at: String,
}

/// A node in the manifest (model, test, seed, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestNode {
    /// Unique identifier (e.g., "model.whyline.mart_weather_impacts")
    pub unique_id: String,

    /// Node name
    pub name: String,

    /// Resource type (model, test, snapshot, etc.)
    #[serde(default = "default_resource_type")]
    pub resource_type: String,

    /// Rendered relation, e.g. "`whyline-denver`.`mart_denver`.`mart_x`"
    #[serde(default)]
    pub relation_name: Option<String>,

    #[serde(default)]
    pub database: Option<String>,

    #[serde(default)]
    pub schema: Option<String>,

    /// Node configuration
    #[serde(default)]
    pub config: NodeConfig,

    #[serde(default)]
    pub description: String,

    /// Column definitions from YAML, in declaration order
    #[serde(default)]
    pub columns: ManifestColumns,
}

fn default_resource_type() -> String {
    "model".to_string()
}

impl ManifestNode {
    /// Whether the model opts into the app via `meta.allow_in_app`
    pub fn allow_in_app(&self) -> bool {
        match self.config.meta.get("allow_in_app") {
            Some(serde_json::Value::Bool(flag)) => *flag,
            Some(serde_json::Value::String(s)) => {
                matches!(s.to_ascii_lowercase().as_str(), "true" | "yes" | "1")
            }
            Some(serde_json::Value::Number(n)) => n.as_i64().is_some_and(|n| n != 0),
            _ => false,
        }
    }
}

/// Node configuration (from dbt_project.yml or model config)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub materialized: Option<String>,

    /// Free-form meta block
    #[serde(default)]
    pub meta: HashMap<String, serde_json::Value>,
}

/// Column definition from manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    /// Column name
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Data type (if declared in YAML)
    #[serde(default)]
    pub data_type: Option<String>,
}

/// Column definitions keyed by name, kept in manifest (YAML) order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManifestColumns(Vec<(String, ColumnDefinition)>);

impl ManifestColumns {
    pub fn get(&self, name: &str) -> Option<&ColumnDefinition> {
        self.0.iter().find(|(key, _)| key == name).map(|(_, column)| column)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Column names in declaration order
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.iter().map(|(key, _)| key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ColumnDefinition)> {
        self.0.iter().map(|(key, column)| (key, column))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, ColumnDefinition)> for ManifestColumns {
    fn from_iter<I: IntoIterator<Item = (String, ColumnDefinition)>>(iter: I) -> Self {
        let mut columns = Self::default();
        for (key, column) in iter {
            match columns.0.iter_mut().find(|(existing, _)| *existing == key) {
                Some(slot) => slot.1 = column,
                None => columns.0.push((key, column)),
            }
        }
        columns
    }
}

impl Serialize for ManifestColumns {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, column) in &self.0 {
            map.serialize_entry(key, column)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ManifestColumns {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ColumnsVisitor;

        impl<'de> Visitor<'de> for ColumnsVisitor {
            type Value = ManifestColumns;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of column definitions")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some(entry) = access.next_entry::<String, ColumnDefinition>()? {
                    entries.push(entry);
                }
                Ok(entries.into_iter().collect())
            }
        }

        deserializer.deserialize_map(ColumnsVisitor)
    }
}

/// Manifest parsing errors
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("Failed to read manifest file {0}: {1}")]
    IoError(String, String),

    #[error("Failed to parse manifest JSON: {0}")]
    ParseError(String),
}
