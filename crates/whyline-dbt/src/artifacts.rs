//! Allow-listed model loading from dbt artifacts
//!
//! Joins manifest.json (names, relation names, descriptions, `allow_in_app`
//! meta) with catalog.json (warehouse column types and order) into the
//! `ModelInfo` catalog the rest of the system reads.

use crate::catalog::{Catalog, CatalogError, CatalogNode};
use crate::manifest::{Manifest, ManifestError, ManifestNode};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use whyline_core::{ColumnInfo, DbtSettings, ModelCatalog, ModelInfo};

/// Loaded dbt manifest + catalog
#[derive(Debug, Clone)]
pub struct DbtArtifacts {
    target_path: PathBuf,
    manifest: Manifest,
    catalog: Catalog,
    allowlisted_marts: BTreeSet<String>,
}

impl DbtArtifacts {
    /// Load `manifest.json` and `catalog.json` from a dbt target directory
    ///
    /// An empty `allowlisted_marts` exposes every model flagged `allow_in_app`.
    pub fn load<I, S>(target_path: impl AsRef<Path>, allowlisted_marts: I) -> Result<Self, ArtifactError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let target_path = target_path.as_ref().to_path_buf();
        let manifest = Manifest::from_file(&target_path.join("manifest.json"))?;
        let catalog = Catalog::from_file(&target_path.join("catalog.json"))?;

        tracing::debug!(
            target = %target_path.display(),
            nodes = manifest.nodes.len(),
            "loaded dbt artifacts"
        );

        Ok(Self {
            target_path,
            manifest,
            catalog,
            allowlisted_marts: allowlisted_marts.into_iter().map(Into::into).collect(),
        })
    }

    /// Load using `[dbt]` settings
    pub fn from_settings(settings: &DbtSettings) -> Result<Self, ArtifactError> {
        Self::load(&settings.target_path, settings.allowlisted_marts.iter().cloned())
    }

    /// Build from already-parsed artifacts
    pub fn from_parts(manifest: Manifest, catalog: Catalog, allowlisted_marts: BTreeSet<String>) -> Self {
        Self {
            target_path: PathBuf::new(),
            manifest,
            catalog,
            allowlisted_marts,
        }
    }

    pub fn target_path(&self) -> &Path {
        &self.target_path
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Models the app may query, keyed by model name
    pub fn allowed_models(&self) -> ModelCatalog {
        let mut models = ModelCatalog::new();

        for (unique_id, node) in self.manifest.models() {
            if !node.allow_in_app() {
                continue;
            }
            if !self.allowlisted_marts.is_empty() && !self.allowlisted_marts.contains(&node.name) {
                tracing::debug!(model = %node.name, "skipping model outside the mart allow-list");
                continue;
            }
            let info = Self::build_model_info(node, self.catalog.get_node(unique_id));
            models.insert(info.name.clone(), info);
        }

        models
    }

    fn build_model_info(node: &ManifestNode, catalog_entry: Option<&CatalogNode>) -> ModelInfo {
        let fq_name = match node.relation_name.as_deref() {
            Some(relation) if relation.starts_with('`') && relation.ends_with('`') => {
                relation.trim_matches('`').to_string()
            }
            Some(relation) if !relation.is_empty() => relation.to_string(),
            _ => node.name.clone(),
        };

        ModelInfo {
            name: node.name.clone(),
            fq_name,
            description: Some(node.description.clone()).filter(|d| !d.is_empty()),
            columns: Self::extract_columns(node, catalog_entry),
        }
    }

    /// Manifest columns in declaration order, then catalog-only columns in
    /// ordinal order
    fn extract_columns(node: &ManifestNode, catalog_entry: Option<&CatalogNode>) -> Vec<ColumnInfo> {
        let mut catalog_only: Vec<_> = catalog_entry
            .map(|entry| {
                entry
                    .columns
                    .iter()
                    .filter(|(name, _)| !node.columns.contains_key(name))
                    .collect()
            })
            .unwrap_or_default();
        catalog_only.sort_by(|(a_name, a), (b_name, b)| {
            a.index
                .unwrap_or(u32::MAX)
                .cmp(&b.index.unwrap_or(u32::MAX))
                .then_with(|| a_name.cmp(b_name))
        });

        let ordered = node
            .columns
            .keys()
            .chain(catalog_only.into_iter().map(|(name, _)| name));

        ordered
            .map(|name| {
                let manifest_col = node.columns.get(name);
                let catalog_col = catalog_entry.and_then(|entry| entry.columns.get(name));

                let data_type = catalog_col
                    .and_then(|c| c.data_type.clone())
                    .or_else(|| manifest_col.and_then(|c| c.data_type.clone()));
                let description = manifest_col
                    .map(|c| c.description.clone())
                    .filter(|d| !d.is_empty())
                    .or_else(|| catalog_col.and_then(|c| c.comment.clone()));

                ColumnInfo {
                    name: name.clone(),
                    data_type,
                    description,
                }
            })
            .collect()
    }
}

/// Artifact loading errors
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}
