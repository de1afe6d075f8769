//! dbt artifact parsing
//!
//! This crate handles:
//! - Parsing manifest.json (model names, relation names, descriptions, meta)
//! - Parsing catalog.json (warehouse column types and order)
//! - Building the allow-listed `ModelInfo` catalog for the app

pub mod artifacts;
pub mod catalog;
pub mod manifest;

pub use artifacts::{ArtifactError, DbtArtifacts};
pub use catalog::{Catalog, CatalogColumn, CatalogError, CatalogNode};
pub use manifest::{
    ColumnDefinition, Manifest, ManifestColumns, ManifestError, ManifestMetadata, ManifestNode, NodeConfig,
};
