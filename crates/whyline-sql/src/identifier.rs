//! Table identifier splitting
//!
//! Turns `` `proj`.dataset.table ``, `dataset.table` or `table` into its
//! lower-cased project / dataset / table segments.

use std::fmt;

/// A table reference found in a FROM or JOIN clause
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableReference {
    /// Project segment, present for three-part names
    pub project: Option<String>,

    /// Dataset segment, present for two- and three-part names
    pub dataset: Option<String>,

    /// Base table name
    pub table: String,

    /// Token as written in the SQL
    pub raw: String,
}

impl TableReference {
    /// Whether the reference carries a project or dataset
    pub fn is_qualified(&self) -> bool {
        self.project.is_some() || self.dataset.is_some()
    }
}

impl fmt::Display for TableReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// Split a dotted, optionally backticked identifier
///
/// Longer chains keep only their trailing `project.dataset.table`. Returns
/// `None` when the identifier has no segments at all.
pub fn split_identifier(identifier: &str) -> Option<TableReference> {
    let token = identifier.trim();
    if token.is_empty() {
        return None;
    }

    let parts: Vec<String> = token
        .split('.')
        .filter(|segment| !segment.is_empty())
        .map(|segment| segment.trim_matches('`').to_lowercase())
        .collect();

    let (project, dataset, table) = match parts.as_slice() {
        [] => return None,
        [table] => (None, None, table.clone()),
        [dataset, table] => (None, Some(dataset.clone()), table.clone()),
        [.., project, dataset, table] => (Some(project.clone()), Some(dataset.clone()), table.clone()),
    };

    Some(TableReference {
        project,
        dataset,
        table,
        raw: token.to_string(),
    })
}

/// Lower-cased name with surrounding backticks removed
pub(crate) fn normalize_name(name: &str) -> String {
    name.trim_matches('`').to_lowercase()
}
