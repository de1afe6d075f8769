//! Guardrail violations
//!
//! Every variant is a policy failure on the submitted SQL, never a system
//! fault. Callers surface the message to the user (HTTP 400 / inline error).

/// Raised when a SQL string violates the guardrail policy
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SqlValidationError {
    #[error("No SQL provided.")]
    Empty,

    #[error("Multiple SQL statements detected; only single SELECT queries are allowed.")]
    MultipleStatements,

    #[error("Only SELECT statements are allowed.")]
    NotSelect,

    #[error("CTE detected without a SELECT statement.")]
    CteWithoutSelect,

    #[error("Disallowed keyword detected: {0}.")]
    DisallowedKeyword(String),

    #[error(
        "Query references unauthorized tables: {}. Only app-approved marts may be queried.",
        .0.join(", ")
    )]
    UnauthorizedTables(Vec<String>),

    #[error(
        "Query references unauthorized project(s): {}. Only app-approved marts may be queried.",
        .0.join(", ")
    )]
    UnauthorizedProjects(Vec<String>),

    #[error(
        "Query references unauthorized dataset(s): {}. Only app-approved marts may be queried.",
        .0.join(", ")
    )]
    UnauthorizedDatasets(Vec<String>),

    #[error(
        "The query touches `{column}` but no WHERE clause was provided. \
         Please filter to a recent date range to keep the query efficient."
    )]
    MissingPartitionFilter { column: String },

    #[error("Could not tokenize SQL: {0}")]
    Tokenize(String),
}

impl SqlValidationError {
    /// Stable identifier for the violation kind
    pub fn code(&self) -> &'static str {
        match self {
            Self::Empty => "SQL_EMPTY",
            Self::MultipleStatements => "SQL_MULTIPLE_STATEMENTS",
            Self::NotSelect => "SQL_NOT_SELECT",
            Self::CteWithoutSelect => "SQL_CTE_WITHOUT_SELECT",
            Self::DisallowedKeyword(_) => "SQL_DISALLOWED_KEYWORD",
            Self::UnauthorizedTables(_) => "SQL_UNAUTHORIZED_TABLE",
            Self::UnauthorizedProjects(_) => "SQL_UNAUTHORIZED_PROJECT",
            Self::UnauthorizedDatasets(_) => "SQL_UNAUTHORIZED_DATASET",
            Self::MissingPartitionFilter { .. } => "SQL_MISSING_PARTITION_FILTER",
            Self::Tokenize(_) => "SQL_TOKENIZE_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_violation() {
        let err = SqlValidationError::UnauthorizedTables(vec!["mart_a".into(), "mart_b".into()]);
        assert_eq!(
            err.to_string(),
            "Query references unauthorized tables: mart_a, mart_b. Only app-approved marts may be queried."
        );

        let err = SqlValidationError::MissingPartitionFilter {
            column: "service_date_mst".into(),
        };
        assert!(err.to_string().starts_with("The query touches `service_date_mst` but no WHERE clause"));
        assert_eq!(err.code(), "SQL_MISSING_PARTITION_FILTER");

        let err = SqlValidationError::DisallowedKeyword("DROP".into());
        assert_eq!(err.to_string(), "Disallowed keyword detected: DROP.");
    }
}
