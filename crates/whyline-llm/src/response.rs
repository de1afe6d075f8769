//! Model output parsing

use crate::provider::ProviderError;
use serde::{Deserialize, Serialize};

/// Explanation used when the model returns none
pub const DEFAULT_EXPLANATION: &str = "Generated by Gemini.";

/// Candidate SQL plus a plain-language explanation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmResponse {
    pub sql: String,
    pub explanation: String,
}

impl LlmResponse {
    pub fn new(sql: impl Into<String>, explanation: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            explanation: explanation.into(),
        }
    }
}

/// Remove a surrounding markdown code fence and its language hint
pub fn strip_code_fence(text: &str) -> String {
    let mut cleaned = text.trim();

    if let Some(rest) = cleaned.strip_prefix("```") {
        cleaned = match rest.split_once('\n') {
            Some((_language, body)) => body,
            None => "",
        };
    }
    if let Some(rest) = cleaned.strip_suffix("```") {
        cleaned = rest;
    }

    cleaned.trim().trim_matches('`').to_string()
}

/// Parse a `{"sql": ..., "explanation": ...}` payload
///
/// Fences inside `sql` are stripped; a missing explanation gets
/// [`DEFAULT_EXPLANATION`].
pub fn parse_response_payload(payload: &str) -> Result<LlmResponse, ProviderError> {
    let data: serde_json::Value =
        serde_json::from_str(payload).map_err(|e| ProviderError::InvalidJson(e.to_string()))?;

    let sql = strip_code_fence(str_field(&data, "sql")).trim().to_string();
    if sql.is_empty() {
        return Err(ProviderError::MissingSql);
    }

    let explanation = match str_field(&data, "explanation").trim() {
        "" => DEFAULT_EXPLANATION.to_string(),
        text => text.to_string(),
    };

    Ok(LlmResponse { sql, explanation })
}

fn str_field<'a>(data: &'a serde_json::Value, name: &str) -> &'a str {
    data.get(name).and_then(|v| v.as_str()).unwrap_or_default()
}
