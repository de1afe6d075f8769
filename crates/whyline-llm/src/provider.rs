//! LLM providers
//!
//! A provider turns a rendered prompt into candidate SQL plus an
//! explanation. The stub is deterministic and needs no network.

use crate::response::{parse_response_payload, strip_code_fence, LlmResponse};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use whyline_core::{LlmProviderKind, LlmSettings};

/// Default Generative Language API endpoint
pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Errors raised while calling a provider
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("GEMINI_API_KEY is not set in the environment.")]
    MissingApiKey,

    #[error("LLM request failed: {0}")]
    Http(String),

    #[error("LLM API error ({status}): {body}")]
    Status { status: u16, body: String },

    #[error("Gemini returned an empty response.")]
    EmptyResponse,

    #[error("Gemini response was not valid JSON: {0}")]
    InvalidJson(String),

    #[error("Gemini response missing 'sql'.")]
    MissingSql,
}

/// Text-generation backend
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name used in cache keys and logs
    fn name(&self) -> &str;

    async fn complete(&self, prompt: &str) -> Result<LlmResponse, ProviderError>;
}

/// Keyword-driven canned responses
#[derive(Debug, Clone, Copy, Default)]
pub struct StubProvider;

impl StubProvider {
    fn respond(prompt: &str) -> LlmResponse {
        let lower = prompt.to_lowercase();
        if lower.contains("worst") && lower.contains("route") {
            return LlmResponse::new(
                "SELECT route_id,\n       \
                 AVG(1 - pct_on_time) AS avg_delay_ratio,\n       \
                 AVG(mean_delay_sec) AS avg_delay_seconds\n\
                 FROM mart_reliability_by_route_day\n\
                 WHERE service_date_mst >= DATE_SUB(CURRENT_DATE(), INTERVAL 30 DAY)\n\
                 GROUP BY route_id\n\
                 ORDER BY avg_delay_ratio DESC\n\
                 LIMIT 10",
                "Finds the ten routes with the most severe delays over the past month, \
                 highlighting where riders feel the biggest pain today.",
            );
        }
        LlmResponse::new(
            "SELECT *\nFROM mart_access_score_by_stop\nLIMIT 100",
            "Default stub query returning access scores.",
        )
    }
}

#[async_trait]
impl LlmProvider for StubProvider {
    fn name(&self) -> &str {
        LlmProviderKind::Stub.as_str()
    }

    async fn complete(&self, prompt: &str) -> Result<LlmResponse, ProviderError> {
        Ok(Self::respond(prompt))
    }
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<RequestContent<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Default, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Default, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Default, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

impl GenerateContentResponse {
    /// Text of every candidate part, newline-joined
    fn text(&self) -> String {
        self.candidates
            .iter()
            .filter_map(|c| c.content.as_ref())
            .flat_map(|content| content.parts.iter())
            .filter_map(|part| part.text.as_deref())
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Google Gemini over the Generative Language REST API
#[derive(Debug, Clone)]
pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiProvider {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: GEMINI_API_BASE.to_string(),
        }
    }

    /// Point at a different endpoint (proxies, tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn from_settings(settings: &LlmSettings) -> Result<Self, ProviderError> {
        let api_key = settings
            .api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or(ProviderError::MissingApiKey)?;
        Ok(Self::new(api_key, settings.model.clone()))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn name(&self) -> &str {
        LlmProviderKind::Gemini.as_str()
    }

    async fn complete(&self, prompt: &str) -> Result<LlmResponse, ProviderError> {
        let body = GenerateContentRequest {
            contents: vec![RequestContent {
                parts: vec![RequestPart { text: prompt }],
            }],
        };

        tracing::debug!(model = %self.model, prompt_chars = prompt.len(), "calling Gemini");

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", self.api_key.as_str())
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let payload: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidJson(e.to_string()))?;

        let text = payload.text();
        if text.trim().is_empty() {
            return Err(ProviderError::EmptyResponse);
        }

        parse_response_payload(&strip_code_fence(&text))
    }
}

/// Provider selected by `[llm]` settings
pub fn provider_from_settings(settings: &LlmSettings) -> Result<Box<dyn LlmProvider>, ProviderError> {
    match settings.provider {
        LlmProviderKind::Stub => Ok(Box::new(StubProvider)),
        LlmProviderKind::Gemini => Ok(Box::new(GeminiProvider::from_settings(settings)?)),
    }
}
