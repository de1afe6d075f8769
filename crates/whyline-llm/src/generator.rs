//! Natural-language question to guarded SQL
//!
//! Prompt cache, prompt rendering, provider call, filter injection, then the
//! same sanitize/adapt path every query goes through. Cached SQL is
//! re-validated on the way out.

use crate::cache::PromptCache;
use crate::filters::{add_filter_clauses, FilterState};
use crate::prompt::{build_schema_brief, PromptBuilder, PromptError, DEFAULT_BRIEF_COLUMNS};
use crate::provider::{LlmProvider, ProviderError};
use crate::response::LlmResponse;
use serde::Serialize;
use whyline_core::{Engine, GuardrailSettings, ModelCatalog, WarehouseTarget};
use whyline_sql::{adapt_validated_sql, sanitize_sql, GuardrailConfig, SqlValidationError};

/// SQL generation failures
#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error(transparent)]
    Validation(#[from] SqlValidationError),

    #[error("LLM provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Template(#[from] PromptError),
}

/// Executable SQL for a question
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedSql {
    pub sql: String,
    pub explanation: String,
    pub cache_hit: bool,
}

pub struct SqlGenerator {
    provider: Box<dyn LlmProvider>,
    models: ModelCatalog,
    schema_brief: String,
    target: WarehouseTarget,
    guardrails: GuardrailSettings,
    prompts: PromptBuilder,
    cache: PromptCache,
}

impl SqlGenerator {
    pub fn new(
        provider: Box<dyn LlmProvider>,
        models: ModelCatalog,
        target: WarehouseTarget,
        guardrails: GuardrailSettings,
    ) -> Self {
        let schema_brief = build_schema_brief(&models, DEFAULT_BRIEF_COLUMNS);
        let prompts = PromptBuilder::new().with_row_limit(guardrails.enforce_limit);

        Self {
            provider,
            models,
            schema_brief,
            target,
            guardrails,
            prompts,
            cache: PromptCache::default(),
        }
    }

    pub fn with_cache(mut self, cache: PromptCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn schema_brief(&self) -> &str {
        &self.schema_brief
    }

    pub fn cache(&self) -> &PromptCache {
        &self.cache
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Guardrail config for the loaded models on `engine`
    pub fn guardrail_config(&self, engine: Engine) -> GuardrailConfig {
        GuardrailConfig::for_engine(engine, &self.models, &self.target, &self.guardrails)
    }

    /// Turn a question into sanitized, engine-adapted SQL
    pub async fn generate(
        &self,
        question: &str,
        engine: Engine,
        filters: &FilterState,
    ) -> Result<GeneratedSql, GenerateError> {
        let provider = self.provider.name();
        let config = self.guardrail_config(engine);

        if let Some(cached) = self.cache.get(provider, engine, question, filters) {
            tracing::debug!(provider, %engine, "prompt cache hit");
            let sql = self.finalize(&cached.sql, &config)?;
            return Ok(GeneratedSql {
                sql,
                explanation: cached.explanation,
                cache_hit: true,
            });
        }

        let prompt = self.prompts.render(question, filters, &self.schema_brief)?;
        let response = self.provider.complete(&prompt).await?;

        let candidate = add_filter_clauses(&response.sql, filters);
        let sql = self.finalize(&candidate, &config)?;
        tracing::info!(provider, %engine, "generated sql");
        tracing::debug!(sql = %sql, "sanitized sql");

        self.cache.insert(
            provider,
            engine,
            question,
            filters,
            LlmResponse::new(sql.clone(), response.explanation.clone()),
        );

        Ok(GeneratedSql {
            sql,
            explanation: response.explanation,
            cache_hit: false,
        })
    }

    fn finalize(&self, sql: &str, config: &GuardrailConfig) -> Result<String, SqlValidationError> {
        let sanitized = sanitize_sql(sql, config)?;
        adapt_validated_sql(&sanitized, config, Some(&self.models), &self.target)
    }
}
