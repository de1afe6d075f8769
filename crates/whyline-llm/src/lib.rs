//! LLM-backed SQL generation
//!
//! This crate handles:
//! - Condensing allow-listed models into a schema brief
//! - Rendering the generation prompt (minijinja)
//! - Calling the configured provider (stub or Gemini)
//! - Parsing fenced JSON responses
//! - Injecting sidebar filters into candidate SQL
//! - Caching responses per question

pub mod cache;
pub mod filters;
pub mod generator;
pub mod prompt;
pub mod provider;
pub mod response;

pub use cache::PromptCache;
pub use filters::{add_filter_clauses, FilterState};
pub use generator::{GenerateError, GeneratedSql, SqlGenerator};
pub use prompt::{build_prompt, build_schema_brief, PromptBuilder, PromptError, DEFAULT_BRIEF_COLUMNS};
pub use provider::{provider_from_settings, GeminiProvider, LlmProvider, ProviderError, StubProvider};
pub use response::{parse_response_payload, strip_code_fence, LlmResponse, DEFAULT_EXPLANATION};
