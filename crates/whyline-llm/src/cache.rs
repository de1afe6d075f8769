//! Prompt-level response cache
//!
//! Keyed on provider, engine, normalized question and canonical filters so a
//! repeated question skips the provider round trip.

use crate::filters::FilterState;
use crate::response::LlmResponse;
use std::time::Duration;
use whyline_core::{collapse_whitespace, sha256_hex, CacheSettings, Engine, TtlCache};

/// Cached LLM output per question
#[derive(Debug)]
pub struct PromptCache {
    inner: TtlCache<LlmResponse>,
}

impl PromptCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: TtlCache::new(ttl),
        }
    }

    pub fn from_settings(settings: &CacheSettings) -> Self {
        Self::new(Duration::from_secs(settings.prompt_ttl_secs))
    }

    /// Case- and whitespace-insensitive on the question, order-insensitive
    /// on list filters
    pub fn key(provider: &str, engine: Engine, question: &str, filters: &FilterState) -> String {
        let normalized = collapse_whitespace(question).to_lowercase();
        let payload = format!("{}:{}:{}:{}", provider, engine, normalized, filters.to_cache_json());
        sha256_hex(&payload)
    }

    pub fn get(&self, provider: &str, engine: Engine, question: &str, filters: &FilterState) -> Option<LlmResponse> {
        self.inner.get(&Self::key(provider, engine, question, filters))
    }

    pub fn insert(&self, provider: &str, engine: Engine, question: &str, filters: &FilterState, value: LlmResponse) {
        self.inner.insert(Self::key(provider, engine, question, filters), value);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl Default for PromptCache {
    fn default() -> Self {
        Self::from_settings(&CacheSettings::default())
    }
}
