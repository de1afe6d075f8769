//! Short-lived result cache for executed queries

use crate::adapter::QueryOutput;
use std::time::Duration;
use whyline_core::{collapse_whitespace, sha256_hex, CacheSettings, Engine, TtlCache};

/// Query results keyed on engine and whitespace-insensitive SQL
#[derive(Debug)]
pub struct QueryCache {
    inner: TtlCache<QueryOutput>,
}

impl QueryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: TtlCache::new(ttl),
        }
    }

    pub fn from_settings(settings: &CacheSettings) -> Self {
        Self::new(Duration::from_secs(settings.query_ttl_secs))
    }

    pub fn key(engine: Engine, sql: &str) -> String {
        format!("{}:{}", engine, sha256_hex(&collapse_whitespace(sql)))
    }

    pub fn get(&self, engine: Engine, sql: &str) -> Option<QueryOutput> {
        self.inner.get(&Self::key(engine, sql))
    }

    pub fn insert(&self, engine: Engine, sql: &str, output: QueryOutput) {
        self.inner.insert(Self::key(engine, sql), output);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn clear(&self) {
        self.inner.clear();
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::from_settings(&CacheSettings::default())
    }
}
