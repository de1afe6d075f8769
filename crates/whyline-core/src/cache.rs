//! In-memory TTL cache
//!
//! Entries expire after a fixed time-to-live. Expired entries are dropped when
//! read, and on every insert the oldest entries are evicted from the front of
//! the insertion queue for as long as they are expired.

use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug)]
struct CacheState<V> {
    entries: HashMap<String, CacheEntry<V>>,
    order: VecDeque<String>,
}

/// String-keyed cache with a single TTL for all entries
///
/// ## Usage
///
/// ```rust,ignore
/// let cache: TtlCache<String> = TtlCache::new(Duration::from_secs(180));
/// cache.insert("key".to_string(), "value".to_string());
/// assert_eq!(cache.get("key").as_deref(), Some("value"));
/// ```
#[derive(Debug)]
pub struct TtlCache<V> {
    state: Mutex<CacheState<V>>,
    ttl: Duration,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
            ttl,
        }
    }

    /// Time-to-live applied to new entries
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Get a value if present and not expired
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut state = self.state.lock().ok()?;

        let expired = match state.entries.get(key) {
            None => return None,
            Some(entry) => entry.is_expired(now),
        };

        if expired {
            state.entries.remove(key);
            return None;
        }

        state.entries.get(key).map(|entry| entry.value.clone())
    }

    /// Store a value, replacing any previous entry for the key
    pub fn insert(&self, key: String, value: V) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + self.ttl,
        };

        if let Ok(mut state) = self.state.lock() {
            state.entries.insert(key.clone(), entry);
            state.order.push_back(key);
            Self::evict_expired(&mut state);
        }
    }

    /// Number of stored entries (including expired ones not yet evicted)
    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry
    pub fn clear(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.entries.clear();
            state.order.clear();
        }
    }

    fn evict_expired(state: &mut CacheState<V>) {
        let now = Instant::now();
        while let Some(key) = state.order.front() {
            let stale = state
                .entries
                .get(key)
                .map_or(true, |entry| entry.is_expired(now));
            if !stale {
                break;
            }
            if let Some(key) = state.order.pop_front() {
                // A re-inserted key may still be queued further back; only drop
                // the entry itself if it really expired.
                if state.entries.get(&key).is_some_and(|e| e.is_expired(now)) {
                    state.entries.remove(&key);
                }
            }
        }
    }
}

/// Hex-encoded SHA-256 of a string
pub fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Collapse runs of whitespace into single spaces
pub fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn insert_and_get() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.insert("a".to_string(), 1);

        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn zero_ttl_expires_immediately() {
        let cache = TtlCache::new(Duration::ZERO);
        cache.insert("a".to_string(), 1);

        assert_eq!(cache.get("a"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn expiration_after_ttl() {
        let cache = TtlCache::new(Duration::from_millis(50));
        cache.insert("a".to_string(), "value".to_string());
        assert!(cache.get("a").is_some());

        sleep(Duration::from_millis(80));
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn insert_evicts_expired_heads() {
        let cache = TtlCache::new(Duration::from_millis(30));
        cache.insert("old".to_string(), 1);
        sleep(Duration::from_millis(50));

        cache.insert("new".to_string(), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("new"), Some(2));
    }

    #[test]
    fn reinsert_keeps_fresh_value() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.insert("a".to_string(), 1);
        cache.insert("a".to_string(), 2);

        assert_eq!(cache.get("a"), Some(2));
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn hashing_helpers() {
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(collapse_whitespace("  SELECT\n  1\t "), "SELECT 1");
    }
}
