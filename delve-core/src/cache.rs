//! Response cache for provider results.
//!
//! An LRU map with a per-entry TTL. Keys are namespaced by provider name so
//! two providers never share an entry for the same query.

use crate::types::SearchResult;
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Configuration for the response cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Enable caching (default: true).
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Maximum number of entries before LRU eviction (default: 1000).
    #[serde(default = "default_max_size")]
    pub max_size: usize,
    /// Entry lifetime in hours (default: 24).
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: u64,
}

fn default_true() -> bool {
    true
}
fn default_max_size() -> usize {
    1000
}
fn default_ttl_hours() -> u64 {
    24
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: 1000,
            ttl_hours: 24,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_hours * 3600)
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.enabled && self.max_size == 0 {
            errors.push("cache.max_size must be > 0 when the cache is enabled".to_string());
        }
        if self.enabled && self.ttl_hours == 0 {
            errors.push("cache.ttl_hours must be > 0 when the cache is enabled".to_string());
        }
        errors
    }
}

/// Aggregate cache performance metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub entries: usize,
}

impl CacheMetrics {
    /// Compute the hit rate as a fraction (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn accumulate(&mut self, other: &CacheMetrics) {
        self.hits += other.hits;
        self.misses += other.misses;
        self.evictions += other.evictions;
        self.expirations += other.expirations;
        self.entries += other.entries;
    }
}

struct CacheEntry {
    results: Vec<SearchResult>,
    stored_at: Instant,
}

/// Thread-safe LRU + TTL cache of provider responses.
pub struct ResponseCache {
    enabled: bool,
    ttl: Duration,
    entries: Mutex<LruCache<String, CacheEntry>>,
    metrics: Mutex<CacheMetrics>,
}

impl ResponseCache {
    pub fn new(config: &CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_size.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            enabled: config.enabled,
            ttl: config.ttl(),
            entries: Mutex::new(LruCache::new(capacity)),
            metrics: Mutex::new(CacheMetrics::default()),
        }
    }

    /// A cache that never stores anything.
    pub fn disabled() -> Self {
        Self::new(&CacheConfig {
            enabled: false,
            ..Default::default()
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn full_key(namespace: &str, key: &str) -> String {
        format!("{namespace}:{key}")
    }

    /// Look up an entry, touching it on hit and dropping it if expired.
    pub fn get(&self, namespace: &str, key: &str) -> Option<Vec<SearchResult>> {
        if !self.enabled {
            return None;
        }
        let full = Self::full_key(namespace, key);
        let mut entries = self.entries.lock();
        let mut metrics = self.metrics.lock();

        let expired = match entries.get(&full) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => {
                metrics.hits += 1;
                return Some(entry.results.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(&full);
            metrics.expirations += 1;
            debug!(key = %full, "Cache entry expired");
        }
        metrics.misses += 1;
        None
    }

    /// Store results, evicting the least recently used entry when full.
    pub fn put(&self, namespace: &str, key: &str, results: Vec<SearchResult>) {
        if !self.enabled {
            return;
        }
        let full = Self::full_key(namespace, key);
        let entry = CacheEntry {
            results,
            stored_at: Instant::now(),
        };
        let mut entries = self.entries.lock();
        if let Some((evicted, _)) = entries.push(full.clone(), entry) {
            if evicted != full {
                self.metrics.lock().evictions += 1;
                debug!(key = %evicted, "Cache entry evicted");
            }
        }
    }

    pub fn invalidate(&self, namespace: &str, key: &str) -> bool {
        self.entries
            .lock()
            .pop(&Self::full_key(namespace, key))
            .is_some()
    }

    /// Remove every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.stored_at.elapsed() >= self.ttl)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        self.metrics.lock().expirations += expired.len() as u64;
        expired.len()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn metrics(&self) -> CacheMetrics {
        let mut snapshot = self.metrics.lock().clone();
        snapshot.entries = self.len();
        snapshot
    }
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("enabled", &self.enabled)
            .field("ttl", &self.ttl)
            .field("entries", &self.len())
            .finish()
    }
}
