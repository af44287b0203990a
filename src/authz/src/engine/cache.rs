//! Cross-request cache of policy store reads
//!
//! Off by default. Every entry is tagged with the store generation it was
//! read under and only serves lookups at that same generation, so a write to
//! the store retires everything cached before it. Entries also expire after
//! a TTL.

use crate::policy::{Policy, Statement};
use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum entries per table
    pub capacity: usize,

    /// Time-to-live of an entry
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            ttl: Duration::from_secs(30),
        }
    }
}

/// `(user_id, realm_id, resource)` of a `policies_for` read
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PolicyKey {
    pub user_id: String,
    pub realm_id: String,
    pub resource: String,
}

impl PolicyKey {
    pub fn new(user_id: &str, realm_id: &str, resource: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            realm_id: realm_id.to_string(),
            resource: resource.to_string(),
        }
    }
}

#[derive(Clone)]
struct CachedEntry<T> {
    value: T,
    generation: u64,
    cached_at: Instant,
}

impl<T> CachedEntry<T> {
    fn new(value: T, generation: u64) -> Self {
        Self {
            value,
            generation,
            cached_at: Instant::now(),
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.cached_at.elapsed() > ttl
    }
}

/// TTL-bounded table over DashMap
struct Table<K, V> {
    entries: DashMap<K, CachedEntry<Arc<V>>>,
}

impl<K: Eq + Hash + Clone, V> Table<K, V> {
    fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// `None` on miss; expired or stale entries are removed and count as a miss
    fn get(
        &self,
        key: &K,
        generation: u64,
        ttl: Duration,
        stats: &DashMap<&'static str, usize>,
    ) -> Option<Arc<V>> {
        let hit = self.entries.get(key).map(|entry| {
            if entry.generation != generation {
                Err("stale")
            } else if entry.is_expired(ttl) {
                Err("expirations")
            } else {
                Ok(entry.value.clone())
            }
        });

        match hit {
            Some(Ok(value)) => {
                increment(stats, "hits");
                Some(value)
            }
            Some(Err(reason)) => {
                self.entries.remove(key);
                increment(stats, reason);
                increment(stats, "misses");
                None
            }
            None => {
                increment(stats, "misses");
                None
            }
        }
    }

    fn put(&self, key: K, value: Arc<V>, generation: u64, capacity: usize) {
        if self.entries.len() >= capacity {
            self.evict(capacity);
        }
        self.entries.insert(key, CachedEntry::new(value, generation));
    }

    /// Drop about a tenth of the entries
    fn evict(&self, capacity: usize) {
        let to_remove = (capacity / 10).max(1);
        let mut removed = 0;
        self.entries.retain(|_, _| {
            if removed < to_remove {
                removed += 1;
                false
            } else {
                true
            }
        });
    }
}

fn increment(stats: &DashMap<&'static str, usize>, key: &'static str) {
    *stats.entry(key).or_insert(0) += 1;
}

/// Cache of `policies_for` and `statements_of` results
pub struct PolicyCache {
    policies: Table<PolicyKey, Vec<Policy>>,
    statements: Table<String, Vec<Statement>>,
    config: CacheConfig,
    stats: DashMap<&'static str, usize>,
}

impl PolicyCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            policies: Table::new(),
            statements: Table::new(),
            config,
            stats: DashMap::new(),
        }
    }

    /// Policies read at `generation`
    pub fn policies(&self, key: &PolicyKey, generation: u64) -> Option<Arc<Vec<Policy>>> {
        self.policies.get(key, generation, self.config.ttl, &self.stats)
    }

    /// `generation` must be the one observed before the store read
    pub fn put_policies(&self, key: PolicyKey, generation: u64, policies: Arc<Vec<Policy>>) {
        self.policies.put(key, policies, generation, self.config.capacity);
    }

    pub fn statements(&self, policy_id: &str, generation: u64) -> Option<Arc<Vec<Statement>>> {
        self.statements
            .get(&policy_id.to_string(), generation, self.config.ttl, &self.stats)
    }

    pub fn put_statements(&self, policy_id: &str, generation: u64, statements: Arc<Vec<Statement>>) {
        self.statements
            .put(policy_id.to_string(), statements, generation, self.config.capacity);
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.policies.entries.clear();
        self.statements.entries.clear();
        self.stats.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let stat = |key: &'static str| self.stats.get(&key).map(|v| *v).unwrap_or(0);
        CacheStats {
            hits: stat("hits"),
            misses: stat("misses"),
            expirations: stat("expirations"),
            stale: stat("stale"),
            entries: self.policies.entries.len() + self.statements.entries.len(),
            max_entries: self.config.capacity * 2,
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub expirations: usize,
    /// Entries dropped because the store was written after they were read
    pub stale: usize,
    pub entries: usize,
    pub max_entries: usize,
}

impl CacheStats {
    /// Calculate cache hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
