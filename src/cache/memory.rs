//! In-process cache service backed by an LRU map with per-entry expiry.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use metrics::counter;

use super::config::CacheConfig;
use super::keys::CacheUri;
use super::lock::mutex_lock;
use super::service::{CacheEntry, CacheError, KvCache};

const SOURCE: &str = "cache::memory";
pub(crate) const METRIC_CACHE_EVICT_TOTAL: &str = "docstash_cache_evict_total";

struct StoredValue {
    value: Bytes,
    /// `None` when the ttl reaches past what `Instant` can represent.
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

pub struct MemoryKvCache {
    entries: Mutex<LruCache<CacheUri, StoredValue>>,
}

impl MemoryKvCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(config.memory_capacity_non_zero())),
        }
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a live entry exists, without touching recency.
    pub fn contains(&self, key: &CacheUri) -> bool {
        mutex_lock(&self.entries, SOURCE, "contains")
            .peek(key)
            .is_some_and(|stored| stored.is_live(Instant::now()))
    }

    fn lookup(entries: &mut LruCache<CacheUri, StoredValue>, key: &CacheUri) -> Option<Bytes> {
        let expired = match entries.get(key) {
            Some(stored) if stored.is_live(Instant::now()) => {
                return Some(stored.value.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(key);
        }
        None
    }

    fn insert(entries: &mut LruCache<CacheUri, StoredValue>, entry: CacheEntry) {
        let stored = StoredValue {
            value: entry.value,
            expires_at: Instant::now().checked_add(entry.ttl),
        };
        let displaced = entries.push(entry.key.clone(), stored);
        if displaced.is_some_and(|(key, _)| key != entry.key) {
            counter!(METRIC_CACHE_EVICT_TOTAL).increment(1);
        }
    }
}

impl Default for MemoryKvCache {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

#[async_trait]
impl KvCache for MemoryKvCache {
    async fn get(&self, key: &CacheUri) -> Result<Option<Bytes>, CacheError> {
        let mut entries = mutex_lock(&self.entries, SOURCE, "get");
        Ok(Self::lookup(&mut entries, key))
    }

    async fn get_multi(&self, keys: &[CacheUri]) -> Result<HashMap<CacheUri, Bytes>, CacheError> {
        let mut entries = mutex_lock(&self.entries, SOURCE, "get_multi");
        Ok(keys
            .iter()
            .filter_map(|key| Self::lookup(&mut entries, key).map(|value| (key.clone(), value)))
            .collect())
    }

    async fn set(&self, entry: CacheEntry) -> Result<(), CacheError> {
        let mut entries = mutex_lock(&self.entries, SOURCE, "set");
        Self::insert(&mut entries, entry);
        Ok(())
    }

    async fn set_multi(&self, batch: Vec<CacheEntry>) -> Result<(), CacheError> {
        let mut entries = mutex_lock(&self.entries, SOURCE, "set_multi");
        for entry in batch {
            Self::insert(&mut entries, entry);
        }
        Ok(())
    }

    async fn delete(&self, key: &CacheUri) -> Result<(), CacheError> {
        mutex_lock(&self.entries, SOURCE, "delete").pop(key);
        Ok(())
    }

    async fn delete_multi(&self, keys: &[CacheUri]) -> Result<(), CacheError> {
        let mut entries = mutex_lock(&self.entries, SOURCE, "delete_multi");
        for key in keys {
            entries.pop(key);
        }
        Ok(())
    }
}
