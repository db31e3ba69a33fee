//! Typed access to the cache service: single documents by path plus the raw
//! payload operations the invalidation registries build on.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use metrics::counter;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::domain::{Key, Result, StoreError};

use super::config::CacheConfig;
use super::keys::{CacheKeys, CacheUri};
use super::metadata::CacheMetadata;
use super::service::{CacheEntry, CacheError, KvCache};

pub(crate) const METRIC_CACHE_HIT_TOTAL: &str = "docstash_cache_hit_total";
pub(crate) const METRIC_CACHE_MISS_TOTAL: &str = "docstash_cache_miss_total";

/// Document cache over a [`KvCache`] service.
///
/// Service and decoding failures are logged and reported as misses; the
/// backing store stays the source of truth.
#[derive(Clone)]
pub struct DocumentCache {
    service: Arc<dyn KvCache>,
    keys: CacheKeys,
    ttl: Duration,
}

impl DocumentCache {
    pub fn new(service: Arc<dyn KvCache>, config: &CacheConfig) -> Self {
        Self {
            service,
            keys: CacheKeys::new(config.namespace.clone()),
            ttl: config.ttl(),
        }
    }

    pub fn keys(&self) -> &CacheKeys {
        &self.keys
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached document at `key`, or `NotFound` on a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &Key) -> Result<T> {
        if !key.has_id() {
            return Err(StoreError::NotFound);
        }
        self.load_uri(&self.keys.document(key), "document")
            .await
            .ok_or(StoreError::NotFound)
    }

    /// Look up several documents at once. The result is aligned with `keys`;
    /// `None` marks a miss the caller must fetch from the store.
    pub async fn get_multi<T: DeserializeOwned>(&self, keys: &[Key]) -> Vec<Option<T>> {
        let uris: Vec<CacheUri> = keys
            .iter()
            .filter(|key| key.has_id())
            .map(|key| self.keys.document(key))
            .collect();
        let mut found = match self.service.get_multi(&uris).await {
            Ok(found) => found,
            Err(err) => {
                self.log_failure("get_multi", None, &err);
                HashMap::new()
            }
        };

        keys.iter()
            .map(|key| {
                if !key.has_id() {
                    return None;
                }
                let uri = self.keys.document(key);
                let decoded = found
                    .remove(&uri)
                    .and_then(|bytes| self.decode::<T>(&uri, &bytes));
                record_lookup("document", decoded.is_some());
                decoded
            })
            .collect()
    }

    /// Cache one document. The key must carry an id.
    pub async fn put<T: Serialize>(&self, key: &Key, record: &T) -> Result<()> {
        key.require_id()?;
        let bytes = serde_json::to_vec(record)?;
        self.store_uris(vec![(self.keys.document(key), Bytes::from(bytes))])
            .await;
        Ok(())
    }

    /// Cache several already-encoded documents in one round trip.
    pub async fn put_multi(&self, documents: Vec<(Key, Bytes)>) -> Result<()> {
        let mut entries = Vec::with_capacity(documents.len());
        for (key, bytes) in documents {
            key.require_id()?;
            entries.push((self.keys.document(&key), bytes));
        }
        self.store_uris(entries).await;
        Ok(())
    }

    /// Drop a cached document. Keys without an id are ignored.
    pub async fn delete(&self, key: &Key) {
        if !key.has_id() {
            return;
        }
        self.delete_uris(&[self.keys.document(key)]).await;
    }

    pub async fn delete_multi(&self, keys: &[Key]) {
        let uris: Vec<CacheUri> = keys
            .iter()
            .filter(|key| key.has_id())
            .map(|key| self.keys.document(key))
            .collect();
        self.delete_uris(&uris).await;
    }

    /// The invalidation registry for queries scoped to `scope`'s collection.
    pub async fn load_metadata(&self, scope: &Key) -> CacheMetadata<'_> {
        CacheMetadata::load_or_create(self, self.keys.metadata(scope)).await
    }

    /// The invalidation registry for collection-group queries over
    /// `scope`'s collection name.
    pub async fn load_group_metadata(&self, scope: &Key) -> CacheMetadata<'_> {
        CacheMetadata::load_or_create(self, self.keys.group_metadata(scope)).await
    }

    pub(crate) async fn load_uri<T: DeserializeOwned>(
        &self,
        uri: &CacheUri,
        kind: &'static str,
    ) -> Option<T> {
        let decoded = match self.service.get(uri).await {
            Ok(Some(bytes)) => self.decode(uri, &bytes),
            Ok(None) => None,
            Err(err) => {
                self.log_failure("get", Some(uri), &err);
                None
            }
        };
        record_lookup(kind, decoded.is_some());
        decoded
    }

    pub(crate) async fn store_uris(&self, payloads: Vec<(CacheUri, Bytes)>) {
        if payloads.is_empty() {
            return;
        }
        let entries = payloads
            .into_iter()
            .map(|(uri, bytes)| CacheEntry::new(uri, bytes, self.ttl))
            .collect();
        if let Err(err) = self.service.set_multi(entries).await {
            self.log_failure("set_multi", None, &err);
        }
    }

    pub(crate) async fn delete_uris(&self, uris: &[CacheUri]) {
        if uris.is_empty() {
            return;
        }
        if let Err(err) = self.service.delete_multi(uris).await {
            self.log_failure("delete_multi", None, &err);
        }
    }

    fn decode<T: DeserializeOwned>(&self, uri: &CacheUri, bytes: &Bytes) -> Option<T> {
        match serde_json::from_slice(bytes) {
            Ok(value) => Some(value),
            Err(err) => {
                self.log_failure("decode", Some(uri), &CacheError::from(err));
                None
            }
        }
    }

    fn log_failure(&self, op: &'static str, uri: Option<&CacheUri>, err: &CacheError) {
        warn!(
            op,
            cache_key = uri.map(CacheUri::as_str).unwrap_or_default(),
            error = %err,
            result = "treated_as_miss",
            "Cache operation failed"
        );
    }
}

fn record_lookup(kind: &'static str, hit: bool) {
    if hit {
        counter!(METRIC_CACHE_HIT_TOTAL, "kind" => kind).increment(1);
    } else {
        debug!(kind, "Cache miss");
        counter!(METRIC_CACHE_MISS_TOTAL, "kind" => kind).increment(1);
    }
}
