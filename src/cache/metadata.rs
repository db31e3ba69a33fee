//! Invalidation registries.
//!
//! Every query result or cursor cached for a scope is tracked in that scope's
//! registry. A write under the scope deletes every tracked entry together with
//! the registry itself.

use bytes::Bytes;
use metrics::counter;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{Result, StoreError};

use super::document::DocumentCache;
use super::keys::CacheUri;

pub(crate) const METRIC_CACHE_INVALIDATE_TOTAL: &str = "docstash_cache_invalidate_total";

/// Persisted form of a registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadataItem {
    pub uri: CacheUri,
    pub keys: Vec<CacheUri>,
}

impl CacheMetadataItem {
    fn track(&mut self, uri: &CacheUri) {
        if !self.keys.contains(uri) {
            self.keys.push(uri.clone());
        }
    }
}

pub struct CacheMetadata<'a> {
    cache: &'a DocumentCache,
    item: CacheMetadataItem,
}

impl<'a> CacheMetadata<'a> {
    pub(crate) async fn load_or_create(cache: &'a DocumentCache, uri: CacheUri) -> Self {
        let item = cache
            .load_uri::<CacheMetadataItem>(&uri, "metadata")
            .await
            .filter(|item| item.uri == uri)
            .unwrap_or_else(|| CacheMetadataItem {
                uri,
                keys: Vec::new(),
            });
        Self { cache, item }
    }

    pub fn uri(&self) -> &CacheUri {
        &self.item.uri
    }

    pub fn keys(&self) -> &[CacheUri] {
        &self.item.keys
    }

    pub fn contains(&self, uri: &CacheUri) -> bool {
        self.item.keys.contains(uri)
    }

    /// Cache `value` under `uri` and track it.
    pub async fn put<T: Serialize>(&mut self, uri: CacheUri, value: &T) -> Result<()> {
        let bytes = Bytes::from(serde_json::to_vec(value)?);
        self.put_multi(vec![(uri, bytes)]).await
    }

    /// Cache several encoded payloads and track them, persisting the registry
    /// in the same round trip.
    pub async fn put_multi(&mut self, payloads: Vec<(CacheUri, Bytes)>) -> Result<()> {
        for (uri, _) in &payloads {
            self.item.track(uri);
        }
        let registry = Bytes::from(serde_json::to_vec(&self.item)?);
        let mut entries = payloads;
        entries.push((self.item.uri.clone(), registry));
        self.cache.store_uris(entries).await;
        Ok(())
    }

    /// Cached value under `uri`. Untracked keys are `NotFound` without a
    /// cache round trip.
    pub async fn load<T: DeserializeOwned>(&self, uri: &CacheUri, kind: &'static str) -> Result<T> {
        if !self.contains(uri) {
            return Err(StoreError::NotFound);
        }
        self.cache
            .load_uri(uri, kind)
            .await
            .ok_or(StoreError::NotFound)
    }

    /// Delete every tracked entry and the registry itself.
    pub async fn delete_all(&mut self) {
        let mut uris = std::mem::take(&mut self.item.keys);
        let tracked = uris.len();
        uris.push(self.item.uri.clone());
        self.cache.delete_uris(&uris).await;

        debug!(
            registry = self.item.uri.as_str(),
            tracked,
            "Invalidated cached queries"
        );
        counter!(METRIC_CACHE_INVALIDATE_TOTAL).increment(tracked as u64);
    }
}
