//! Contract of the key-value cache service sitting beside the store.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use super::keys::CacheUri;

/// Cache-side failures. These are logged by callers and treated as misses;
/// they never reach users of the store facade.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache service unavailable: {0}")]
    Unavailable(String),
    #[error("cache payload could not be decoded: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CacheError {
    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// One value to store, with its expiration.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: CacheUri,
    pub value: Bytes,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn new(key: CacheUri, value: impl Into<Bytes>, ttl: Duration) -> Self {
        Self {
            key,
            value: value.into(),
            ttl,
        }
    }
}

/// Key-value cache service with expiring entries.
#[async_trait]
pub trait KvCache: Send + Sync {
    async fn get(&self, key: &CacheUri) -> Result<Option<Bytes>, CacheError>;

    /// Missing keys are absent from the returned map.
    async fn get_multi(&self, keys: &[CacheUri]) -> Result<HashMap<CacheUri, Bytes>, CacheError>;

    async fn set(&self, entry: CacheEntry) -> Result<(), CacheError>;

    async fn set_multi(&self, entries: Vec<CacheEntry>) -> Result<(), CacheError>;

    /// Deleting a missing key is not an error.
    async fn delete(&self, key: &CacheUri) -> Result<(), CacheError>;

    async fn delete_multi(&self, keys: &[CacheUri]) -> Result<(), CacheError>;
}
