//! Cache configuration.
//!
//! Controls the cache namespace, entry lifetime and the size of the
//! in-memory cache service.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

const DEFAULT_NAMESPACE: &str = "docstash";
/// Five days.
const DEFAULT_TTL_SECS: u64 = 432_000;
const DEFAULT_MEMORY_CAPACITY: usize = 10_000;
/// Longest accepted entry lifetime: 365 days.
pub const MAX_TTL_SECS: u64 = 31_536_000;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Prefix of every cache key written by this crate.
    pub namespace: String,
    /// Lifetime of every cache entry, the upper bound on staleness.
    pub ttl_secs: u64,
    /// Maximum entries held by the in-memory cache service.
    pub memory_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            ttl_secs: DEFAULT_TTL_SECS,
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
        }
    }
}

impl CacheConfig {
    /// Entry lifetime, capped at [`MAX_TTL_SECS`].
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs.min(MAX_TTL_SECS))
    }

    /// Returns the memory capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn memory_capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.memory_capacity).unwrap_or(NonZeroUsize::MIN)
    }
}
