//! Cache layer.
//!
//! Documents are cached by path. Query results and cursors are cached by
//! condition hash and tracked in per-scope registries so a write can drop
//! every result computed over its collection.
//!
//! ```toml
//! [cache]
//! namespace = "docstash"
//! ttl_secs = 432000
//! memory_capacity = 10000
//! ```

mod config;
mod document;
pub mod keys;
pub(crate) mod lock;
mod memory;
mod metadata;
mod service;

pub use config::{CacheConfig, MAX_TTL_SECS};
pub use document::DocumentCache;
pub use keys::{CacheKeys, CacheUri};
pub use memory::MemoryKvCache;
pub use metadata::{CacheMetadata, CacheMetadataItem};
pub use service::{CacheEntry, CacheError, KvCache};

pub(crate) use document::{METRIC_CACHE_HIT_TOTAL, METRIC_CACHE_MISS_TOTAL};
pub(crate) use memory::METRIC_CACHE_EVICT_TOTAL;
pub(crate) use metadata::METRIC_CACHE_INVALIDATE_TOTAL;
