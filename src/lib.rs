//! Cache-first access and encrypted pagination cursors in front of a
//! hierarchical document store.
//!
//! [`CachedStore`] wraps any [`DocumentStore`] with a [`KvCache`]: single
//! documents are cached by path, query results by a hash of their
//! [`Conditions`], and every write drops the cached results computed over the
//! written collection.

pub mod cache;
pub mod config;
pub mod domain;
pub mod query;
pub mod store;
pub mod telemetry;

pub use cache::{CacheConfig, KvCache, MemoryKvCache};
pub use domain::{HasTimestamps, Key, Record, Result, StoreError, is_not_found};
pub use query::{Conditions, Cursor};
pub use store::{CachedStore, Direction, DocumentStore, MemoryDocumentStore, Operator, WriteBatch};
