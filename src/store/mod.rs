//! Backing-store contract, the in-memory store and the cache-first facade.

pub mod backend;
mod batch;
mod facade;
pub mod memory;

pub use backend::{
    BatchWrite, Direction, DocumentStore, Filter, Operator, Ordering, Precondition, Query,
    QueryTarget, SetOptions, Snapshot, SnapshotStream, StoreTransaction,
};
pub use batch::WriteBatch;
pub use facade::CachedStore;
pub use memory::{MemoryDocumentStore, MemoryTransaction};

pub(crate) use facade::METRIC_QUERY_MS;
