use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::cache::lock::mutex_lock;
use crate::domain::{Result, StoreError};
use crate::store::backend::{
    BatchWrite, DocumentStore, Precondition, Query, SetOptions, Snapshot, SnapshotStream,
    StoreTransaction,
};

use super::MemoryDocumentStore;

const SOURCE: &str = "store::memory::transaction";

/// Reads see committed state; writes are buffered until commit.
pub struct MemoryTransaction {
    view: Arc<TransactionView>,
}

struct TransactionView {
    base: MemoryDocumentStore,
    writes: Mutex<Vec<BatchWrite>>,
}

impl MemoryTransaction {
    pub(super) fn new(base: MemoryDocumentStore) -> Self {
        Self {
            view: Arc::new(TransactionView {
                base,
                writes: Mutex::new(Vec::new()),
            }),
        }
    }
}

impl TransactionView {
    fn buffer(&self, write: BatchWrite) -> Result<()> {
        mutex_lock(&self.writes, SOURCE, "buffer").push(write);
        Ok(())
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    fn store(&self) -> Arc<dyn DocumentStore> {
        self.view.clone()
    }

    async fn commit(&self) -> Result<()> {
        let writes = std::mem::take(&mut *mutex_lock(&self.view.writes, SOURCE, "commit"));
        debug!(writes = writes.len(), "Committing transaction");
        self.view.base.commit_writes(writes)
    }

    async fn rollback(&self) -> Result<()> {
        let discarded = std::mem::take(&mut *mutex_lock(&self.view.writes, SOURCE, "rollback"));
        debug!(writes = discarded.len(), "Rolled back transaction");
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for TransactionView {
    async fn get_document(&self, path: &str) -> Result<Option<Snapshot>> {
        self.base.get_document(path).await
    }

    async fn get_documents(&self, paths: &[String]) -> Result<Vec<Snapshot>> {
        self.base.get_documents(paths).await
    }

    async fn create_document(&self, path: &str, data: Value) -> Result<()> {
        self.buffer(BatchWrite::Create {
            path: path.to_string(),
            data,
        })
    }

    async fn set_document(&self, path: &str, data: Value, options: SetOptions) -> Result<()> {
        self.buffer(BatchWrite::Set {
            path: path.to_string(),
            data,
            options,
        })
    }

    async fn delete_document(&self, path: &str, precondition: Precondition) -> Result<()> {
        self.buffer(BatchWrite::Delete {
            path: path.to_string(),
            precondition,
        })
    }

    async fn run_query(&self, query: Query) -> Result<SnapshotStream> {
        self.base.run_query(query).await
    }

    async fn commit_batch(&self, _writes: Vec<BatchWrite>) -> Result<()> {
        Err(StoreError::unsupported("batch"))
    }

    async fn begin_transaction(&self) -> Result<Box<dyn StoreTransaction>> {
        Err(StoreError::unsupported("transaction"))
    }
}
