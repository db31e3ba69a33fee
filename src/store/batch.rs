//! Atomic multi-document writes.

use bytes::Bytes;
use tracing::debug;

use crate::domain::{Key, Record, Result};

use super::backend::{BatchWrite, Precondition, SetOptions};
use super::facade::{CachedStore, prepare_write};

/// Collects writes and commits them in one atomic store call.
///
/// Records are given their id and timestamps and encoded when added, so
/// later changes to them do not affect the batch. A batch that then fails to
/// commit has still updated the records passed to it. On commit the document cache is refreshed for created and
/// overwritten documents, and dropped for merged and deleted ones.
pub struct WriteBatch<'a> {
    store: &'a CachedStore,
    writes: Vec<BatchWrite>,
    written: Vec<(Key, Option<Bytes>)>,
}

impl<'a> WriteBatch<'a> {
    pub(super) fn new(store: &'a CachedStore) -> Self {
        Self {
            store,
            writes: Vec::new(),
            written: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Create `record`, assigning an id when it has none.
    pub fn create<T: Record>(&mut self, record: &mut T) -> Result<&mut Self> {
        let (key, data) = prepare_write(record, true)?;
        let bytes = Bytes::from(serde_json::to_vec(&*record)?);
        self.writes.push(BatchWrite::Create {
            path: key.path(),
            data,
        });
        self.written.push((key, Some(bytes)));
        Ok(self)
    }

    pub fn set<T: Record>(&mut self, record: &mut T) -> Result<&mut Self> {
        self.set_with(record, SetOptions::Overwrite)
    }

    /// Write `record` with explicit options; a record without an id is
    /// created instead.
    pub fn set_with<T: Record>(&mut self, record: &mut T, options: SetOptions) -> Result<&mut Self> {
        if record.id().is_empty() {
            return self.create(record);
        }
        let (key, data) = prepare_write(record, false)?;
        let cached = match options {
            SetOptions::Overwrite => Some(Bytes::from(serde_json::to_vec(&*record)?)),
            SetOptions::Merge => None,
        };
        self.writes.push(BatchWrite::Set {
            path: key.path(),
            data,
            options,
        });
        self.written.push((key, cached));
        Ok(self)
    }

    pub fn delete(&mut self, key: &Key) -> Result<&mut Self> {
        self.delete_with(key, Precondition::None)
    }

    pub fn delete_with(&mut self, key: &Key, precondition: Precondition) -> Result<&mut Self> {
        key.require_id()?;
        self.writes.push(BatchWrite::Delete {
            path: key.path(),
            precondition,
        });
        self.written.push((key.clone(), None));
        Ok(self)
    }

    /// Apply every write or none of them.
    pub async fn commit(self) -> Result<()> {
        if self.writes.is_empty() {
            return Ok(());
        }
        let count = self.writes.len();
        let backing = self.store.backing_store();
        if self.store.is_transactional() {
            for write in self.writes {
                match write {
                    BatchWrite::Create { path, data } => backing.create_document(&path, data).await?,
                    BatchWrite::Set {
                        path,
                        data,
                        options,
                    } => backing.set_document(&path, data, options).await?,
                    BatchWrite::Delete { path, precondition } => {
                        backing.delete_document(&path, precondition).await?
                    }
                }
            }
        } else {
            backing.commit_batch(self.writes).await?;
        }
        debug!(writes = count, "Batch committed");
        self.store.after_batch(self.written).await;
        Ok(())
    }
}
