//! In-process document store.
//!
//! Documents live in one ordered map keyed by relative path. Writes are
//! atomic per call; batches are validated against a copy of the map and
//! swapped in only when every write succeeds.

mod eval;
mod transaction;

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use serde_json::Value;
use tracing::debug;

use crate::cache::lock::{rw_read, rw_write};
use crate::domain::{Key, Result, StoreError};

use super::backend::{
    BatchWrite, DocumentStore, Precondition, Query, SetOptions, Snapshot, SnapshotStream,
    StoreTransaction,
};

pub use transaction::MemoryTransaction;

const SOURCE: &str = "store::memory";

type Documents = BTreeMap<String, Value>;

#[derive(Clone, Default)]
pub struct MemoryDocumentStore {
    documents: Arc<RwLock<Documents>>,
    database_root: Option<String>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report snapshot paths as `{root}/documents/{path}`. `root` should have
    /// the `projects/{project}/databases/{database}` shape, otherwise
    /// [`Key::parse`] treats the prefix as part of the document path.
    pub fn with_database_root(root: impl Into<String>) -> Self {
        Self {
            documents: Arc::default(),
            database_root: Some(root.into()),
        }
    }

    pub fn len(&self) -> usize {
        rw_read(&self.documents, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self, path: &str, data: Value) -> Snapshot {
        let path = match &self.database_root {
            Some(root) => format!("{}/documents/{path}", root.trim_end_matches('/')),
            None => path.to_string(),
        };
        Snapshot { path, data }
    }

    fn apply(documents: &mut Documents, write: BatchWrite) -> Result<()> {
        match write {
            BatchWrite::Create { path, data } => {
                let path = document_path(&path)?;
                if documents.contains_key(&path) {
                    return Err(StoreError::already_exists(path));
                }
                documents.insert(path, data);
            }
            BatchWrite::Set {
                path,
                data,
                options,
            } => {
                let path = document_path(&path)?;
                let merged = match (options, documents.remove(&path)) {
                    (SetOptions::Merge, Some(Value::Object(mut existing))) => match data {
                        Value::Object(incoming) => {
                            existing.extend(incoming);
                            Value::Object(existing)
                        }
                        other => other,
                    },
                    _ => data,
                };
                documents.insert(path, merged);
            }
            BatchWrite::Delete { path, precondition } => {
                let path = document_path(&path)?;
                if documents.remove(&path).is_none() && precondition == Precondition::Exists {
                    return Err(StoreError::NotFound);
                }
            }
        }
        Ok(())
    }

    pub(crate) fn commit_writes(&self, writes: Vec<BatchWrite>) -> Result<()> {
        let mut documents = rw_write(&self.documents, SOURCE, "commit");
        let mut staged = documents.clone();
        let count = writes.len();
        for write in writes {
            Self::apply(&mut staged, write)?;
        }
        *documents = staged;
        debug!(writes = count, "Committed batch");
        Ok(())
    }
}

/// Normalize a document path, rejecting collection paths.
fn document_path(path: &str) -> Result<String> {
    let key = Key::parse(path)?;
    key.require_id()?;
    Ok(key.path())
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get_document(&self, path: &str) -> Result<Option<Snapshot>> {
        let path = document_path(path)?;
        let documents = rw_read(&self.documents, SOURCE, "get_document");
        Ok(documents
            .get(&path)
            .map(|data| self.snapshot(&path, data.clone())))
    }

    async fn get_documents(&self, paths: &[String]) -> Result<Vec<Snapshot>> {
        let paths = paths
            .iter()
            .map(|path| document_path(path))
            .collect::<Result<Vec<_>>>()?;
        let documents = rw_read(&self.documents, SOURCE, "get_documents");
        Ok(paths
            .iter()
            .filter_map(|path| {
                documents
                    .get(path)
                    .map(|data| self.snapshot(path, data.clone()))
            })
            .collect())
    }

    async fn create_document(&self, path: &str, data: Value) -> Result<()> {
        let mut documents = rw_write(&self.documents, SOURCE, "create_document");
        Self::apply(
            &mut documents,
            BatchWrite::Create {
                path: path.to_string(),
                data,
            },
        )
    }

    async fn set_document(&self, path: &str, data: Value, options: SetOptions) -> Result<()> {
        let mut documents = rw_write(&self.documents, SOURCE, "set_document");
        Self::apply(
            &mut documents,
            BatchWrite::Set {
                path: path.to_string(),
                data,
                options,
            },
        )
    }

    async fn delete_document(&self, path: &str, precondition: Precondition) -> Result<()> {
        let mut documents = rw_write(&self.documents, SOURCE, "delete_document");
        Self::apply(
            &mut documents,
            BatchWrite::Delete {
                path: path.to_string(),
                precondition,
            },
        )
    }

    async fn run_query(&self, query: Query) -> Result<SnapshotStream> {
        let rows = {
            let documents = rw_read(&self.documents, SOURCE, "run_query");
            eval::execute(documents.iter(), &query)
        };
        let snapshots: Vec<Result<Snapshot>> = rows
            .into_iter()
            .map(|(path, data)| Ok(self.snapshot(&path, data)))
            .collect();
        Ok(stream::iter(snapshots).boxed())
    }

    async fn commit_batch(&self, writes: Vec<BatchWrite>) -> Result<()> {
        self.commit_writes(writes)
    }

    async fn begin_transaction(&self) -> Result<Box<dyn StoreTransaction>> {
        Ok(Box::new(MemoryTransaction::new(self.clone())))
    }
}

#[cfg(test)]
mod tests {
    use futures::TryStreamExt;
    use serde_json::json;

    use super::*;
    use crate::store::backend::QueryTarget;

    #[tokio::test]
    async fn create_rejects_existing_documents() {
        let store = MemoryDocumentStore::new();
        store.create_document("users/u1", json!({"n": 1})).await.unwrap();
        let err = store
            .create_document("users/u1", json!({"n": 2}))
            .await
            .unwrap_err();
        assert!(err.is_already_exists());
        let snapshot = store.get_document("users/u1").await.unwrap().unwrap();
        assert_eq!(snapshot.data, json!({"n": 1}));
    }

    #[tokio::test]
    async fn collection_paths_are_not_documents() {
        let store = MemoryDocumentStore::new();
        let err = store.create_document("users", json!({})).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidIdentity { .. }));
    }

    #[tokio::test]
    async fn set_merges_or_overwrites() {
        let store = MemoryDocumentStore::new();
        store
            .set_document("users/u1", json!({"a": 1, "b": 1}), SetOptions::Overwrite)
            .await
            .unwrap();
        store
            .set_document("users/u1", json!({"b": 2, "c": 3}), SetOptions::Merge)
            .await
            .unwrap();
        let data = store.get_document("users/u1").await.unwrap().unwrap().data;
        assert_eq!(data, json!({"a": 1, "b": 2, "c": 3}));

        store
            .set_document("users/u1", json!({"z": 0}), SetOptions::Overwrite)
            .await
            .unwrap();
        let data = store.get_document("users/u1").await.unwrap().unwrap().data;
        assert_eq!(data, json!({"z": 0}));
    }

    #[tokio::test]
    async fn delete_honors_precondition() {
        let store = MemoryDocumentStore::new();
        store
            .delete_document("users/missing", Precondition::None)
            .await
            .unwrap();
        let err = store
            .delete_document("users/missing", Precondition::Exists)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn batch_is_all_or_nothing() {
        let store = MemoryDocumentStore::new();
        store.create_document("users/taken", json!({})).await.unwrap();
        let err = store
            .commit_batch(vec![
                BatchWrite::Create {
                    path: "users/fresh".into(),
                    data: json!({}),
                },
                BatchWrite::Create {
                    path: "users/taken".into(),
                    data: json!({}),
                },
            ])
            .await
            .unwrap_err();
        assert!(err.is_already_exists());
        assert!(store.get_document("users/fresh").await.unwrap().is_none());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn get_documents_skips_missing() {
        let store = MemoryDocumentStore::new();
        store.create_document("users/a", json!({})).await.unwrap();
        let found = store
            .get_documents(&["users/a".to_string(), "users/b".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn documents_subcollection_is_an_ordinary_path() {
        let store = MemoryDocumentStore::new();
        store
            .create_document("users/u1/documents/d1", json!({"n": 1}))
            .await
            .unwrap();
        let snapshot = store.get_document("users/u1/documents/d1").await.unwrap().unwrap();
        assert_eq!(snapshot.path, "users/u1/documents/d1");
        assert_eq!(
            Key::parse(&snapshot.path).unwrap(),
            Key::new("users/u1", "documents", "d1")
        );

        let rooted = MemoryDocumentStore::with_database_root("projects/p/databases/(default)");
        rooted
            .create_document("users/u1/documents/d1", json!({"n": 1}))
            .await
            .unwrap();
        let snapshot = rooted.get_document("users/u1/documents/d1").await.unwrap().unwrap();
        assert_eq!(
            Key::parse(&snapshot.path).unwrap(),
            Key::new("users/u1", "documents", "d1")
        );
    }

    #[tokio::test]
    async fn database_root_prefixes_snapshot_paths() {
        let store = MemoryDocumentStore::with_database_root("projects/p/databases/(default)");
        store.create_document("users/a", json!({"n": 1})).await.unwrap();
        let snapshot = store.get_document("users/a").await.unwrap().unwrap();
        assert_eq!(
            snapshot.path,
            "projects/p/databases/(default)/documents/users/a"
        );
        assert_eq!(Key::parse(&snapshot.path).unwrap(), Key::new("", "users", "a"));

        let rows: Vec<Snapshot> = store
            .run_query(Query::new(QueryTarget::Collection("users".into())))
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].path, snapshot.path);
    }
}
