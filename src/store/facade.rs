//! Cache-first facade over a [`DocumentStore`].

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use bytes::Bytes;
use futures::TryStreamExt;
use futures::future::BoxFuture;
use metrics::histogram;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::cache::lock::mutex_lock;
use crate::cache::{CacheConfig, CacheMetadata, DocumentCache, KvCache, MemoryKvCache};
use crate::config::Settings;
use crate::domain::{Key, Record, Result, StoreError, stamp};
use crate::query::{Conditions, Cursor, CursorOrder};

use super::backend::{DocumentStore, Precondition, Query, QueryTarget, SetOptions, Snapshot};
use super::batch::WriteBatch;
use super::memory::MemoryDocumentStore;

const SOURCE: &str = "store::facade";
pub(crate) const METRIC_QUERY_MS: &str = "docstash_query_ms";

/// One row of a cached result set.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedRow {
    path: String,
    data: Value,
}

impl From<Snapshot> for CachedRow {
    fn from(snapshot: Snapshot) -> Self {
        Self {
            path: snapshot.path,
            data: snapshot.data,
        }
    }
}

/// Reads consult the cache before the store and populate it on a miss.
/// Writes go to the store first and then drop every cached query result
/// computed over the written collection.
///
/// Inside [`CachedStore::run_in_transaction`] the cache is bypassed.
pub struct CachedStore {
    store: Arc<dyn DocumentStore>,
    cache: DocumentCache,
    transactional: bool,
    cursor: Mutex<Option<Cursor>>,
    touched: Mutex<Vec<Key>>,
}

impl CachedStore {
    pub fn new(store: Arc<dyn DocumentStore>, cache: Arc<dyn KvCache>, config: &CacheConfig) -> Self {
        Self::with_cache(store, DocumentCache::new(cache, config), false)
    }

    /// In-process store and cache configured from `settings`.
    pub fn in_memory(settings: &Settings) -> Self {
        let store = match &settings.store.database_root {
            Some(root) => MemoryDocumentStore::with_database_root(root.clone()),
            None => MemoryDocumentStore::new(),
        };
        Self::new(
            Arc::new(store),
            Arc::new(MemoryKvCache::new(&settings.cache)),
            &settings.cache,
        )
    }

    fn with_cache(store: Arc<dyn DocumentStore>, cache: DocumentCache, transactional: bool) -> Self {
        Self {
            store,
            cache,
            transactional,
            cursor: Mutex::new(None),
            touched: Mutex::new(Vec::new()),
        }
    }

    pub fn document_cache(&self) -> &DocumentCache {
        &self.cache
    }

    pub fn is_transactional(&self) -> bool {
        self.transactional
    }

    pub(super) fn backing_store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Create `record`, assigning an id when it has none. Fails with
    /// `AlreadyExists` when a document with that id exists.
    ///
    /// The assigned id and timestamps reach `record` only once the store has
    /// accepted the write.
    #[instrument(skip_all, fields(collection = T::COLLECTION))]
    pub async fn insert<T: Record>(&self, record: &mut T) -> Result<()> {
        let mut staged = record.clone();
        let (key, data) = prepare_write(&mut staged, true)?;
        self.store.create_document(&key.path(), data).await?;
        *record = staged;
        self.after_write(&key, Some(&*record)).await;
        Ok(())
    }

    /// Overwrite `record`; a record without an id is inserted instead.
    #[instrument(skip_all, fields(collection = T::COLLECTION))]
    pub async fn put<T: Record>(&self, record: &mut T) -> Result<()> {
        if record.id().is_empty() {
            return self.insert(record).await;
        }
        let mut staged = record.clone();
        let (key, data) = prepare_write(&mut staged, false)?;
        self.store
            .set_document(&key.path(), data, SetOptions::Overwrite)
            .await?;
        *record = staged;
        self.after_write(&key, Some(&*record)).await;
        Ok(())
    }

    /// Create every record or none of them. Inside a transaction the writes
    /// join the transaction instead of forming a batch.
    #[instrument(skip_all, fields(collection = T::COLLECTION, count = records.len()))]
    pub async fn insert_multi<T: Record>(&self, records: &mut [T]) -> Result<()> {
        let mut staged = records.to_vec();
        let mut batch = WriteBatch::new(self);
        for record in staged.iter_mut() {
            batch.create(record)?;
        }
        batch.commit().await?;
        write_back(records, staged);
        Ok(())
    }

    /// Write every record or none of them; records without an id are
    /// created.
    #[instrument(skip_all, fields(collection = T::COLLECTION, count = records.len()))]
    pub async fn put_multi<T: Record>(&self, records: &mut [T]) -> Result<()> {
        let mut staged = records.to_vec();
        let mut batch = WriteBatch::new(self);
        for record in staged.iter_mut() {
            batch.set(record)?;
        }
        batch.commit().await?;
        write_back(records, staged);
        Ok(())
    }

    #[instrument(skip_all, fields(path = %key))]
    pub async fn delete(&self, key: &Key) -> Result<()> {
        key.require_id()?;
        self.store
            .delete_document(&key.path(), Precondition::None)
            .await?;
        self.after_write::<Value>(key, None).await;
        Ok(())
    }

    pub async fn delete_record<T: Record>(&self, record: &T) -> Result<()> {
        self.delete(&Key::of(record)?).await
    }

    /// Start an atomic batch. Unavailable inside a transaction.
    pub fn batch(&self) -> Result<WriteBatch<'_>> {
        if self.transactional {
            return Err(StoreError::unsupported("batch"));
        }
        Ok(WriteBatch::new(self))
    }

    async fn after_write<T: Serialize>(&self, key: &Key, record: Option<&T>) {
        if self.transactional {
            mutex_lock(&self.touched, SOURCE, "after_write").push(key.clone());
            return;
        }
        match record {
            Some(record) => {
                if let Err(err) = self.cache.put(key, record).await {
                    warn!(path = %key, error = %err, "Failed to cache written document");
                }
            }
            None => self.cache.delete(key).await,
        }
        self.invalidate(std::slice::from_ref(key)).await;
    }

    /// Refresh the document cache after a committed batch and invalidate the
    /// registries of every touched collection.
    pub(super) async fn after_batch(&self, written: Vec<(Key, Option<Bytes>)>) {
        if self.transactional {
            mutex_lock(&self.touched, SOURCE, "after_batch")
                .extend(written.into_iter().map(|(key, _)| key));
            return;
        }
        let mut puts = Vec::new();
        let mut deletes = Vec::new();
        let mut keys = Vec::with_capacity(written.len());
        for (key, bytes) in written {
            match bytes {
                Some(bytes) => puts.push((key.clone(), bytes)),
                None => deletes.push(key.clone()),
            }
            keys.push(key);
        }
        if let Err(err) = self.cache.put_multi(puts).await {
            warn!(error = %err, "Failed to cache batch documents");
        }
        self.cache.delete_multi(&deletes).await;
        self.invalidate(&keys).await;
    }

    /// Drop cached query results for the direct-parent and group scopes of
    /// each key, once per scope.
    async fn invalidate(&self, keys: &[Key]) {
        let scopes: BTreeSet<Key> = keys
            .iter()
            .map(|key| Key::new(key.parent_path(), key.collection(), ""))
            .collect();
        for scope in &scopes {
            self.cache.load_metadata(scope).await.delete_all().await;
            self.cache.load_group_metadata(scope).await.delete_all().await;
        }
    }

    // ------------------------------------------------------------------
    // Single and multi reads
    // ------------------------------------------------------------------

    /// Fetch the document at `key`, from the cache when possible.
    #[instrument(skip_all, fields(path = %key))]
    pub async fn get<T: Record>(&self, key: &Key) -> Result<T> {
        key.require_id()?;
        if !self.transactional {
            match self.cache.get::<T>(key).await {
                Ok(record) => return Ok(key.inject(record)),
                Err(err) => debug!(error = %err, "Document not served from cache"),
            }
        }
        let record = self.get_without_cache::<T>(key).await?;
        if !self.transactional {
            if let Err(err) = self.cache.put(key, &record).await {
                warn!(error = %err, "Failed to cache fetched document");
            }
        }
        Ok(record)
    }

    /// Fetch the document at `key` from the store.
    pub async fn get_without_cache<T: Record>(&self, key: &Key) -> Result<T> {
        key.require_id()?;
        let snapshot = self
            .store
            .get_document(&key.path())
            .await?
            .ok_or(StoreError::NotFound)?;
        decode_snapshot(snapshot)
    }

    /// Fetch several documents in request order, hitting the store only for
    /// cache misses.
    #[instrument(skip_all, fields(count = keys.len()))]
    pub async fn get_multi<T: Record>(&self, keys: &[Key]) -> Result<Vec<T>> {
        for key in keys {
            key.require_id()?;
        }
        if self.transactional {
            return self.get_multi_without_cache(keys).await;
        }

        let cached = self.cache.get_multi::<T>(keys).await;
        let missing: Vec<Key> = keys
            .iter()
            .zip(&cached)
            .filter(|(_, hit)| hit.is_none())
            .map(|(key, _)| key.clone())
            .collect();
        debug!(hits = keys.len() - missing.len(), misses = missing.len(), "Multi get");

        let mut fetched = Vec::new().into_iter();
        if !missing.is_empty() {
            let records = self.get_multi_without_cache::<T>(&missing).await?;
            let mut to_cache = Vec::with_capacity(records.len());
            for (key, record) in missing.iter().zip(&records) {
                to_cache.push((key.clone(), Bytes::from(serde_json::to_vec(record)?)));
            }
            if let Err(err) = self.cache.put_multi(to_cache).await {
                warn!(error = %err, "Failed to cache fetched documents");
            }
            fetched = records.into_iter();
        }

        keys.iter()
            .zip(cached)
            .map(|(key, hit)| match hit {
                Some(record) => Ok(key.inject(record)),
                None => fetched.next().ok_or(StoreError::NotFound),
            })
            .collect()
    }

    /// Fetch several documents from the store in request order. Fails when
    /// the store returns a different number of documents than requested.
    pub async fn get_multi_without_cache<T: Record>(&self, keys: &[Key]) -> Result<Vec<T>> {
        let paths = keys
            .iter()
            .map(|key| key.require_id().map(|_| key.path()))
            .collect::<Result<Vec<_>>>()?;
        let snapshots = self.store.get_documents(&paths).await?;
        if snapshots.len() != paths.len() {
            return Err(StoreError::InconsistentBatchResult {
                expected: paths.len(),
                actual: snapshots.len(),
            });
        }

        let mut by_path: HashMap<String, Snapshot> = HashMap::with_capacity(snapshots.len());
        for snapshot in snapshots {
            by_path.insert(Key::parse(&snapshot.path)?.path(), snapshot);
        }
        paths
            .iter()
            .map(|path| {
                by_path
                    .get(path)
                    .cloned()
                    .ok_or(StoreError::NotFound)
                    .and_then(decode_snapshot)
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Every record of `T` under `parent`.
    pub async fn get_all<T: Record>(&self, parent: Option<&Key>) -> Result<Vec<T>> {
        self.query(parent, Conditions::new()).await
    }

    /// Records of `T` under `parent` matching `conditions`, served from the
    /// scope's cached results when possible.
    #[instrument(skip_all, fields(collection = T::COLLECTION))]
    pub async fn query<T: Record>(
        &self,
        parent: Option<&Key>,
        conditions: Conditions,
    ) -> Result<Vec<T>> {
        if self.transactional {
            return self.query_without_cache(parent, conditions).await;
        }
        let scope = Key::collection_of::<T>(parent);
        let metadata = self.cache.load_metadata(&scope).await;
        let target = QueryTarget::Collection(scope.collection_path());
        self.cached_query(metadata, &scope, target, &conditions).await
    }

    /// Records of `T` under `parent` matching `conditions`, always from the
    /// store.
    pub async fn query_without_cache<T: Record>(
        &self,
        parent: Option<&Key>,
        conditions: Conditions,
    ) -> Result<Vec<T>> {
        let scope = Key::collection_of::<T>(parent);
        let target = QueryTarget::Collection(scope.collection_path());
        let (rows, cursor) = self.fetch(target, &conditions).await?;
        self.set_cursor(cursor);
        rows.into_iter().map(decode_snapshot).collect()
    }

    /// Records of `T` in every collection named `T::COLLECTION`, at any
    /// depth.
    #[instrument(skip_all, fields(collection = T::COLLECTION))]
    pub async fn query_group<T: Record>(&self, mut conditions: Conditions) -> Result<Vec<T>> {
        conditions.set_group(T::COLLECTION);
        let target = QueryTarget::Group(T::COLLECTION.to_string());
        if self.transactional {
            let (rows, cursor) = self.fetch(target, &conditions).await?;
            self.set_cursor(cursor);
            return rows.into_iter().map(decode_snapshot).collect();
        }
        let scope = Key::group_of::<T>();
        let metadata = self.cache.load_group_metadata(&scope).await;
        self.cached_query(metadata, &scope, target, &conditions).await
    }

    async fn cached_query<T: Record>(
        &self,
        mut metadata: CacheMetadata<'_>,
        scope: &Key,
        target: QueryTarget,
        conditions: &Conditions,
    ) -> Result<Vec<T>> {
        let keys = self.cache.keys();
        let uri = conditions.cache_uri(keys, scope);
        let cursor_uri = keys.cursor(&uri);

        if let Ok(rows) = metadata.load::<Vec<CachedRow>>(&uri, "query").await {
            debug!(cache_key = uri.as_str(), rows = rows.len(), "Serving query from cache");
            let cursor = if conditions.cursor_orders().is_some() {
                metadata.load::<Cursor>(&cursor_uri, "cursor").await.ok()
            } else {
                None
            };
            self.set_cursor(cursor);
            return rows
                .into_iter()
                .map(|row| {
                    decode_snapshot(Snapshot {
                        path: row.path,
                        data: row.data,
                    })
                })
                .collect();
        }

        let (rows, cursor) = self.fetch(target, conditions).await?;
        let cached: Vec<CachedRow> = rows.iter().cloned().map(CachedRow::from).collect();
        let mut payloads = vec![(uri, Bytes::from(serde_json::to_vec(&cached)?))];
        if let Some(cursor) = &cursor {
            payloads.push((cursor_uri, Bytes::from(serde_json::to_vec(cursor)?)));
        }
        if let Err(err) = metadata.put_multi(payloads).await {
            warn!(error = %err, "Failed to cache query result");
        }
        self.set_cursor(cursor);
        rows.into_iter().map(decode_snapshot).collect()
    }

    /// Run `conditions` against the store. When a cursor can be emitted the
    /// store is asked for one extra row; its presence marks the page as
    /// truncated.
    async fn fetch(
        &self,
        target: QueryTarget,
        conditions: &Conditions,
    ) -> Result<(Vec<Snapshot>, Option<Cursor>)> {
        let orders = conditions.cursor_orders();
        let limit = conditions.limit_value();
        let mut query = conditions
            .apply(self.store.as_ref(), Query::new(target))
            .await?;
        let look_ahead = match (&orders, limit) {
            (Some(_), Some(limit)) => Some(limit),
            _ => None,
        };
        if let Some(limit) = look_ahead {
            query = query.limit(limit.saturating_add(1));
        }

        let started = Instant::now();
        let mut rows: Vec<Snapshot> = self.store.run_query(query).await?.try_collect().await?;
        histogram!(METRIC_QUERY_MS).record(started.elapsed().as_secs_f64() * 1000.0);

        let cursor = match (look_ahead, orders) {
            (Some(limit), Some(orders)) if rows.len() > limit => {
                rows.truncate(limit);
                rows.last().map(|last| page_cursor(last, orders)).transpose()?
            }
            _ => None,
        };
        debug!(rows = rows.len(), has_cursor = cursor.is_some(), "Query executed");
        Ok((rows, cursor))
    }

    fn set_cursor(&self, cursor: Option<Cursor>) {
        *mutex_lock(&self.cursor, SOURCE, "set_cursor") = cursor;
    }

    /// Encoded cursor emitted by the most recent query, if that page was
    /// truncated.
    pub fn last_cursor(&self) -> Option<String> {
        mutex_lock(&self.cursor, SOURCE, "last_cursor")
            .as_ref()
            .filter(|cursor| cursor.is_positioned())
            .map(Cursor::encode)
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    /// Run `work` inside a store transaction. The cache is bypassed for every
    /// read and write made through the handle passed to `work`. On success the
    /// transaction commits and the cache entries of every written document are
    /// invalidated; on failure it rolls back.
    pub async fn run_in_transaction<R, F>(&self, work: F) -> Result<R>
    where
        R: Send,
        F: for<'t> FnOnce(&'t CachedStore) -> BoxFuture<'t, Result<R>>,
    {
        if self.transactional {
            return Err(StoreError::unsupported("transaction"));
        }
        let transaction = self.store.begin_transaction().await?;
        let scoped = CachedStore::with_cache(transaction.store(), self.cache.clone(), true);

        match work(&scoped).await {
            Ok(value) => {
                transaction.commit().await?;
                let touched = std::mem::take(&mut *mutex_lock(&scoped.touched, SOURCE, "commit"));
                debug!(written = touched.len(), "Transaction committed");
                self.cache.delete_multi(&touched).await;
                self.invalidate(&touched).await;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = transaction.rollback().await {
                    warn!(error = %rollback, "Transaction rollback failed");
                }
                Err(err)
            }
        }
    }
}

/// Assign an id if needed, apply timestamps and encode the record.
pub(super) fn prepare_write<T: Record>(record: &mut T, assign_id: bool) -> Result<(Key, Value)> {
    if assign_id && record.id().is_empty() {
        record.set_id(Uuid::new_v4().simple().to_string());
    }
    stamp(record, OffsetDateTime::now_utc());
    let key = Key::of(record)?;
    key.require_id()?;
    let data = serde_json::to_value(&*record)?;
    Ok((key, data))
}

fn write_back<T: Record>(records: &mut [T], staged: Vec<T>) {
    for (record, written) in records.iter_mut().zip(staged) {
        *record = written;
    }
}

fn decode_snapshot<T: Record>(snapshot: Snapshot) -> Result<T> {
    let key = Key::parse(&snapshot.path)?;
    let record: T = serde_json::from_value(snapshot.data)?;
    Ok(key.inject(record))
}

fn page_cursor(last: &Snapshot, orders: Vec<CursorOrder>) -> Result<Cursor> {
    let key = Key::parse(&last.path)?;
    Ok(Cursor::new(key.id(), last.path.clone(), orders))
}
