#![allow(dead_code)]

use std::sync::Arc;

use docstash::cache::CacheConfig;
use docstash::domain::HasTimestamps;
use docstash::{CachedStore, Key, MemoryDocumentStore, MemoryKvCache, Record};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub const DATABASE_ROOT: &str = "projects/demo/databases/(default)";

/// Top-level record whose id is also a stored field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub num: i64,
    #[serde(default)]
    pub created_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub updated_at: Option<OffsetDateTime>,
}

impl User {
    pub fn new(id: &str, num: i64) -> Self {
        Self {
            id: id.to_string(),
            name: format!("user {id}"),
            num,
            ..Default::default()
        }
    }
}

impl HasTimestamps for User {
    fn created_at(&self) -> Option<OffsetDateTime> {
        self.created_at
    }

    fn set_created_at(&mut self, at: OffsetDateTime) {
        self.created_at = Some(at);
    }

    fn set_updated_at(&mut self, at: OffsetDateTime) {
        self.updated_at = Some(at);
    }
}

impl Record for User {
    const COLLECTION: &'static str = "users";

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn timestamps_mut(&mut self) -> Option<&mut dyn HasTimestamps> {
        Some(self)
    }
}

/// Nested record whose identity lives only in its path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Device {
    #[serde(skip)]
    pub id: String,
    #[serde(skip)]
    pub owner: Option<Key>,
    pub name: String,
}

impl Device {
    pub fn new(owner: &str, id: &str) -> Self {
        Self {
            id: id.to_string(),
            owner: Some(Key::new("", "users", owner)),
            name: format!("device {id}"),
        }
    }
}

impl Record for Device {
    const COLLECTION: &'static str = "devices";

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn parent(&self) -> Option<&Key> {
        self.owner.as_ref()
    }

    fn set_parent(&mut self, parent: Option<Key>) {
        self.owner = parent;
    }
}

pub struct Fixture {
    /// The same documents the facade sees, for writes that bypass the cache.
    pub backing: MemoryDocumentStore,
    pub kv: Arc<MemoryKvCache>,
    pub store: CachedStore,
}

pub fn fixture() -> Fixture {
    fixture_with(MemoryDocumentStore::new(), CacheConfig::default())
}

pub fn fixture_with(backing: MemoryDocumentStore, config: CacheConfig) -> Fixture {
    let kv = Arc::new(MemoryKvCache::new(&config));
    let store = CachedStore::new(Arc::new(backing.clone()), kv.clone(), &config);
    Fixture { backing, kv, store }
}

pub fn user_key(id: &str) -> Key {
    Key::new("", "users", id)
}

pub fn device_key(owner: &str, id: &str) -> Key {
    Key::new(format!("users/{owner}"), "devices", id)
}

pub fn ids<T: Record>(records: &[T]) -> Vec<String> {
    records.iter().map(|record| record.id().to_string()).collect()
}
