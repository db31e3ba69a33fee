//! Hierarchical document identity.
//!
//! A [`Key`] names one document (or, with an empty id, a collection) as a
//! `parent_path` of alternating collection/id segments, a collection name and
//! an id.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::{Result, StoreError};
use super::record::Record;

/// Strip a `projects/{project}/databases/{database}/documents/` prefix from a
/// store path. Anything else, including relative paths through a collection
/// named `documents`, comes back unchanged apart from outer slashes.
pub fn strip_database_root(path: &str) -> &str {
    let trimmed = path.trim_matches('/');
    let mut segments = trimmed.splitn(6, '/');
    let root = [
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ];
    match root {
        [
            Some("projects"),
            Some(project),
            Some("databases"),
            Some(database),
            Some("documents"),
        ] if !project.is_empty() && !database.is_empty() => segments.next().unwrap_or_default(),
        _ => trimmed,
    }
}

/// Whether `root` has the `projects/{project}/databases/{database}` shape
/// that [`strip_database_root`] recognises.
pub fn is_database_root(root: &str) -> bool {
    let segments: Vec<&str> = root.trim_matches('/').split('/').collect();
    matches!(
        segments.as_slice(),
        ["projects", project, "databases", database] if !project.is_empty() && !database.is_empty()
    )
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key {
    parent_path: String,
    collection: String,
    id: String,
}

impl Key {
    pub fn new(
        parent_path: impl Into<String>,
        collection: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        Self {
            parent_path: parent_path.into(),
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Derive the key of a record from its declared identity.
    pub fn of<T: Record>(record: &T) -> Result<Self> {
        if T::COLLECTION.is_empty() {
            return Err(StoreError::invalid_identity(
                "record type declares an empty collection name",
            ));
        }
        Ok(Self {
            parent_path: record.parent().map(Key::path).unwrap_or_default(),
            collection: T::COLLECTION.to_string(),
            id: record.id().to_string(),
        })
    }

    /// The collection of `T` under `parent` (or at the root).
    pub fn collection_of<T: Record>(parent: Option<&Key>) -> Self {
        Self {
            parent_path: parent.map(Key::path).unwrap_or_default(),
            collection: T::COLLECTION.to_string(),
            id: String::new(),
        }
    }

    /// The collection group of `T`: every collection named `T::COLLECTION`.
    pub fn group_of<T: Record>() -> Self {
        Self::new("", T::COLLECTION, "")
    }

    /// Parse a store path, optionally prefixed by a database root
    /// (`projects/p/databases/d/documents/...`).
    ///
    /// An even number of segments names a document; an odd number names a
    /// collection and yields a key with an empty id.
    pub fn parse(full_path: &str) -> Result<Self> {
        let segments: Vec<&str> = strip_database_root(full_path)
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect();

        let (head, tail) = if segments.len() % 2 == 0 {
            match segments.len() {
                0 => {
                    return Err(StoreError::invalid_identity(format!(
                        "path `{full_path}` has no segments"
                    )));
                }
                n => segments.split_at(n - 2),
            }
        } else {
            segments.split_at(segments.len() - 1)
        };

        Ok(Self {
            parent_path: head.join("/"),
            collection: tail[0].to_string(),
            id: tail.get(1).map(|id| id.to_string()).unwrap_or_default(),
        })
    }

    /// Re-parse this key in place from a store path.
    pub fn update(&mut self, full_path: &str) -> Result<()> {
        *self = Self::parse(full_path)?;
        Ok(())
    }

    pub fn parent_path(&self) -> &str {
        &self.parent_path
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn has_id(&self) -> bool {
        !self.id.is_empty()
    }

    /// The id, or `InvalidIdentity` when it has not been assigned yet.
    pub fn require_id(&self) -> Result<&str> {
        if self.id.is_empty() {
            return Err(StoreError::invalid_identity(format!(
                "key for `{}` carries no id",
                self.collection_path()
            )));
        }
        Ok(&self.id)
    }

    pub(crate) fn with_id(&self, id: impl Into<String>) -> Self {
        Self {
            parent_path: self.parent_path.clone(),
            collection: self.collection.clone(),
            id: id.into(),
        }
    }

    pub fn self_path(&self) -> String {
        if self.id.is_empty() {
            self.collection.clone()
        } else {
            format!("{}/{}", self.collection, self.id)
        }
    }

    pub fn path(&self) -> String {
        if self.parent_path.is_empty() {
            self.self_path()
        } else {
            format!("{}/{}", self.parent_path, self.self_path())
        }
    }

    pub fn collection_path(&self) -> String {
        if self.parent_path.is_empty() {
            self.collection.clone()
        } else {
            format!("{}/{}", self.parent_path, self.collection)
        }
    }

    /// The document this key's collection lives under, if any.
    pub fn parent_key(&self) -> Option<Key> {
        if self.parent_path.is_empty() {
            return None;
        }
        Self::parse(&self.parent_path).ok()
    }

    /// Document identity comparison: keys without an id never match,
    /// not even themselves.
    pub fn is_same_document(&self, other: &Key) -> bool {
        if self.id.is_empty() || other.id.is_empty() {
            return false;
        }
        self == other
    }

    pub fn is_same_kind<T: Record>(&self) -> bool {
        self.collection == T::COLLECTION
    }

    /// Splice this key's identity into a freshly fetched record: its id and,
    /// recursively through [`Key::parent_key`], its parent reference.
    pub fn inject<T: Record>(&self, mut record: T) -> T {
        record.set_id(self.id.clone());
        record.set_parent(self.parent_key());
        record
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, Default, Clone, Serialize, Deserialize)]
    struct Device {
        #[serde(skip)]
        id: String,
        #[serde(skip)]
        owner: Option<Key>,
        name: String,
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

    #[test]
    fn derived_paths() {
        let key = Key::new("users/u1", "devices", "d1");
        assert_eq!(key.self_path(), "devices/d1");
        assert_eq!(key.path(), "users/u1/devices/d1");
        assert_eq!(key.collection_path(), "users/u1/devices");

        let collection = Key::new("", "users", "");
        assert_eq!(collection.path(), "users");
        assert_eq!(collection.collection_path(), "users");
    }

    #[test]
    fn parse_strips_database_root() {
        let key = Key::parse("projects/demo/databases/(default)/documents/users/u1/devices/d1")
            .expect("path parses");
        assert_eq!(key, Key::new("users/u1", "devices", "d1"));

        let top = Key::parse("projects/demo/databases/(default)/documents/users/u1")
            .expect("path parses");
        assert_eq!(top, Key::new("", "users", "u1"));
    }

    #[test]
    fn parse_handles_relative_paths_of_any_depth() {
        assert_eq!(
            Key::parse("users/u1").unwrap(),
            Key::new("", "users", "u1")
        );
        assert_eq!(
            Key::parse("a/1/b/2/c/3").unwrap(),
            Key::new("a/1/b/2", "c", "3")
        );
        assert_eq!(
            Key::parse("a/1/b").unwrap(),
            Key::new("a/1", "b", "")
        );
        assert!(Key::parse("").is_err());
        assert!(Key::parse("///").is_err());
    }

    #[test]
    fn path_round_trips_through_parse() {
        let keys = [
            Key::new("", "users", "u1"),
            Key::new("users/u1", "devices", "d1"),
            Key::new("orgs/o/users/u1", "devices", "d-9"),
        ];
        for key in keys {
            let prefixed = format!("projects/p/databases/d/documents/{}", key.path());
            assert_eq!(Key::parse(&prefixed).unwrap(), key);
            assert_eq!(Key::parse(&key.path()).unwrap(), key);
        }
    }

    #[test]
    fn documents_collection_is_not_mistaken_for_database_root() {
        let key = Key::new("users/u1", "documents", "d1");
        assert_eq!(Key::parse(&key.path()).unwrap(), key);
        let prefixed = format!("projects/p/databases/d/documents/{}", key.path());
        assert_eq!(Key::parse(&prefixed).unwrap(), key);

        let top = Key::new("", "documents", "d1");
        assert_eq!(Key::parse(&top.path()).unwrap(), top);
        assert_eq!(Key::parse("documents").unwrap(), Key::new("", "documents", ""));
    }

    #[test]
    fn database_root_shape() {
        assert_eq!(
            strip_database_root("/projects/p/databases/(default)/documents/users/u1"),
            "users/u1"
        );
        assert_eq!(strip_database_root("users/u1/documents/d1"), "users/u1/documents/d1");
        assert_eq!(strip_database_root("projects/p/documents/d1"), "projects/p/documents/d1");
        assert!(is_database_root("projects/p/databases/(default)"));
        assert!(!is_database_root("projects/p"));
        assert!(!is_database_root("db/documents"));
    }

    #[test]
    fn parent_key_walks_one_level_up() {
        let key = Key::new("orgs/o/users/u1", "devices", "d1");
        let parent = key.parent_key().expect("has parent");
        assert_eq!(parent, Key::new("orgs/o", "users", "u1"));
        let grand = parent.parent_key().expect("has grandparent");
        assert_eq!(grand, Key::new("", "orgs", "o"));
        assert!(grand.parent_key().is_none());
    }

    #[test]
    fn keys_without_id_never_match() {
        let empty = Key::new("", "users", "");
        assert!(!empty.is_same_document(&empty));
        let a = Key::new("", "users", "u1");
        assert!(a.is_same_document(&a.clone()));
        assert!(!a.is_same_document(&Key::new("x/1", "users", "u1")));
    }

    #[test]
    fn inject_sets_id_and_parent_chain() {
        let key = Key::new("orgs/o/users/u1", "devices", "d1");
        let device = key.inject(Device::default());
        assert_eq!(device.id, "d1");
        let owner = device.owner.expect("parent injected");
        assert_eq!(owner, Key::new("orgs/o", "users", "u1"));
        assert_eq!(Key::of(&key.inject(Device::default())).unwrap(), key);
    }

    #[test]
    fn key_of_record_uses_parent_and_collection() {
        let device = Device {
            id: "d2".into(),
            owner: Some(Key::new("", "users", "u1")),
            name: "phone".into(),
        };
        let key = Key::of(&device).unwrap();
        assert_eq!(key.path(), "users/u1/devices/d2");
        assert!(key.is_same_kind::<Device>());
        assert_eq!(
            Key::collection_of::<Device>(device.parent()).collection_path(),
            "users/u1/devices"
        );
        assert_eq!(Key::group_of::<Device>().collection_path(), "devices");
    }

    #[test]
    fn require_id_rejects_unassigned_keys() {
        let err = Key::new("", "users", "").require_id().unwrap_err();
        assert!(matches!(err, StoreError::InvalidIdentity { .. }));
    }
}
