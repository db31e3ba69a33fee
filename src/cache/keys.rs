//! Cache key layout.
//!
//! Every key starts with the configured namespace:
//!
//! - `{ns}/{path}` for one document
//! - `{ns}/collections/{collection_path}` for an unconditioned scan
//! - `{ns}/collections/group/{collection}` for an unconditioned group scan
//! - `{ns}/{collection_path}/conds/{hash}` for a conditioned query
//! - `{uri}/cursor` for the cursor that query emitted
//! - `{ns}/metadata/{collection_path}` and `{ns}/metadata/group/{collection}`
//!   for invalidation registries

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::Key;

/// A flat cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheUri(String);

impl CacheUri {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheUri {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Derives cache keys under one namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKeys {
    namespace: String,
}

impl CacheKeys {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn join(&self, rest: impl fmt::Display) -> CacheUri {
        CacheUri(format!("{}/{rest}", self.namespace))
    }

    pub fn document(&self, key: &Key) -> CacheUri {
        self.join(key.path())
    }

    pub fn collection(&self, scope: &Key) -> CacheUri {
        self.join(format_args!("collections/{}", scope.collection_path()))
    }

    pub fn group_collection(&self, scope: &Key) -> CacheUri {
        self.join(format_args!("collections/group/{}", scope.collection()))
    }

    pub fn conditions(&self, scope: &Key, hash: &str) -> CacheUri {
        self.join(format_args!("{}/conds/{hash}", scope.collection_path()))
    }

    pub fn cursor(&self, uri: &CacheUri) -> CacheUri {
        CacheUri(format!("{}/cursor", uri.0))
    }

    pub fn metadata(&self, scope: &Key) -> CacheUri {
        self.join(format_args!("metadata/{}", scope.collection_path()))
    }

    pub fn group_metadata(&self, scope: &Key) -> CacheUri {
        self.join(format_args!("metadata/group/{}", scope.collection()))
    }
}
