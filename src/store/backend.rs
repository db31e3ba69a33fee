//! Contract the facade needs from the hierarchical document store.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{Result, StoreError};

/// One document as returned by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Store path, possibly prefixed by the database root.
    pub path: String,
    pub data: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn code(self) -> i64 {
        match self {
            Direction::Asc => 1,
            Direction::Desc => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Direction::Asc),
            2 => Some(Direction::Desc),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    ArrayContains,
    In,
}

impl Operator {
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Eq => "==",
            Operator::Ne => "!=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::ArrayContains => "array-contains",
            Operator::In => "in",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = StoreError;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "==" => Ok(Operator::Eq),
            "!=" => Ok(Operator::Ne),
            "<" => Ok(Operator::Lt),
            "<=" => Ok(Operator::Le),
            ">" => Ok(Operator::Gt),
            ">=" => Ok(Operator::Ge),
            "array-contains" => Ok(Operator::ArrayContains),
            "in" => Ok(Operator::In),
            other => Err(StoreError::backend(format!("unknown operator `{other}`"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: Operator,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ordering {
    pub field: String,
    pub direction: Direction,
}

/// Which documents a query scans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryTarget {
    /// Direct children of one collection path.
    Collection(String),
    /// Every collection with this name, at any depth.
    Group(String),
}

/// A declarative query handed to [`DocumentStore::run_query`].
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub target: QueryTarget,
    pub filters: Vec<Filter>,
    pub orders: Vec<Ordering>,
    pub offset: usize,
    pub limit: Option<usize>,
    pub start_after: Option<Snapshot>,
}

impl Query {
    pub fn new(target: QueryTarget) -> Self {
        Self {
            target,
            filters: Vec::new(),
            orders: Vec::new(),
            offset: 0,
            limit: None,
            start_after: None,
        }
    }

    pub fn filter(mut self, field: impl Into<String>, op: Operator, value: Value) -> Self {
        self.filters.push(Filter {
            field: field.into(),
            op,
            value,
        });
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.orders.push(Ordering {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn start_after(mut self, snapshot: Snapshot) -> Self {
        self.start_after = Some(snapshot);
        self
    }

    pub fn is_ordered_by(&self, field: &str) -> bool {
        self.orders.iter().any(|order| order.field == field)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SetOptions {
    #[default]
    Overwrite,
    /// Shallow-merge top-level fields into the existing document.
    Merge,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Precondition {
    #[default]
    None,
    /// Fail with `NotFound` unless the document exists.
    Exists,
}

/// One write inside an atomic batch or transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchWrite {
    Create { path: String, data: Value },
    Set {
        path: String,
        data: Value,
        options: SetOptions,
    },
    Delete {
        path: String,
        precondition: Precondition,
    },
}

impl BatchWrite {
    pub fn path(&self) -> &str {
        match self {
            BatchWrite::Create { path, .. }
            | BatchWrite::Set { path, .. }
            | BatchWrite::Delete { path, .. } => path,
        }
    }
}

pub type SnapshotStream = BoxStream<'static, Result<Snapshot>>;

/// Hierarchical document store.
///
/// Paths passed in are relative (`users/u1/devices/d1`); snapshot paths
/// coming back may carry a database root prefix.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get_document(&self, path: &str) -> Result<Option<Snapshot>>;

    /// Fetch several documents. Missing documents are simply absent, so the
    /// caller compares counts.
    async fn get_documents(&self, paths: &[String]) -> Result<Vec<Snapshot>>;

    /// Fails with `AlreadyExists` when the document exists.
    async fn create_document(&self, path: &str, data: Value) -> Result<()>;

    async fn set_document(&self, path: &str, data: Value, options: SetOptions) -> Result<()>;

    async fn delete_document(&self, path: &str, precondition: Precondition) -> Result<()>;

    async fn run_query(&self, query: Query) -> Result<SnapshotStream>;

    /// Apply every write or none of them.
    async fn commit_batch(&self, writes: Vec<BatchWrite>) -> Result<()>;

    async fn begin_transaction(&self) -> Result<Box<dyn StoreTransaction>>;
}

/// A running transaction. Reads and writes go through [`StoreTransaction::store`];
/// writes become visible on [`StoreTransaction::commit`].
#[async_trait]
pub trait StoreTransaction: Send + Sync {
    fn store(&self) -> Arc<dyn DocumentStore>;

    async fn commit(&self) -> Result<()>;

    async fn rollback(&self) -> Result<()>;
}
