//! Declarative query conditions with an order-independent hash.

use std::fmt;

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::cache::keys::{CacheKeys, CacheUri};
use crate::domain::{Key, Result, StoreError};
use crate::store::backend::{Direction, DocumentStore, Operator, Query};

use super::cursor::{Cursor, CursorOrder};

const OFFSET_PRIORITY: u32 = 10_000_000;
const LIMIT_PRIORITY: u32 = 10_000_100;
const ORDER_PRIORITY: u32 = 10_000_200;

/// One predicate or paging directive.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Where {
        field: String,
        op: Operator,
        value: Value,
    },
    Offset(usize),
    Limit(usize),
    OrderBy {
        field: String,
        direction: Direction,
    },
}

impl Condition {
    /// This condition's contribution to the conditions hash.
    pub fn fragment(&self) -> String {
        match self {
            Condition::Where { field, op, value } => format!("{field}-{op}-{value}"),
            Condition::Offset(offset) => format!("offset{offset}"),
            Condition::Limit(limit) => format!("limit{limit}"),
            Condition::OrderBy { field, direction } => {
                format!("orderBy:{field}-{}", direction.code())
            }
        }
    }

    /// Evaluation rank: predicates by the first two characters of their
    /// field, then offset, limit and ordering.
    pub fn priority(&self) -> u32 {
        match self {
            Condition::Where { field, .. } => {
                let bytes = field.as_bytes();
                match bytes {
                    [] => 0,
                    [first] => u32::from(*first),
                    [first, second, ..] => u32::from(*first) * 10_000 + u32::from(*second),
                }
            }
            Condition::Offset(_) => OFFSET_PRIORITY,
            Condition::Limit(_) => LIMIT_PRIORITY,
            Condition::OrderBy { .. } => ORDER_PRIORITY,
        }
    }

    fn apply(&self, query: Query) -> Query {
        match self {
            Condition::Where { field, op, value } => query.filter(field.clone(), *op, value.clone()),
            Condition::Offset(offset) => query.offset(*offset),
            Condition::Limit(limit) => query.limit(*limit),
            Condition::OrderBy { field, direction } => query.order_by(field.clone(), *direction),
        }
    }
}

/// A set of query conditions, an optional collection-group scope and an
/// optional resume cursor.
///
/// Builder calls may come in any order; [`Conditions::hash`] and
/// [`Conditions::apply`] work on a canonical sort. Predicates are ordered
/// among themselves by priority and fragment. Orderings keep their relative
/// call order because it changes the result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conditions {
    conditions: Vec<Condition>,
    group: Option<String>,
    start_after: Option<Cursor>,
}

impl Conditions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, field: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition::Where {
            field: field.into(),
            op,
            value: value.into(),
        });
        self
    }

    /// Set the page size; a later call replaces an earlier one.
    pub fn limit(mut self, limit: usize) -> Self {
        self.conditions.retain(|c| !matches!(c, Condition::Limit(_)));
        self.conditions.push(Condition::Limit(limit));
        self
    }

    /// Skip rows; a later call replaces an earlier one.
    pub fn offset(mut self, offset: usize) -> Self {
        self.conditions.retain(|c| !matches!(c, Condition::Offset(_)));
        self.conditions.push(Condition::Offset(offset));
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.conditions.push(Condition::OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn collection_group(mut self, collection: impl Into<String>) -> Self {
        self.group = Some(collection.into());
        self
    }

    /// Resume after the record a previous page ended on.
    pub fn start_after(mut self, cursor: Cursor) -> Self {
        self.start_after = Some(cursor);
        self
    }

    /// Resume from an encoded token; an empty token leaves the conditions
    /// unchanged.
    pub fn start_after_token(self, token: &str) -> Result<Self> {
        Ok(match Cursor::decode(token)? {
            Some(cursor) => self.start_after(cursor),
            None => self,
        })
    }

    pub(crate) fn set_group(&mut self, collection: impl Into<String>) {
        self.group = Some(collection.into());
    }

    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    pub fn resume_cursor(&self) -> Option<&Cursor> {
        self.start_after.as_ref()
    }

    pub fn limit_value(&self) -> Option<usize> {
        self.conditions.iter().find_map(|c| match c {
            Condition::Limit(limit) => Some(*limit),
            _ => None,
        })
    }

    /// The "get everything" case.
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty() && self.start_after.is_none()
    }

    fn explicit_orders(&self) -> Vec<CursorOrder> {
        self.conditions
            .iter()
            .filter_map(|c| match c {
                Condition::OrderBy { field, direction } => Some(CursorOrder {
                    field: field.clone(),
                    direction: *direction,
                }),
                _ => None,
            })
            .collect()
    }

    /// The sort specification a page cursor is produced under, if this query
    /// tracks one at all.
    pub fn cursor_orders(&self) -> Option<Vec<CursorOrder>> {
        let explicit = self.explicit_orders();
        if !explicit.is_empty() {
            return Some(explicit);
        }
        self.start_after.as_ref().map(|cursor| cursor.orders.clone())
    }

    fn sorted(&self) -> Vec<&Condition> {
        let mut sorted: Vec<&Condition> = self.conditions.iter().collect();
        sorted.sort_by(|a, b| {
            a.priority().cmp(&b.priority()).then_with(|| {
                if matches!(a, Condition::OrderBy { .. }) {
                    std::cmp::Ordering::Equal
                } else {
                    a.fragment().cmp(&b.fragment())
                }
            })
        });
        sorted
    }

    /// Hex digest identifying this combination of conditions; empty when
    /// there is nothing to hash.
    pub fn hash(&self) -> String {
        if self.is_empty() {
            return String::new();
        }
        let mut hasher = Sha256::new();
        if let Some(group) = &self.group {
            hasher.update(group.as_bytes());
        }
        for condition in self.sorted() {
            hasher.update(condition.fragment().as_bytes());
        }
        if let Some(cursor) = &self.start_after {
            hasher.update(format!("startAfter:{}", cursor.plain()).as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Cache key of the result set for these conditions under `scope`.
    pub fn cache_uri(&self, keys: &CacheKeys, scope: &Key) -> CacheUri {
        if self.is_empty() {
            return match &self.group {
                Some(_) => keys.group_collection(scope),
                None => keys.collection(scope),
            };
        }
        keys.conditions(scope, &self.hash())
    }

    /// Cache key of the cursor emitted alongside [`Conditions::cache_uri`].
    pub fn cursor_uri(&self, keys: &CacheKeys, scope: &Key) -> CacheUri {
        keys.cursor(&self.cache_uri(keys, scope))
    }

    /// Lay the conditions onto `query` in canonical order, then the resume
    /// directive. Resuming re-applies the cursor's orderings that are not
    /// already present and needs the resume document's snapshot, which is
    /// fetched from `store`.
    pub async fn apply(&self, store: &dyn DocumentStore, query: Query) -> Result<Query> {
        let mut query = self
            .sorted()
            .into_iter()
            .fold(query, |query, condition| condition.apply(query));

        let Some(cursor) = &self.start_after else {
            return Ok(query);
        };
        if cursor.path.is_empty() {
            return Err(StoreError::malformed_cursor("resume cursor has no path"));
        }
        let relative = Key::parse(&cursor.path)?.path();
        let snapshot = store
            .get_document(&relative)
            .await?
            .ok_or(StoreError::NotFound)?;
        for order in &cursor.orders {
            if !query.is_ordered_by(&order.field) {
                query = query.order_by(order.field.clone(), order.direction);
            }
        }
        Ok(query.start_after(snapshot))
    }
}

impl fmt::Display for Conditions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for condition in self.sorted() {
            writeln!(f, "{}", condition.fragment())?;
        }
        Ok(())
    }
}
