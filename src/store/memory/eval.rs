//! Query evaluation over JSON documents.

use std::cmp::Ordering as CmpOrdering;

use serde_json::Value;

use crate::domain::Key;
use crate::domain::key::strip_database_root;
use crate::store::backend::{Direction, Filter, Operator, Ordering, Query, QueryTarget};

/// Resolve a dotted field path inside a document.
pub(super) fn field<'v>(data: &'v Value, path: &str) -> Option<&'v Value> {
    path.split('.')
        .try_fold(data, |value, segment| value.as_object()?.get(segment))
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON values: null, booleans, numbers, strings, arrays,
/// objects.
pub(super) fn compare_values(a: &Value, b: &Value) -> CmpOrdering {
    match (a, b) {
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Number(a), Value::Number(b)) => {
            let (a, b) = (a.as_f64().unwrap_or(f64::NAN), b.as_f64().unwrap_or(f64::NAN));
            a.total_cmp(&b)
        }
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Array(a), Value::Array(b)) => a
            .iter()
            .zip(b)
            .map(|(a, b)| compare_values(a, b))
            .find(|ord| ord.is_ne())
            .unwrap_or_else(|| a.len().cmp(&b.len())),
        (Value::Object(_), Value::Object(_)) => a.to_string().cmp(&b.to_string()),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn same_type(a: &Value, b: &Value) -> bool {
    type_rank(a) == type_rank(b)
}

fn matches_filter(data: &Value, filter: &Filter) -> bool {
    let Some(actual) = field(data, &filter.field) else {
        return false;
    };
    let expected = &filter.value;
    match filter.op {
        Operator::Eq => compare_values(actual, expected).is_eq(),
        Operator::Ne => compare_values(actual, expected).is_ne(),
        Operator::Lt => same_type(actual, expected) && compare_values(actual, expected).is_lt(),
        Operator::Le => same_type(actual, expected) && compare_values(actual, expected).is_le(),
        Operator::Gt => same_type(actual, expected) && compare_values(actual, expected).is_gt(),
        Operator::Ge => same_type(actual, expected) && compare_values(actual, expected).is_ge(),
        Operator::ArrayContains => actual
            .as_array()
            .is_some_and(|items| items.iter().any(|item| compare_values(item, expected).is_eq())),
        Operator::In => expected
            .as_array()
            .is_some_and(|options| options.iter().any(|option| compare_values(actual, option).is_eq())),
    }
}

fn in_target(key: &Key, target: &QueryTarget) -> bool {
    if !key.has_id() {
        return false;
    }
    match target {
        QueryTarget::Collection(path) => key.collection_path() == *path,
        QueryTarget::Group(name) => key.collection() == name,
    }
}

fn directed(ord: CmpOrdering, direction: Direction) -> CmpOrdering {
    match direction {
        Direction::Asc => ord,
        Direction::Desc => ord.reverse(),
    }
}

/// Compare two rows under `orders`, breaking ties on the document path in the
/// direction of the last ordering.
fn compare_rows(
    (a_path, a_data): (&str, &Value),
    (b_path, b_data): (&str, &Value),
    orders: &[Ordering],
) -> CmpOrdering {
    for order in orders {
        let ord = match (field(a_data, &order.field), field(b_data, &order.field)) {
            (Some(a), Some(b)) => compare_values(a, b),
            (None, Some(_)) => CmpOrdering::Less,
            (Some(_), None) => CmpOrdering::Greater,
            (None, None) => CmpOrdering::Equal,
        };
        let ord = directed(ord, order.direction);
        if ord.is_ne() {
            return ord;
        }
    }
    let tie_direction = orders.last().map_or(Direction::Asc, |order| order.direction);
    directed(a_path.cmp(b_path), tie_direction)
}

/// Run `query` over `(relative path, data)` rows, returning the selected rows
/// in result order.
pub(super) fn execute<'a, I>(rows: I, query: &Query) -> Vec<(String, Value)>
where
    I: IntoIterator<Item = (&'a String, &'a Value)>,
{
    let mut selected: Vec<(String, Value)> = rows
        .into_iter()
        .filter(|(path, data)| {
            Key::parse(path).is_ok_and(|key| in_target(&key, &query.target))
                && query.filters.iter().all(|filter| matches_filter(data, filter))
                && query
                    .orders
                    .iter()
                    .all(|order| field(data, &order.field).is_some())
        })
        .map(|(path, data)| (path.clone(), data.clone()))
        .collect();

    selected.sort_by(|a, b| compare_rows((a.0.as_str(), &a.1), (b.0.as_str(), &b.1), &query.orders));

    let resume_index = match &query.start_after {
        Some(anchor) => {
            let anchor_path = relative_path(&anchor.path);
            selected.partition_point(|(path, data)| {
                compare_rows(
                    (path.as_str(), data),
                    (anchor_path.as_str(), &anchor.data),
                    &query.orders,
                )
                .is_le()
            })
        }
        None => 0,
    };

    selected
        .into_iter()
        .skip(resume_index + query.offset)
        .take(query.limit.unwrap_or(usize::MAX))
        .collect()
}

/// Strip a database root prefix from a snapshot path.
pub(super) fn relative_path(path: &str) -> String {
    strip_database_root(path).to_string()
}
