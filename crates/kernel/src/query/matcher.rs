//! In-process evaluation of filters and ordering of document values.

use std::cmp::Ordering;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use super::plan::{Condition, Filter, FilterClause, SortDirection, SortKey};
use crate::store::document::{self, Document};

/// Field paths a filter or sort may reference.
///
/// # Panics
///
/// Panics if the hard-coded regex literal is invalid (impossible in practice).
#[allow(clippy::expect_used)]
static VALID_FIELD_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_]+(\.[A-Za-z0-9_]+)*$").expect("valid regex literal")
});

/// Check whether a field path is safe to evaluate or compile.
pub fn is_valid_field_path(path: &str) -> bool {
    VALID_FIELD_PATH.is_match(path)
}

/// Evaluate a filter against a document.
pub fn matches(filter: &Filter, doc: &Document) -> bool {
    filter.clauses().iter().all(|clause| clause_matches(clause, doc))
}

fn clause_matches(clause: &FilterClause, doc: &Document) -> bool {
    if !is_valid_field_path(&clause.field) {
        return false;
    }
    let actual = document::get_path(doc, &clause.field);

    match &clause.condition {
        Condition::Equals(expected) => {
            actual.is_some_and(|a| any_element(a, |v| values_equal(v, expected)))
        }
        Condition::NotEquals(expected) => {
            !actual.is_some_and(|a| any_element(a, |v| values_equal(v, expected)))
        }
        Condition::In(options) => actual.is_some_and(|a| {
            any_element(a, |v| options.iter().any(|option| values_equal(v, option)))
        }),
        Condition::Range(bounds) => actual.is_some_and(|a| {
            any_element(a, |v| {
                bounds.iter().all(|(op, bound)| {
                    compare_same_type(v, bound).is_some_and(|ordering| op.accepts(ordering))
                })
            })
        }),
    }
}

/// The value itself or, for arrays, any of its elements.
fn any_element(value: &Value, predicate: impl Fn(&Value) -> bool) -> bool {
    if predicate(value) {
        return true;
    }
    match value {
        Value::Array(items) => items.iter().any(predicate),
        _ => false,
    }
}

/// Equality with numbers compared by value (`5` equals `5.0`).
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Compare two values of the same JSON type. Mixed types are incomparable.
pub fn compare_same_type(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Number(_)) => 1,
        Some(Value::String(_)) => 2,
        Some(Value::Object(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Bool(_)) => 5,
    }
}

/// Total order over optional values, used for sorting.
///
/// Missing and null sort first, then numbers, strings, objects, arrays and
/// booleans.
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let rank = type_rank(a).cmp(&type_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.total_cmp(&y)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Array(x)), Some(Value::Array(y))) => x
            .iter()
            .zip(y.iter())
            .map(|(l, r)| compare_values(Some(l), Some(r)))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        (Some(x @ Value::Object(_)), Some(y @ Value::Object(_))) => {
            x.to_string().cmp(&y.to_string())
        }
        _ => Ordering::Equal,
    }
}

/// Compare two documents by a list of sort keys.
pub fn compare_documents(a: &Document, b: &Document, keys: &[SortKey]) -> Ordering {
    for key in keys {
        if !is_valid_field_path(&key.field) {
            continue;
        }
        let ordering = compare_values(
            document::get_path(a, &key.field),
            document::get_path(b, &key.field),
        );
        let ordering = match key.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Stable sort of documents by sort keys.
pub fn sort_documents(docs: &mut [Document], keys: &[SortKey]) {
    if keys.is_empty() {
        return;
    }
    docs.sort_by(|a, b| compare_documents(a, b, keys));
}
