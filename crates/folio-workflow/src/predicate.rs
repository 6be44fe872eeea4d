//! Closed predicate form for conditional branches.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Comparison applied to a result field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Exists,
}

/// `field <comparator> value`, evaluated against a step result object.
///
/// `field` is a dotted path (`review.decision`). A missing field, or a
/// result that is not an object, makes every comparator false.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub field: String,
    #[serde(rename = "op", alias = "comparator")]
    pub comparator: Comparator,
    #[serde(default)]
    pub value: Value,
}

impl Predicate {
    pub fn new(field: impl Into<String>, comparator: Comparator, value: Value) -> Self {
        Self {
            field: field.into(),
            comparator,
            value,
        }
    }

    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, Comparator::Eq, value.into())
    }

    pub fn exists(field: impl Into<String>) -> Self {
        Self::new(field, Comparator::Exists, Value::Null)
    }

    pub fn evaluate(&self, result: &Value) -> bool {
        if !result.is_object() {
            return false;
        }
        let Some(actual) = lookup_path(result, &self.field) else {
            return false;
        };

        match self.comparator {
            Comparator::Exists => !actual.is_null(),
            Comparator::Eq => actual == &self.value,
            Comparator::Ne => actual != &self.value,
            Comparator::Gt => compare_numbers(actual, &self.value, |a, b| a > b),
            Comparator::Gte => compare_numbers(actual, &self.value, |a, b| a >= b),
            Comparator::Lt => compare_numbers(actual, &self.value, |a, b| a < b),
            Comparator::Lte => compare_numbers(actual, &self.value, |a, b| a <= b),
        }
    }
}

fn compare_numbers(actual: &Value, expected: &Value, cmp: impl Fn(f64, f64) -> bool) -> bool {
    match (actual.as_f64(), expected.as_f64()) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => false,
    }
}

/// Follow a dotted path through nested objects.
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(value, |current, part| current.as_object()?.get(part))
}
