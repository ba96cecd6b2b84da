use serde_json::Value;

use crate::json::{coerce_number, number};
use crate::normalize::FlatRow;

pub const SEPARATOR: char = '.';

/// Flatten a decoded payload into one column per leaf.
///
/// Nested object keys are joined with [`SEPARATOR`]; arrays and scalars are
/// leaves. Nulls are dropped. A payload that is not an object becomes a
/// single `value` column.
#[must_use]
pub fn flatten(payload: &Value) -> FlatRow {
    let mut row = FlatRow::new();
    match payload {
        Value::Object(_) => walk(payload, String::new(), &mut row),
        Value::Null => {}
        other => {
            row.insert("value".to_string(), other.clone());
        }
    }
    row
}

fn walk(node: &Value, prefix: String, row: &mut FlatRow) {
    match node {
        Value::Object(map) => {
            for (key, child) in map {
                let name = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}{SEPARATOR}{key}")
                };
                walk(child, name, row);
            }
        }
        Value::Null => {}
        leaf => {
            row.insert(prefix, leaf.clone());
        }
    }
}

/// Turn every text leaf that reads as a finite number into a number.
///
/// Runs before the vendor rules, so rules see `"3.61"` as `3.61`. Text that
/// is not numeric is left as it is.
#[must_use]
pub fn coerce_numeric(mut row: FlatRow) -> FlatRow {
    for value in row.values_mut() {
        if let Value::String(text) = value
            && let Some(n) = coerce_number(text).and_then(number)
        {
            *value = n;
        }
    }
    row
}
