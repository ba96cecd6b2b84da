//! Lenient accessors over `serde_json::Value`.
//!
//! Decoder payloads and storage responses are loosely shaped: any key may be
//! missing, null, or of an unexpected type. These helpers look for a value
//! and return `None` instead of failing.

use serde_json::Value;

pub trait ValueExt {
    /// Follow a chain of object keys.
    fn at(&self, path: &[&str]) -> Option<&Value>;

    /// Non-empty string at `path`.
    fn str_at(&self, path: &[&str]) -> Option<&str>;

    /// Number at `path`, accepting numeric strings.
    fn f64_at(&self, path: &[&str]) -> Option<f64>;

    /// Array at `path`.
    fn array_at(&self, path: &[&str]) -> Option<&Vec<Value>>;
}

impl ValueExt for Value {
    fn at(&self, path: &[&str]) -> Option<&Value> {
        path.iter()
            .try_fold(self, |node, key| node.as_object()?.get(*key))
            .filter(|v| !v.is_null())
    }

    fn str_at(&self, path: &[&str]) -> Option<&str> {
        self.at(path)?.as_str().filter(|s| !s.trim().is_empty())
    }

    fn f64_at(&self, path: &[&str]) -> Option<f64> {
        as_f64(self.at(path)?)
    }

    fn array_at(&self, path: &[&str]) -> Option<&Vec<Value>> {
        self.at(path)?.as_array()
    }
}

/// Numeric view of a JSON leaf; text goes through [`coerce_number`].
#[must_use]
pub fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) => coerce_number(s),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Parse text that looks like a number.
///
/// Total: returns `None` for anything that is not a finite decimal number,
/// including `"NaN"`, `"inf"`, blanks and hex literals.
#[must_use]
pub fn coerce_number(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    if trimmed.is_empty() || (trimmed.chars().any(char::is_alphabetic) && !is_exponent(trimmed)) {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|f| f.is_finite())
}

fn is_exponent(s: &str) -> bool {
    s.chars().filter(|c| c.is_alphabetic()).all(|c| c == 'e' || c == 'E')
}

/// JSON number from a float, `None` for non-finite input.
#[must_use]
pub fn number(value: f64) -> Option<Value> {
    serde_json::Number::from_f64(value).map(Value::Number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn at_walks_objects_and_treats_null_as_absent() {
        let v = json!({"a": {"b": {"c": 1}, "n": null}});
        assert_eq!(v.at(&["a", "b", "c"]), Some(&json!(1)));
        assert_eq!(v.at(&["a", "n"]), None);
        assert_eq!(v.at(&["a", "missing", "c"]), None);
        assert_eq!(json!([1, 2]).at(&["a"]), None);
    }

    #[test]
    fn coerce_number_is_total() {
        assert_eq!(coerce_number("12.5"), Some(12.5));
        assert_eq!(coerce_number(" -3 "), Some(-3.0));
        assert_eq!(coerce_number("1e3"), Some(1000.0));
        assert_eq!(coerce_number("High"), None);
        assert_eq!(coerce_number("NaN"), None);
        assert_eq!(coerce_number("inf"), None);
        assert_eq!(coerce_number("0x1F"), None);
        assert_eq!(coerce_number(""), None);
        assert_eq!(coerce_number("3.3V"), None);
    }

    #[test]
    fn f64_at_accepts_numeric_strings() {
        let v = json!({"bat": "3.61", "flag": true, "mode": "IDC"});
        assert_eq!(v.f64_at(&["bat"]), Some(3.61));
        assert_eq!(v.f64_at(&["flag"]), Some(1.0));
        assert_eq!(v.f64_at(&["mode"]), None);
    }
}
