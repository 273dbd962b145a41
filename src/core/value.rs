//! Purpose: Record shape plus the equality and ordering rules used by queries.
//! Exports: `Record`, `values_equal`, `natural_cmp`, `sort_cmp`, `match_text`, `kind_name`.
//! Role: Leaf helpers shared by the condition evaluator and the query pipeline.
//! Invariants: Equality is strict (no cross-kind coercion) except int/float numbers.
//! Invariants: `natural_cmp` is partial; `sort_cmp` is total and deterministic.
use std::borrow::Cow;
use std::cmp::Ordering;

use serde_json::{Map, Value};

/// One loosely-typed row. Field order follows insertion order.
pub type Record = Map<String, Value>;

pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            if x.is_f64() || y.is_f64() {
                x.as_f64() == y.as_f64()
            } else {
                x == y
            }
        }
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| values_equal(l, r))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(key, l)| y.get(key).is_some_and(|r| values_equal(l, r)))
        }
        _ => a == b,
    }
}

/// Ordering used by `$gt`/`$gte`/`$lt`/`$lte`. `None` means "not comparable".
pub fn natural_cmp(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Number(_), Value::Number(_)) => number_cmp(a, b),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Total order for sorting. Absent fields sort before every present value.
pub fn sort_cmp(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => {
            let (ka, kb) = (kind_rank(a), kind_rank(b));
            if ka != kb {
                return ka.cmp(&kb);
            }
            match (a, b) {
                (Value::Array(_), Value::Array(_)) | (Value::Object(_), Value::Object(_)) => {
                    a.to_string().cmp(&b.to_string())
                }
                _ => natural_cmp(a, b).unwrap_or(Ordering::Equal),
            }
        }
    }
}

/// Text a `$regex` is tested against: strings as-is, other values as JSON.
pub fn match_text(value: &Value) -> Cow<'_, str> {
    match value {
        Value::String(s) => Cow::Borrowed(s.as_str()),
        other => Cow::Owned(other.to_string()),
    }
}

/// Lowercase JSON kind name, used in diagnostics.
pub fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn number_cmp(a: &Value, b: &Value) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return Some(x.cmp(&y));
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        return Some(x.cmp(&y));
    }
    let x = a.as_f64()?;
    let y = b.as_f64()?;
    x.partial_cmp(&y)
}

fn kind_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

#[cfg(test)]
mod tests {
    use super::{match_text, natural_cmp, sort_cmp, values_equal};
    use serde_json::json;
    use std::cmp::Ordering;

    #[test]
    fn integer_and_float_numbers_are_equal() {
        assert!(values_equal(&json!(1), &json!(1.0)));
        assert!(!values_equal(&json!(1), &json!("1")));
        assert!(values_equal(&json!({"a": [1, 2]}), &json!({"a": [1.0, 2]})));
    }

    #[test]
    fn cross_kind_values_are_not_comparable() {
        assert_eq!(natural_cmp(&json!(30), &json!("30")), None);
        assert_eq!(natural_cmp(&json!([1]), &json!([1])), None);
        assert_eq!(natural_cmp(&json!(25), &json!(30)), Some(Ordering::Less));
        assert_eq!(natural_cmp(&json!("b"), &json!("a")), Some(Ordering::Greater));
    }

    #[test]
    fn sort_order_ranks_absent_then_kinds() {
        assert_eq!(sort_cmp(None, Some(&json!(null))), Ordering::Less);
        assert_eq!(sort_cmp(Some(&json!(true)), Some(&json!(0))), Ordering::Less);
        assert_eq!(sort_cmp(Some(&json!(99)), Some(&json!("a"))), Ordering::Less);
        assert_eq!(sort_cmp(Some(&json!(2.5)), Some(&json!(2))), Ordering::Greater);
    }

    #[test]
    fn match_text_uses_raw_strings() {
        assert_eq!(match_text(&json!("alice")), "alice");
        assert_eq!(match_text(&json!(42)), "42");
    }
}
