//! Runtime value semantics over `serde_json::Value`
//!
//! Arithmetic runs in `f64`; whole results are written back as integers
//! so that `4 + 6` compares equal to `json!(10)`.

use crate::errors::{ExprError, ExprResult};
use serde_json::{Number, Value};
use std::cmp::Ordering;

/// Largest magnitude at which every integer is exactly representable in `f64`
const MAX_EXACT_INT: f64 = 9_007_199_254_740_992.0;

/// Convert a float result back to a JSON number, preferring integers
pub fn number(n: f64) -> ExprResult<Value> {
    if !n.is_finite() {
        return Err(ExprError::NonFinite);
    }
    if n.fract() == 0.0 && n.abs() <= MAX_EXACT_INT {
        return Ok(Value::from(n as i64));
    }
    Number::from_f64(n)
        .map(Value::Number)
        .ok_or(ExprError::NonFinite)
}

pub fn as_number(op: &str, value: &Value) -> ExprResult<f64> {
    value
        .as_f64()
        .ok_or_else(|| ExprError::type_mismatch(op, format!("expected a number, found {}", type_name(value))))
}

/// JSON truthiness: `null`, `false`, `0`, `""`, `[]` and `{}` are false
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Equality with numeric normalization (`2 == 2.0`)
pub fn loose_eq(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => lhs == rhs,
    }
}

/// Ordering for numbers and strings; anything else is a type error
pub fn compare(op: &str, lhs: &Value, rhs: &Value) -> ExprResult<Ordering> {
    match (lhs, rhs) {
        (Value::Number(_), Value::Number(_)) => {
            let (a, b) = (as_number(op, lhs)?, as_number(op, rhs)?);
            a.partial_cmp(&b).ok_or(ExprError::NonFinite)
        }
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        _ => Err(ExprError::type_mismatch(
            op,
            format!("cannot compare {} with {}", type_name(lhs), type_name(rhs)),
        )),
    }
}

/// `+`: numeric addition, or concatenation when either side is a string
pub fn add(lhs: &Value, rhs: &Value) -> ExprResult<Value> {
    match (lhs, rhs) {
        (Value::String(_), _) | (_, Value::String(_)) => {
            Ok(Value::String(format!("{}{}", display(lhs), display(rhs))))
        }
        (Value::Array(a), Value::Array(b)) => {
            Ok(Value::Array(a.iter().chain(b.iter()).cloned().collect()))
        }
        _ => number(as_number("+", lhs)? + as_number("+", rhs)?),
    }
}

/// Text form used by string concatenation: strings unquoted, the rest as JSON
pub fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// `.name` access. Missing fields and `null` receivers yield `null`.
pub fn field(value: &Value, name: &str) -> ExprResult<Value> {
    match value {
        Value::Object(map) => Ok(map.get(name).cloned().unwrap_or(Value::Null)),
        Value::Null => Ok(Value::Null),
        other => Err(ExprError::type_mismatch(
            format!(".{}", name),
            format!("cannot read a field of {}", type_name(other)),
        )),
    }
}

/// `[i]` access on arrays (negative counts from the end) and `["k"]` on objects
pub fn index(value: &Value, idx: &Value) -> ExprResult<Value> {
    match (value, idx) {
        (Value::Array(items), Value::Number(n)) => {
            let i = n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                .ok_or_else(|| ExprError::type_mismatch("[]", "array index must be an integer"))?;
            let len = items.len() as i64;
            let i = if i < 0 { len + i } else { i };
            Ok(if (0..len).contains(&i) {
                items[i as usize].clone()
            } else {
                Value::Null
            })
        }
        (Value::Object(map), Value::String(key)) => {
            Ok(map.get(key).cloned().unwrap_or(Value::Null))
        }
        (Value::Null, _) => Ok(Value::Null),
        _ => Err(ExprError::type_mismatch(
            "[]",
            format!("cannot index {} with {}", type_name(value), type_name(idx)),
        )),
    }
}

pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
