//! The document value model: a tagged enum over the types a document's
//! fields can hold, plus deep-copy, key validation, dotted-path access,
//! total ordering, and text (de)serialization.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Number;

use crate::error::{Error, Result};

/// A document value. Mappings use `BTreeMap` so that key iteration order is
/// always sorted, which `compare_things` relies on when comparing two
/// mappings.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Timestamp(DateTime<Utc>),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut BTreeMap<String, Value>> {
        match self {
            Value::Object(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Relative ordering rank across types: null < number < string < bool <
    /// timestamp < array < mapping.
    fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Number(_) => 1,
            Value::String(_) => 2,
            Value::Bool(_) => 3,
            Value::Timestamp(_) => 4,
            Value::Array(_) => 5,
            Value::Object(_) => 6,
        }
    }
}

/// Recursively copies a value. Since every `Value` variant owns its data,
/// `Clone` already performs a deep copy; this free function exists so call
/// sites can express intent and so the strict-keys variant has a natural
/// home next to it.
pub fn deep_copy(v: &Value) -> Value {
    v.clone()
}

/// Deep-copies `v`, dropping any object key that starts with `$`. Used when
/// promoting a query mapping into a document to insert on upsert.
pub fn deep_copy_strict_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut out = BTreeMap::new();
            for (k, val) in map {
                if !k.starts_with('$') {
                    out.insert(k.clone(), deep_copy_strict_keys(val));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(deep_copy_strict_keys).collect()),
        other => other.clone(),
    }
}

/// Fails with `InvalidKey` if any object key in the tree starts with `$` or
/// contains `.`.
pub fn check_object(v: &Value) -> Result<()> {
    match v {
        Value::Object(map) => {
            for (k, val) in map {
                if k.starts_with('$') {
                    return Err(Error::InvalidKey {
                        reason: format!("key '{}' begins with '$'", k),
                    });
                }
                if k.contains('.') {
                    return Err(Error::InvalidKey {
                        reason: format!("key '{}' contains '.'", k),
                    });
                }
                check_object(val)?;
            }
            Ok(())
        }
        Value::Array(items) => {
            for item in items {
                check_object(item)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Splits `path` on `.` and walks it against `v`. At an array node, an
/// integer-parsing path segment indexes into the array; a non-integer
/// segment fans out, mapping the remaining path over each element and
/// collecting defined results into an array.
pub fn get_dot_value(v: &Value, path: &str) -> Option<Value> {
    let parts: Vec<&str> = path.split('.').collect();
    get_dot_value_parts(v, &parts)
}

fn get_dot_value_parts(v: &Value, parts: &[&str]) -> Option<Value> {
    if parts.is_empty() {
        return Some(v.clone());
    }
    let head = parts[0];
    let rest = &parts[1..];
    match v {
        Value::Object(map) => {
            let next = map.get(head)?;
            get_dot_value_parts(next, rest)
        }
        Value::Array(items) => {
            if let Ok(idx) = head.parse::<usize>() {
                let next = items.get(idx)?;
                get_dot_value_parts(next, rest)
            } else {
                let mut out = Vec::new();
                for item in items {
                    if let Some(found) = get_dot_value_parts(item, parts) {
                        out.push(found);
                    }
                }
                if out.is_empty() {
                    None
                } else {
                    Some(Value::Array(out))
                }
            }
        }
        _ => None,
    }
}

/// Sets the value at a dotted path inside an object value, creating
/// intermediate objects as needed. Only used against object roots (document
/// bodies); array segments along the path are not created implicitly.
pub fn set_dot_value(v: &mut Value, path: &str, new_value: Value) {
    let parts: Vec<&str> = path.split('.').collect();
    set_dot_value_parts(v, &parts, new_value);
}

fn set_dot_value_parts(v: &mut Value, parts: &[&str], new_value: Value) {
    if parts.is_empty() {
        *v = new_value;
        return;
    }
    if !matches!(v, Value::Object(_)) {
        *v = Value::Object(BTreeMap::new());
    }
    if let Value::Object(map) = v {
        if parts.len() == 1 {
            map.insert(parts[0].to_string(), new_value);
        } else {
            let entry = map
                .entry(parts[0].to_string())
                .or_insert_with(|| Value::Object(BTreeMap::new()));
            set_dot_value_parts(entry, &parts[1..], new_value);
        }
    }
}

/// Removes the value at a dotted path, if present.
pub fn unset_dot_value(v: &mut Value, path: &str) {
    let parts: Vec<&str> = path.split('.').collect();
    unset_dot_value_parts(v, &parts);
}

fn unset_dot_value_parts(v: &mut Value, parts: &[&str]) {
    if parts.is_empty() {
        return;
    }
    if let Value::Object(map) = v {
        if parts.len() == 1 {
            map.remove(parts[0]);
        } else if let Some(next) = map.get_mut(parts[0]) {
            unset_dot_value_parts(next, &parts[1..]);
        }
    }
}

/// Total order over values, used by indexes and sort. A string comparator
/// override may replace the natural string order.
pub fn compare_things(a: &Value, b: &Value) -> Ordering {
    compare_things_with(a, b, None)
}

pub fn compare_things_with(
    a: &Value,
    b: &Value,
    compare_strings: Option<&dyn Fn(&str, &str) -> Ordering>,
) -> Ordering {
    let ra = a.type_rank();
    let rb = b.type_rank();
    if ra != rb {
        return ra.cmp(&rb);
    }
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Number(x), Value::Number(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => match compare_strings {
            Some(cmp) => cmp(x, y),
            None => x.cmp(y),
        },
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Timestamp(x), Value::Timestamp(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (xi, yi) in x.iter().zip(y.iter()) {
                let ord = compare_things_with(xi, yi, compare_strings);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            let xk: Vec<&String> = x.keys().collect();
            let yk: Vec<&String> = y.keys().collect();
            for (xi, yi) in xk.iter().zip(yk.iter()) {
                let ord = xi.cmp(yi);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            if xk.len() != yk.len() {
                return xk.len().cmp(&yk.len());
            }
            for k in xk {
                let ord = compare_things_with(&x[k], &y[k], compare_strings);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        }
        _ => Ordering::Equal,
    }
}

/// Converts a `Value` into the `serde_json::Value` used for text encoding,
/// tagging timestamps as `{"$$date": <ms>}` so the type survives round-trip.
pub fn to_json(v: &Value) -> serde_json::Value {
    match v {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Number(n) => Number::from_f64(*n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Timestamp(ts) => {
            let mut map = serde_json::Map::new();
            map.insert("$$date".to_string(), serde_json::Value::from(ts.timestamp_millis()));
            serde_json::Value::Object(map)
        }
        Value::Array(items) => serde_json::Value::Array(items.iter().map(to_json).collect()),
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, val) in map {
                out.insert(k.clone(), to_json(val));
            }
            serde_json::Value::Object(out)
        }
    }
}

/// Converts a decoded `serde_json::Value` back into a `Value`, recognising
/// the `{"$$date": <ms>}` timestamp tag.
pub fn from_json(v: &serde_json::Value) -> Value {
    match v {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
        serde_json::Value::String(s) => Value::String(s.clone()),
        serde_json::Value::Array(items) => Value::Array(items.iter().map(from_json).collect()),
        serde_json::Value::Object(map) => {
            if map.len() == 1 {
                if let Some(ms) = map.get("$$date").and_then(|v| v.as_i64()) {
                    return Value::Timestamp(
                        Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now),
                    );
                }
            }
            let mut out = BTreeMap::new();
            for (k, val) in map {
                out.insert(k.clone(), from_json(val));
            }
            Value::Object(out)
        }
    }
}

/// Canonical single-line JSON text for a value.
pub fn serialize(v: &Value) -> String {
    to_json(v).to_string()
}

/// Parses canonical JSON text back into a value. `CorruptLog`-level
/// accounting is the caller's responsibility (see `persistence`); this
/// function simply reports whether the text was well-formed JSON.
pub fn deserialize(text: &str) -> Option<Value> {
    serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .map(|j| from_json(&j))
}
