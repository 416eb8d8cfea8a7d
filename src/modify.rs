//! The modify engine: turns an update query into a new document body.
//!
//! A raw (no `$`-prefixed key) update query replaces the document wholesale,
//! preserving `_id`. Otherwise every top-level key must be one of the ten
//! recognised mutators, applied in the fixed order below; mixing mutators
//! and raw field keys is rejected.

use std::cmp::Ordering;

use crate::document::Document;
use crate::error::{Error, Result};
use crate::query::matches_filter_value;
use crate::value::{self, compare_things, deep_copy, Value};

const MUTATOR_ORDER: [&str; 10] = [
    "$set",
    "$unset",
    "$inc",
    "$min",
    "$max",
    "$push",
    "$addToSet",
    "$pop",
    "$pull",
    "$rename",
];

/// Applies `update_query` to `doc`, returning the new document body.
/// `_id` handling (preserving it, refreshing `updatedAt`) is the caller's
/// responsibility — this function only knows about mutators.
pub fn modify(doc: &Document, update_query: &Value) -> Result<Document> {
    let map = match update_query {
        Value::Object(m) => m,
        _ => {
            return Err(Error::InvalidModifier {
                reason: "update query must be an object".to_string(),
            })
        }
    };

    let has_operator = map.keys().any(|k| k.starts_with('$'));
    let has_raw = map.keys().any(|k| !k.starts_with('$'));

    if has_operator && has_raw {
        return Err(Error::InvalidModifier {
            reason: "update query mixes modifiers and raw fields".to_string(),
        });
    }

    if !has_operator {
        let mut replacement = deep_copy(update_query);
        if let Value::Object(rm) = &mut replacement {
            if let Some(id) = doc.get("_id") {
                rm.insert("_id".to_string(), id.clone());
            }
        }
        return Document::from_value(replacement).ok_or_else(|| Error::InvalidModifier {
            reason: "replacement document must be an object".to_string(),
        });
    }

    for key in map.keys() {
        if !MUTATOR_ORDER.contains(&key.as_str()) {
            return Err(Error::InvalidModifier {
                reason: format!("unknown modifier {}", key),
            });
        }
    }

    let mut root = doc.as_value();
    for mutator in MUTATOR_ORDER {
        if let Some(spec) = map.get(mutator) {
            apply_mutator(&mut root, mutator, spec)?;
        }
    }
    Document::from_value(root).ok_or_else(|| Error::InvalidModifier {
        reason: "modified document is not an object".to_string(),
    })
}

fn spec_fields(spec: &Value) -> Result<&std::collections::BTreeMap<String, Value>> {
    spec.as_object().ok_or_else(|| Error::InvalidModifier {
        reason: "modifier spec must be an object of field -> value".to_string(),
    })
}

fn apply_mutator(root: &mut Value, mutator: &str, spec: &Value) -> Result<()> {
    match mutator {
        "$set" => {
            for (field, val) in spec_fields(spec)? {
                value::set_dot_value(root, field, deep_copy(val));
            }
        }
        "$unset" => {
            for field in spec_fields(spec)?.keys() {
                value::unset_dot_value(root, field);
            }
        }
        "$inc" => {
            for (field, delta) in spec_fields(spec)? {
                let delta = delta.as_f64().ok_or_else(|| Error::InvalidModifier {
                    reason: format!("$inc on {} requires a numeric delta", field),
                })?;
                let current = value::get_dot_value(root, field).unwrap_or(Value::Number(0.0));
                let current = current.as_f64().ok_or_else(|| Error::InvalidModifier {
                    reason: format!("$inc on {} requires a numeric field", field),
                })?;
                value::set_dot_value(root, field, Value::Number(current + delta));
            }
        }
        "$min" => {
            for (field, candidate) in spec_fields(spec)? {
                match value::get_dot_value(root, field) {
                    None => value::set_dot_value(root, field, deep_copy(candidate)),
                    Some(current) if compare_things(candidate, &current) == Ordering::Less => {
                        value::set_dot_value(root, field, deep_copy(candidate));
                    }
                    _ => {}
                }
            }
        }
        "$max" => {
            for (field, candidate) in spec_fields(spec)? {
                match value::get_dot_value(root, field) {
                    None => value::set_dot_value(root, field, deep_copy(candidate)),
                    Some(current) if compare_things(candidate, &current) == Ordering::Greater => {
                        value::set_dot_value(root, field, deep_copy(candidate));
                    }
                    _ => {}
                }
            }
        }
        "$push" => {
            for (field, val) in spec_fields(spec)? {
                let mut items = array_field(root, field)?;
                items.push(deep_copy(val));
                value::set_dot_value(root, field, Value::Array(items));
            }
        }
        "$addToSet" => {
            for (field, val) in spec_fields(spec)? {
                let mut items = array_field(root, field)?;
                let already_present = items
                    .iter()
                    .any(|item| compare_things(item, val) == Ordering::Equal);
                if !already_present {
                    items.push(deep_copy(val));
                }
                value::set_dot_value(root, field, Value::Array(items));
            }
        }
        "$pop" => {
            for (field, dir) in spec_fields(spec)? {
                let mut items = array_field(root, field)?;
                let dir = dir.as_f64().unwrap_or(0.0);
                if dir > 0.0 {
                    items.pop();
                } else if dir < 0.0 && !items.is_empty() {
                    items.remove(0);
                }
                value::set_dot_value(root, field, Value::Array(items));
            }
        }
        "$pull" => {
            for (field, predicate) in spec_fields(spec)? {
                let items = array_field(root, field)?;
                let mut kept = Vec::with_capacity(items.len());
                for item in items {
                    let should_remove = match predicate {
                        Value::Object(m) if !m.is_empty() && m.keys().all(|k| k.starts_with('$'))
                        => matches_filter_value(&item, predicate).unwrap_or(false),
                        _ => compare_things(&item, predicate) == Ordering::Equal,
                    };
                    if !should_remove {
                        kept.push(item);
                    }
                }
                value::set_dot_value(root, field, Value::Array(kept));
            }
        }
        "$rename" => {
            for (field, new_name) in spec_fields(spec)? {
                let new_name = new_name.as_str().ok_or_else(|| Error::InvalidModifier {
                    reason: "$rename target must be a string".to_string(),
                })?;
                if let Some(current) = value::get_dot_value(root, field) {
                    value::unset_dot_value(root, field);
                    value::set_dot_value(root, new_name, current);
                }
            }
        }
        other => {
            return Err(Error::InvalidModifier {
                reason: format!("unhandled modifier {}", other),
            })
        }
    }
    Ok(())
}

fn array_field(root: &Value, field: &str) -> Result<Vec<Value>> {
    match value::get_dot_value(root, field) {
        None => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items),
        Some(_) => Err(Error::InvalidModifier {
            reason: format!("field {} is not an array", field),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn obj(pairs: &[(&str, Value)]) -> Value {
        let mut m = BTreeMap::new();
        for (k, v) in pairs {
            m.insert(k.to_string(), v.clone());
        }
        Value::Object(m)
    }

    fn doc(pairs: &[(&str, Value)]) -> Document {
        Document::from_value(obj(pairs)).unwrap()
    }

    #[test]
    fn raw_replacement_preserves_id() {
        let d = doc(&[("_id", Value::String("X".into())), ("a", Value::Number(1.0))]);
        let replacement = obj(&[("a", Value::Number(9.0))]);
        let out = modify(&d, &replacement).unwrap();
        assert_eq!(out.get("_id"), Some(&Value::String("X".into())));
        assert_eq!(out.get("a"), Some(&Value::Number(9.0)));
    }

    #[test]
    fn set_and_unset() {
        let d = doc(&[("a", Value::Number(1.0)), ("b", Value::Number(2.0))]);
        let update = obj(&[
            ("$set", obj(&[("a", Value::Number(5.0))])),
            ("$unset", obj(&[("b", Value::Bool(true))])),
        ]);
        let out = modify(&d, &update).unwrap();
        assert_eq!(out.get("a"), Some(&Value::Number(5.0)));
        assert_eq!(out.get("b"), None);
    }

    #[test]
    fn inc_requires_numeric_field() {
        let d = doc(&[("a", Value::String("x".into()))]);
        let update = obj(&[("$inc", obj(&[("a", Value::Number(1.0))]))]);
        assert!(modify(&d, &update).is_err());
    }

    #[test]
    fn mixing_modifier_and_raw_key_fails() {
        let d = doc(&[("a", Value::Number(1.0))]);
        let update = obj(&[("$set", obj(&[("a", Value::Number(2.0))])), ("b", Value::Number(3.0))]);
        assert!(modify(&d, &update).is_err());
    }

    #[test]
    fn push_and_add_to_set() {
        let d = doc(&[("tags", Value::Array(vec![Value::String("a".into())]))]);
        let update = obj(&[
            ("$push", obj(&[("tags", Value::String("b".into()))])),
        ]);
        let out = modify(&d, &update).unwrap();
        assert_eq!(
            out.get("tags"),
            Some(&Value::Array(vec![Value::String("a".into()), Value::String("b".into())]))
        );

        let update2 = obj(&[("$addToSet", obj(&[("tags", Value::String("a".into()))]))]);
        let out2 = modify(&out, &update2).unwrap();
        assert_eq!(
            out2.get("tags"),
            Some(&Value::Array(vec![Value::String("a".into()), Value::String("b".into())]))
        );
    }

    #[test]
    fn pop_and_pull() {
        let d = doc(&[(
            "xs",
            Value::Array(vec![Value::Number(1.0), Value::Number(2.0), Value::Number(3.0)]),
        )]);
        let update = obj(&[("$pop", obj(&[("xs", Value::Number(1.0))]))]);
        let out = modify(&d, &update).unwrap();
        assert_eq!(
            out.get("xs"),
            Some(&Value::Array(vec![Value::Number(1.0), Value::Number(2.0)]))
        );

        let update2 = obj(&[("$pull", obj(&[("xs", Value::Number(1.0))]))]);
        let out2 = modify(&out, &update2).unwrap();
        assert_eq!(out2.get("xs"), Some(&Value::Array(vec![Value::Number(2.0)])));
    }

    #[test]
    fn rename_moves_value() {
        let d = doc(&[("old", Value::Number(7.0))]);
        let update = obj(&[("$rename", obj(&[("old", Value::String("new".into()))]))]);
        let out = modify(&d, &update).unwrap();
        assert_eq!(out.get("old"), None);
        assert_eq!(out.get("new"), Some(&Value::Number(7.0)));
    }
}
