//! Query matching: evaluates a parsed filter mapping against a document.
//!
//! The filter grammar (see module docs in `crate::value` for the value
//! model) is a mapping of `field -> spec`, where a bare value spec tests
//! equality and an operator mapping tests one or more `$`-prefixed field
//! operators conjunctively. `$and`/`$or`/`$not` combine whole clauses at the
//! top level.

pub mod operators;

use crate::document::Document;
use crate::error::{Error, Result};
use crate::value::{self, Value};

/// Evaluates `query` against a document.
pub fn matches_filter(doc: &Document, query: &Value) -> Result<bool> {
    matches_filter_value(&doc.as_value(), query)
}

/// Evaluates `query` against an arbitrary value (a document body, or an
/// array element reached through `$elemMatch`).
pub fn matches_filter_value(target: &Value, query: &Value) -> Result<bool> {
    let map = match query {
        Value::Object(m) => m,
        _ => {
            return Err(Error::InvalidModifier {
                reason: "query must be an object".to_string(),
            })
        }
    };

    for (key, spec) in map {
        let clause_matches = if key == "$and" {
            let clauses = as_clause_array(spec, "$and")?;
            let mut all = true;
            for clause in clauses {
                if !matches_filter_value(target, clause)? {
                    all = false;
                    break;
                }
            }
            all
        } else if key == "$or" {
            let clauses = as_clause_array(spec, "$or")?;
            let mut any = false;
            for clause in clauses {
                if matches_filter_value(target, clause)? {
                    any = true;
                    break;
                }
            }
            any
        } else if key == "$not" {
            !matches_filter_value(target, spec)?
        } else if key == "$where" {
            return Err(Error::UnknownOperator {
                operator: "$where".to_string(),
            });
        } else if key.starts_with('$') {
            return Err(Error::UnknownOperator { operator: key.clone() });
        } else {
            let doc_value = value::get_dot_value(target, key);
            match_field_spec(doc_value.as_ref(), spec)?
        };

        if !clause_matches {
            return Ok(false);
        }
    }
    Ok(true)
}

fn as_clause_array<'a>(v: &'a Value, op: &str) -> Result<&'a [Value]> {
    v.as_array().ok_or_else(|| Error::InvalidModifier {
        reason: format!("{} requires an array of clauses", op),
    })
}

fn match_field_spec(doc_value: Option<&Value>, spec: &Value) -> Result<bool> {
    match spec {
        Value::Object(m) if !m.is_empty() && m.keys().all(|k| k.starts_with('$')) => {
            for (op, opv) in m {
                if !operators::matches_field(op, doc_value, opv)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        _ => operators::matches_field("$eq", doc_value, spec),
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
        let mut m = BTreeMap::new();
        for (k, v) in pairs {
            m.insert(k.to_string(), v.clone());
        }
        Document::from_fields(m)
    }

    #[test]
    fn bare_value_spec_tests_equality() {
        let d = doc(&[("artist", Value::String("Hendrix".into()))]);
        let q = obj(&[("artist", Value::String("Hendrix".into()))]);
        assert!(matches_filter(&d, &q).unwrap());
        let q2 = obj(&[("artist", Value::String("Zeppelin".into()))]);
        assert!(!matches_filter(&d, &q2).unwrap());
    }

    #[test]
    fn regex_operator_matches_substring() {
        let d = doc(&[("title", Value::String("Hey Joe".into()))]);
        let q = obj(&[(
            "title",
            obj(&[("$regex", Value::String("Hey".into()))]),
        )]);
        assert!(matches_filter(&d, &q).unwrap());
    }

    #[test]
    fn and_or_combine_clauses() {
        let d = doc(&[("a", Value::Number(1.0)), ("b", Value::Number(2.0))]);
        let and_q = obj(&[(
            "$and",
            Value::Array(vec![
                obj(&[("a", Value::Number(1.0))]),
                obj(&[("b", Value::Number(2.0))]),
            ]),
        )]);
        assert!(matches_filter(&d, &and_q).unwrap());

        let or_q = obj(&[(
            "$or",
            Value::Array(vec![
                obj(&[("a", Value::Number(99.0))]),
                obj(&[("b", Value::Number(2.0))]),
            ]),
        )]);
        assert!(matches_filter(&d, &or_q).unwrap());
    }

    #[test]
    fn gte_lt_range_composes_on_one_field() {
        let d = doc(&[("age", Value::Number(30.0))]);
        let q = obj(&[(
            "age",
            obj(&[
                ("$gte", Value::Number(18.0)),
                ("$lt", Value::Number(65.0)),
            ]),
        )]);
        assert!(matches_filter(&d, &q).unwrap());
    }

    #[test]
    fn in_operator_matches_any_listed_value() {
        let d = doc(&[("k", Value::Number(2.0))]);
        let q = obj(&[(
            "k",
            obj(&[(
                "$in",
                Value::Array(vec![Value::Number(1.0), Value::Number(2.0)]),
            )]),
        )]);
        assert!(matches_filter(&d, &q).unwrap());
    }

    #[test]
    fn exists_operator_checks_field_presence() {
        let d = doc(&[("a", Value::Number(1.0))]);
        let q = obj(&[("missing", obj(&[("$exists", Value::Bool(true))]))]);
        assert!(!matches_filter(&d, &q).unwrap());
    }

    #[test]
    fn elem_match_recurses_into_array_elements() {
        let d = doc(&[(
            "items",
            Value::Array(vec![
                {
                    let mut m = BTreeMap::new();
                    m.insert("n".to_string(), Value::Number(5.0));
                    Value::Object(m)
                },
                {
                    let mut m = BTreeMap::new();
                    m.insert("n".to_string(), Value::Number(1.0));
                    Value::Object(m)
                },
            ]),
        )]);
        let q = obj(&[(
            "items",
            obj(&[(
                "$elemMatch",
                obj(&[("n", obj(&[("$gt", Value::Number(4.0))]))]),
            )]),
        )]);
        assert!(matches_filter(&d, &q).unwrap());
    }

    #[test]
    fn unknown_top_level_operator_errors() {
        let d = doc(&[("a", Value::Number(1.0))]);
        let q = obj(&[("$bogus", Value::Null)]);
        assert!(matches_filter(&d, &q).is_err());
    }

    #[test]
    fn nested_dotted_path_matches() {
        let mut inner = BTreeMap::new();
        inner.insert("city".to_string(), Value::String("NYC".into()));
        let d = doc(&[("address", Value::Object(inner))]);
        let q = obj(&[("address.city", Value::String("NYC".into()))]);
        assert!(matches_filter(&d, &q).unwrap());
    }
}
