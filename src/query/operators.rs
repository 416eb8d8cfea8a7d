//! Field-level query operators. `EqOperator`/`NeOperator` are implemented as
//! small `OperatorMatcher` strategy objects; the remaining operators are
//! dispatched directly from `matches_field` since each is a short,
//! self-contained comparison and a full registry would only add
//! indirection.

use std::cmp::Ordering;
use std::sync::Mutex;

use lazy_static::lazy_static;
use lru::LruCache;
use regex::Regex;

use crate::error::{Error, Result};
use crate::value::{compare_things, Value};

const REGEX_CACHE_CAPACITY: usize = 100;

lazy_static! {
    static ref REGEX_CACHE: Mutex<LruCache<String, Regex>> =
        Mutex::new(LruCache::new(std::num::NonZeroUsize::new(REGEX_CACHE_CAPACITY).unwrap()));
}

/// A field-level predicate, e.g. `$eq`/`$ne`. Receives the candidate's value
/// at the field (already fanned out through arrays where applicable) and the
/// filter's spec for that operator.
pub trait OperatorMatcher {
    fn name(&self) -> &'static str;
    fn matches(&self, doc_value: Option<&Value>, filter_value: &Value) -> Result<bool>;
}

pub struct EqOperator;

impl OperatorMatcher for EqOperator {
    fn name(&self) -> &'static str {
        "$eq"
    }

    fn matches(&self, doc_value: Option<&Value>, filter_value: &Value) -> Result<bool> {
        Ok(match doc_value {
            Some(Value::Array(items)) => items
                .iter()
                .any(|item| compare_things(item, filter_value) == Ordering::Equal),
            Some(v) => compare_things(v, filter_value) == Ordering::Equal,
            None => matches!(filter_value, Value::Null),
        })
    }
}

pub struct NeOperator;

impl OperatorMatcher for NeOperator {
    fn name(&self) -> &'static str {
        "$ne"
    }

    fn matches(&self, doc_value: Option<&Value>, filter_value: &Value) -> Result<bool> {
        Ok(!EqOperator.matches(doc_value, filter_value)?)
    }
}

fn compiled_regex(pattern: &str) -> Result<Regex> {
    let mut cache = REGEX_CACHE.lock().expect("regex cache poisoned");
    if let Some(re) = cache.get(pattern) {
        return Ok(re.clone());
    }
    let re = Regex::new(pattern).map_err(|e| Error::InvalidModifier {
        reason: format!("bad $regex pattern '{}': {}", pattern, e),
    })?;
    cache.put(pattern.to_string(), re.clone());
    Ok(re)
}

fn order_matches(doc_value: Option<&Value>, filter_value: &Value, allowed: &[Ordering]) -> bool {
    match doc_value {
        Some(Value::Array(items)) => items
            .iter()
            .any(|item| allowed.contains(&compare_things(item, filter_value))),
        Some(v) => allowed.contains(&compare_things(v, filter_value)),
        None => false,
    }
}

/// Evaluates one operator (`$lt`, `$in`, `$exists`, ...) against a field's
/// fanned-out value. `doc_value` is `None` when the field is absent.
pub fn matches_field(
    operator: &str,
    doc_value: Option<&Value>,
    filter_value: &Value,
) -> Result<bool> {
    match operator {
        "$eq" => EqOperator.matches(doc_value, filter_value),
        "$ne" => NeOperator.matches(doc_value, filter_value),
        "$lt" => Ok(order_matches(doc_value, filter_value, &[Ordering::Less])),
        "$lte" => Ok(order_matches(
            doc_value,
            filter_value,
            &[Ordering::Less, Ordering::Equal],
        )),
        "$gt" => Ok(order_matches(doc_value, filter_value, &[Ordering::Greater])),
        "$gte" => Ok(order_matches(
            doc_value,
            filter_value,
            &[Ordering::Greater, Ordering::Equal],
        )),
        "$in" => {
            let options = filter_value.as_array().ok_or_else(|| Error::InvalidModifier {
                reason: "$in requires an array".to_string(),
            })?;
            Ok(options
                .iter()
                .any(|opt| EqOperator.matches(doc_value, opt).unwrap_or(false)))
        }
        "$nin" => {
            let options = filter_value.as_array().ok_or_else(|| Error::InvalidModifier {
                reason: "$nin requires an array".to_string(),
            })?;
            Ok(!options
                .iter()
                .any(|opt| EqOperator.matches(doc_value, opt).unwrap_or(false)))
        }
        "$exists" => {
            let want = matches!(filter_value, Value::Bool(true));
            Ok(doc_value.is_some() == want)
        }
        "$regex" => {
            let pattern = filter_value.as_str().ok_or_else(|| Error::InvalidModifier {
                reason: "$regex requires a string pattern".to_string(),
            })?;
            let re = compiled_regex(pattern)?;
            Ok(match doc_value {
                Some(Value::String(s)) => re.is_match(s),
                Some(Value::Array(items)) => items
                    .iter()
                    .any(|item| matches!(item, Value::String(s) if re.is_match(s))),
                _ => false,
            })
        }
        "$size" => {
            let want = filter_value.as_f64().ok_or_else(|| Error::InvalidModifier {
                reason: "$size requires a number".to_string(),
            })? as usize;
            Ok(matches!(doc_value, Some(Value::Array(items)) if items.len() == want))
        }
        "$elemMatch" => Ok(match doc_value {
            Some(Value::Array(items)) => items
                .iter()
                .any(|item| crate::query::matches_filter_value(item, filter_value).unwrap_or(false)),
            _ => false,
        }),
        other => Err(Error::UnknownOperator {
            operator: other.to_string(),
        }),
    }
}
