//! Cursor: a lazy query plan — candidate selection, match, sort, skip/limit,
//! then projection — executed as a single task on the store's executor so
//! that sort and projection never observe a mid-mutation index state.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::document::Document;
use crate::error::{Error, Result};
use crate::query;
use crate::store::DataStore;
use crate::value::{self, compare_things_with, Value};

/// The result of executing a cursor: the projected documents plus the
/// number of documents that matched the query before skip/limit were
/// applied.
#[derive(Debug, Clone)]
pub struct CursorResult {
    pub docs: Vec<Document>,
    pub total_count: usize,
}

/// A lazy query plan bound to a `DataStore` handle. Building a cursor
/// (`sort`/`skip`/`limit`/`project`) does no work; only `exec` touches the
/// store.
pub struct Cursor {
    store: DataStore,
    query: Value,
    projection: Option<Value>,
    sort: Vec<(String, i32)>,
    skip_n: usize,
    limit_n: Option<usize>,
}

impl Cursor {
    pub(crate) fn new(store: DataStore, query: Value) -> Self {
        Cursor {
            store,
            query,
            projection: None,
            sort: Vec::new(),
            skip_n: 0,
            limit_n: None,
        }
    }

    /// Adds a sort key. Multiple calls compose in declaration order;
    /// `direction` positive for ascending, negative for descending.
    pub fn sort(mut self, field: impl Into<String>, direction: i32) -> Self {
        self.sort.push((field.into(), direction));
        self
    }

    pub fn skip(mut self, n: usize) -> Self {
        self.skip_n = n;
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit_n = Some(n);
        self
    }

    /// Sets a `{field: 0|1}` projection. See `project_document` for the
    /// inclusion/exclusion rules.
    pub fn project(mut self, projection: Value) -> Self {
        self.projection = Some(projection);
        self
    }

    /// Executes the plan: candidate selection and TTL eviction happen as a
    /// single task on the store's executor (via `get_candidates`), so the
    /// snapshot this cursor sorts and projects is never mid-mutation; the
    /// sort/skip/limit/project steps then run locally over that snapshot.
    pub fn exec(self) -> Result<CursorResult> {
        let candidates = self.store.get_candidates(&self.query, false)?;

        let mut matched = Vec::with_capacity(candidates.len());
        for doc in candidates {
            if query::matches_filter(&doc, &self.query)? {
                matched.push(doc);
            }
        }
        let total_count = matched.len();

        if !self.sort.is_empty() {
            let comparator = self.store.string_comparator();
            let cmp_ref: Option<&(dyn Fn(&str, &str) -> Ordering)> =
                comparator.as_deref().map(|f| f as &dyn Fn(&str, &str) -> Ordering);
            matched.sort_by(|a, b| compare_by_sort(a, b, &self.sort, cmp_ref));
        }

        let limited: Vec<Document> = matched
            .into_iter()
            .skip(self.skip_n)
            .take(self.limit_n.unwrap_or(usize::MAX))
            .collect();

        let docs = match &self.projection {
            Some(projection) => limited
                .iter()
                .map(|doc| project_document(doc, projection))
                .collect::<Result<Vec<_>>>()?,
            None => limited,
        };

        Ok(CursorResult { docs, total_count })
    }
}

fn compare_by_sort(
    a: &Document,
    b: &Document,
    sort: &[(String, i32)],
    compare_strings: Option<&dyn Fn(&str, &str) -> Ordering>,
) -> Ordering {
    for (field, direction) in sort {
        let av = a.get_dot(field).unwrap_or(Value::Null);
        let bv = b.get_dot(field).unwrap_or(Value::Null);
        let ord = compare_things_with(&av, &bv, compare_strings);
        let ord = if *direction < 0 { ord.reverse() } else { ord };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn is_truthy(v: &Value) -> bool {
    matches!(v, Value::Bool(true)) || matches!(v, Value::Number(n) if *n != 0.0)
}

/// Applies a `{field: 0|1}` projection to `doc`. Mixing inclusion (`1`) and
/// exclusion (`0`) is illegal except for `_id`, which may always be
/// excluded from either form.
pub(crate) fn project_document(doc: &Document, projection: &Value) -> Result<Document> {
    let map = projection.as_object().ok_or_else(|| Error::MixedProjection {
        reason: "projection must be an object of field -> 0|1".to_string(),
    })?;

    let mut saw_include = false;
    let mut saw_exclude = false;
    let mut id_excluded = false;
    for (field, spec) in map {
        if field == "_id" {
            if !is_truthy(spec) {
                id_excluded = true;
            }
            continue;
        }
        if is_truthy(spec) {
            saw_include = true;
        } else {
            saw_exclude = true;
        }
    }
    if saw_include && saw_exclude {
        return Err(Error::MixedProjection {
            reason: "projection mixes inclusion (1) and exclusion (0) on non-_id fields".to_string(),
        });
    }

    if saw_include {
        let mut root = Value::Object(BTreeMap::new());
        for (field, spec) in map {
            if field == "_id" || !is_truthy(spec) {
                continue;
            }
            if let Some(val) = doc.get_dot(field) {
                value::set_dot_value(&mut root, field, val);
            }
        }
        if !id_excluded {
            if let Some(id) = doc.get("_id").cloned() {
                value::set_dot_value(&mut root, "_id", id);
            }
        }
        Ok(Document::from_value(root).expect("projection root is always an object"))
    } else {
        let mut fields = doc.fields().clone();
        for (field, spec) in map {
            if !is_truthy(spec) {
                fields.remove(field);
            }
        }
        Ok(Document::from_fields(fields))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap as Map;

    fn doc(pairs: &[(&str, Value)]) -> Document {
        let mut m = Map::new();
        for (k, v) in pairs {
            m.insert(k.to_string(), v.clone());
        }
        Document::from_fields(m)
    }

    fn obj(pairs: &[(&str, Value)]) -> Value {
        let mut m = Map::new();
        for (k, v) in pairs {
            m.insert(k.to_string(), v.clone());
        }
        Value::Object(m)
    }

    #[test]
    fn inclusion_projection_keeps_id_by_default() {
        let d = doc(&[
            ("_id", Value::String("X".into())),
            ("a", Value::Number(1.0)),
            ("b", Value::Number(2.0)),
        ]);
        let projected = project_document(&d, &obj(&[("a", Value::Number(1.0))])).unwrap();
        assert_eq!(projected.get("a"), Some(&Value::Number(1.0)));
        assert_eq!(projected.get("b"), None);
        assert_eq!(projected.get("_id"), Some(&Value::String("X".into())));
    }

    #[test]
    fn exclusion_projection_drops_listed_fields() {
        let d = doc(&[
            ("_id", Value::String("X".into())),
            ("a", Value::Number(1.0)),
            ("b", Value::Number(2.0)),
        ]);
        let projected = project_document(&d, &obj(&[("a", Value::Number(0.0))])).unwrap();
        assert_eq!(projected.get("a"), None);
        assert_eq!(projected.get("b"), Some(&Value::Number(2.0)));
        assert_eq!(projected.get("_id"), Some(&Value::String("X".into())));
    }

    #[test]
    fn mixed_projection_is_rejected() {
        let d = doc(&[("a", Value::Number(1.0)), ("b", Value::Number(2.0))]);
        let err = project_document(
            &d,
            &obj(&[("a", Value::Number(1.0)), ("b", Value::Number(0.0))]),
        );
        assert!(err.is_err());
    }

    #[test]
    fn id_can_always_be_excluded() {
        let d = doc(&[("_id", Value::String("X".into())), ("a", Value::Number(1.0))]);
        let projected = project_document(
            &d,
            &obj(&[("a", Value::Number(1.0)), ("_id", Value::Number(0.0))]),
        )
        .unwrap();
        assert_eq!(projected.get("_id"), None);
    }
}
