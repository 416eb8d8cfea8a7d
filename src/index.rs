//! Secondary indexes: each wraps the standard library's `BTreeMap` as an
//! ordered multimap, adding unique/sparse enforcement, array fan-out, and
//! TTL metadata on top.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::ops::Bound;

use serde::{Deserialize, Serialize};

use crate::document::{Document, DocumentId};
use crate::error::{Error, Result};
use crate::value::{self, compare_things, Value};

/// A totally-ordered wrapper around `Value` so it can key a `BTreeMap`.
/// Ordering is `compare_things`, which is already total over the value
/// model (unlike `PartialOrd` on raw floats).
#[derive(Debug, Clone)]
struct IndexKey(Value);

impl PartialEq for IndexKey {
    fn eq(&self, other: &Self) -> bool {
        compare_things(&self.0, &other.0) == Ordering::Equal
    }
}
impl Eq for IndexKey {}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_things(&self.0, &other.0)
    }
}

/// An index's declared shape, as carried in `$$indexCreated` log records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDeclaration {
    pub field_name: String,
    pub unique: bool,
    pub sparse: bool,
    pub expire_after_seconds: Option<i64>,
}

impl IndexDeclaration {
    pub fn new(field_name: impl Into<String>) -> Self {
        IndexDeclaration {
            field_name: field_name.into(),
            unique: false,
            sparse: false,
            expire_after_seconds: None,
        }
    }

    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    pub fn sparse(mut self, sparse: bool) -> Self {
        self.sparse = sparse;
        self
    }

    pub fn expire_after_seconds(mut self, seconds: i64) -> Self {
        self.expire_after_seconds = Some(seconds);
        self
    }
}

/// A range sub-query over `$lt`/`$lte`/`$gt`/`$gte`, used by
/// `Index::get_between_bounds`.
#[derive(Debug, Default, Clone)]
pub struct RangeQuery {
    pub lt: Option<Value>,
    pub lte: Option<Value>,
    pub gt: Option<Value>,
    pub gte: Option<Value>,
}

impl RangeQuery {
    pub fn from_value(v: &Value) -> Option<Self> {
        let map = v.as_object()?;
        let mut range = RangeQuery::default();
        let mut any = false;
        if let Some(x) = map.get("$lt") {
            range.lt = Some(x.clone());
            any = true;
        }
        if let Some(x) = map.get("$lte") {
            range.lte = Some(x.clone());
            any = true;
        }
        if let Some(x) = map.get("$gt") {
            range.gt = Some(x.clone());
            any = true;
        }
        if let Some(x) = map.get("$gte") {
            range.gte = Some(x.clone());
            any = true;
        }
        if any {
            Some(range)
        } else {
            None
        }
    }
}

/// An index: an ordered multimap from key to the document ids holding that
/// key, plus the declaration it was created from.
pub struct Index {
    declaration: IndexDeclaration,
    tree: BTreeMap<IndexKey, Vec<DocumentId>>,
}

impl Index {
    pub fn new(declaration: IndexDeclaration) -> Self {
        Index {
            declaration,
            tree: BTreeMap::new(),
        }
    }

    pub fn declaration(&self) -> &IndexDeclaration {
        &self.declaration
    }

    fn extract_keys(&self, doc: &Document) -> Result<Option<Vec<Value>>> {
        let target = doc.as_value();
        let found = value::get_dot_value(&target, &self.declaration.field_name);
        match found {
            None => {
                if self.declaration.sparse {
                    Ok(None)
                } else {
                    Ok(Some(vec![Value::Null]))
                }
            }
            Some(Value::Object(_)) => Err(Error::InvalidIndexField {
                field: self.declaration.field_name.clone(),
            }),
            Some(Value::Array(items)) => {
                let mut out: Vec<Value> = Vec::new();
                for item in items {
                    let dup = out.iter().any(|existing| compare_things(existing, &item) == Ordering::Equal
                        && same_type(existing, &item));
                    if !dup {
                        out.push(item);
                    }
                }
                Ok(Some(out))
            }
            Some(v) => Ok(Some(vec![v])),
        }
    }

    fn key_display(key: &Value) -> String {
        value::serialize(key)
    }

    fn remove_key(&mut self, key: &Value, id: &DocumentId) {
        let ik = IndexKey(key.clone());
        if let Some(ids) = self.tree.get_mut(&ik) {
            ids.retain(|existing| existing != id);
            if ids.is_empty() {
                self.tree.remove(&ik);
            }
        }
    }

    /// Inserts a document's key(s). On a unique violation, rolls back the
    /// element insertions already performed for this document and fails.
    pub fn insert(&mut self, doc: &Document) -> Result<()> {
        let id = doc.id().ok_or_else(|| Error::InvalidKey {
            reason: "document has no _id".to_string(),
        })?.to_string();
        let keys = match self.extract_keys(doc)? {
            Some(k) => k,
            None => return Ok(()),
        };
        let mut inserted: Vec<Value> = Vec::new();
        for key in &keys {
            let ik = IndexKey(key.clone());
            if self.declaration.unique {
                if let Some(existing) = self.tree.get(&ik) {
                    if !existing.is_empty() && existing.iter().any(|e| e != &id) {
                        for done in &inserted {
                            self.remove_key(done, &id);
                        }
                        return Err(Error::UniqueViolated {
                            field: self.declaration.field_name.clone(),
                            key: Self::key_display(key),
                        });
                    }
                }
            }
            self.tree.entry(ik).or_default().push(id.clone());
            inserted.push(key.clone());
        }
        Ok(())
    }

    /// Removes a document's key(s). Never fails.
    pub fn remove(&mut self, doc: &Document) {
        let id = match doc.id() {
            Some(id) => id.to_string(),
            None => return,
        };
        let keys = match self.extract_keys(doc).unwrap_or(None) {
            Some(k) => k,
            None => return,
        };
        for key in &keys {
            self.remove_key(key, &id);
        }
    }

    /// Removes `old_doc`'s key(s) and inserts `new_doc`'s. On failure,
    /// reinserts `old_doc` and propagates the error.
    pub fn update(&mut self, old_doc: &Document, new_doc: &Document) -> Result<()> {
        self.remove(old_doc);
        if let Err(e) = self.insert(new_doc) {
            // old_doc must come back so the index matches its pre-call state
            let _ = self.insert(old_doc);
            return Err(e);
        }
        Ok(())
    }

    /// Bulk insert; on failure at position `i`, reverts positions `0..i`
    /// leaving the index in its pre-call state.
    pub fn insert_all(&mut self, docs: &[Document]) -> Result<()> {
        let mut done: Vec<&Document> = Vec::new();
        for doc in docs {
            if let Err(e) = self.insert(doc) {
                for d in done.iter().rev() {
                    self.remove(d);
                }
                return Err(e);
            }
            done.push(doc);
        }
        Ok(())
    }

    pub fn get_matching(&self, value: &Value) -> Vec<DocumentId> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut collect = |v: &Value, out: &mut Vec<DocumentId>, seen: &mut HashSet<DocumentId>| {
            if let Some(ids) = self.tree.get(&IndexKey(v.clone())) {
                for id in ids {
                    if seen.insert(id.clone()) {
                        out.push(id.clone());
                    }
                }
            }
        };
        match value {
            Value::Array(items) => {
                for item in items {
                    collect(item, &mut out, &mut seen);
                }
            }
            other => collect(other, &mut out, &mut seen),
        }
        out
    }

    pub fn get_between_bounds(&self, range: &RangeQuery) -> Vec<DocumentId> {
        let lower = match (&range.gt, &range.gte) {
            (Some(v), _) => Bound::Excluded(IndexKey(v.clone())),
            (None, Some(v)) => Bound::Included(IndexKey(v.clone())),
            (None, None) => Bound::Unbounded,
        };
        let upper = match (&range.lt, &range.lte) {
            (Some(v), _) => Bound::Excluded(IndexKey(v.clone())),
            (None, Some(v)) => Bound::Included(IndexKey(v.clone())),
            (None, None) => Bound::Unbounded,
        };
        let mut out = Vec::new();
        for (_, ids) in self.tree.range((lower, upper)) {
            out.extend(ids.iter().cloned());
        }
        out
    }

    pub fn get_all(&self) -> Vec<DocumentId> {
        self.tree.values().flatten().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tree.values().map(|v| v.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Drops the tree and, if `new_data` is given, atomically bulk-loads it:
    /// on failure the index ends up empty, never partially populated.
    pub fn reset(&mut self, new_data: Option<&[Document]>) -> Result<()> {
        self.tree.clear();
        if let Some(docs) = new_data {
            if let Err(e) = self.insert_all(docs) {
                self.tree.clear();
                return Err(e);
            }
        }
        Ok(())
    }
}

fn same_type(a: &Value, b: &Value) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap as Map;

    fn doc(id: &str, field: &str, v: Value) -> Document {
        let mut m = Map::new();
        m.insert("_id".to_string(), Value::String(id.to_string()));
        m.insert(field.to_string(), v);
        Document::from_fields(m)
    }

    #[test]
    fn unique_insert_rolls_back_on_violation() {
        let mut idx = Index::new(IndexDeclaration::new("k").unique(true));
        idx.insert(&doc("1", "k", Value::Number(1.0))).unwrap();
        let err = idx.insert(&doc("2", "k", Value::Number(1.0)));
        assert!(err.is_err());
        assert_eq!(idx.get_matching(&Value::Number(1.0)), vec!["1".to_string()]);
    }

    #[test]
    fn sparse_index_skips_missing_field() {
        let mut idx = Index::new(IndexDeclaration::new("k").sparse(true));
        let mut m = Map::new();
        m.insert("_id".to_string(), Value::String("1".to_string()));
        idx.insert(&Document::from_fields(m)).unwrap();
        assert_eq!(idx.len(), 0);
    }

    #[test]
    fn object_valued_field_is_rejected_as_an_index_key() {
        let mut idx = Index::new(IndexDeclaration::new("k"));
        let mut inner = Map::new();
        inner.insert("nested".to_string(), Value::Number(1.0));
        let err = idx.insert(&doc("1", "k", Value::Object(inner)));
        assert!(matches!(err, Err(Error::InvalidIndexField { .. })));
        assert_eq!(idx.len(), 0);
    }

    #[test]
    fn array_valued_field_indexes_each_distinct_element() {
        let mut idx = Index::new(IndexDeclaration::new("tags"));
        let doc1 = doc(
            "1",
            "tags",
            Value::Array(vec![Value::String("a".into()), Value::String("b".into())]),
        );
        idx.insert(&doc1).unwrap();
        assert_eq!(idx.get_matching(&Value::String("a".into())), vec!["1".to_string()]);
        assert_eq!(idx.get_matching(&Value::String("b".into())), vec!["1".to_string()]);
    }

    #[test]
    fn number_and_string_keys_do_not_collide() {
        let mut idx = Index::new(IndexDeclaration::new("k"));
        idx.insert(&doc("1", "k", Value::Number(1.0))).unwrap();
        idx.insert(&doc("2", "k", Value::String("1".into()))).unwrap();
        assert_eq!(idx.get_matching(&Value::Number(1.0)), vec!["1".to_string()]);
        assert_eq!(idx.get_matching(&Value::String("1".into())), vec!["2".to_string()]);
    }

    #[test]
    fn range_scan_returns_ascending_order() {
        let mut idx = Index::new(IndexDeclaration::new("n"));
        for (id, n) in [("a", 3.0), ("b", 1.0), ("c", 2.0)] {
            idx.insert(&doc(id, "n", Value::Number(n))).unwrap();
        }
        let range = RangeQuery {
            gte: Some(Value::Number(1.0)),
            lte: Some(Value::Number(2.0)),
            ..Default::default()
        };
        assert_eq!(idx.get_between_bounds(&range), vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn update_reinserts_old_on_failure() {
        let mut idx = Index::new(IndexDeclaration::new("k").unique(true));
        idx.insert(&doc("1", "k", Value::Number(1.0))).unwrap();
        idx.insert(&doc("2", "k", Value::Number(2.0))).unwrap();
        let old = doc("2", "k", Value::Number(2.0));
        let new = doc("2", "k", Value::Number(1.0));
        assert!(idx.update(&old, &new).is_err());
        assert_eq!(idx.get_matching(&Value::Number(2.0)), vec!["2".to_string()]);
    }

    #[test]
    fn reset_with_conflicting_data_leaves_index_empty() {
        let mut idx = Index::new(IndexDeclaration::new("k").unique(true));
        let docs = vec![
            doc("1", "k", Value::Number(1.0)),
            doc("2", "k", Value::Number(1.0)),
        ];
        assert!(idx.reset(Some(&docs)).is_err());
        assert!(idx.is_empty());
    }
}
