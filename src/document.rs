//! Documents: the mapping of field name to `Value` that the store persists,
//! plus the opaque 16-character primary key used to identify them.

use std::collections::BTreeMap;

use chrono::Utc;
use rand::Rng;

use crate::value::{self, Value};

/// Primary key type. 16 opaque ASCII characters, unique within a store.
pub type DocumentId = String;

const ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const ID_LEN: usize = 16;

/// Generates a fresh random 16-character id. Callers are expected to retry
/// against the `_id` index until the candidate is free; collisions are
/// astronomically unlikely (62^16 keyspace) so one draw almost always
/// suffices.
pub fn generate_id() -> DocumentId {
    let mut rng = rand::thread_rng();
    (0..ID_LEN)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect()
}

/// A document: an ordered field mapping that always carries `_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    fields: BTreeMap<String, Value>,
}

impl Document {
    /// Wraps a field mapping as a document. Does not assign `_id`; callers
    /// inserting fresh documents must do so via `DataStore::insert`.
    pub fn from_fields(fields: BTreeMap<String, Value>) -> Self {
        Document { fields }
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    pub fn into_fields(self) -> BTreeMap<String, Value> {
        self.fields
    }

    pub fn as_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    pub fn from_value(v: Value) -> Option<Self> {
        match v {
            Value::Object(map) => Some(Document { fields: map }),
            _ => None,
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self.fields.get("_id") {
            Some(Value::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn set_id(&mut self, id: DocumentId) {
        self.fields.insert("_id".to_string(), Value::String(id));
    }

    /// Sets a top-level field directly, bypassing dotted-path traversal.
    /// Used to re-pin `_id`/`createdAt` after `modify` so that mutators can
    /// never change them.
    pub fn set(&mut self, field: &str, value: Value) {
        self.fields.insert(field.to_string(), value);
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Dotted-path lookup with array fan-out, per `value::get_dot_value`.
    pub fn get_dot(&self, path: &str) -> Option<Value> {
        if let Some((head, rest)) = path.split_once('.') {
            let head_value = self.fields.get(head)?;
            value::get_dot_value(head_value, rest)
        } else {
            self.fields.get(path).cloned()
        }
    }

    pub fn set_created_at(&mut self, when: chrono::DateTime<Utc>) {
        self.fields
            .entry("createdAt".to_string())
            .or_insert(Value::Timestamp(when));
    }

    pub fn set_updated_at(&mut self, when: chrono::DateTime<Utc>) {
        self.fields.insert("updatedAt".to_string(), Value::Timestamp(when));
    }

    pub fn deep_copy(&self) -> Self {
        Document {
            fields: self.fields.clone(),
        }
    }
}
