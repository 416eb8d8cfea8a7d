//! Persistence: encodes in-memory state as log records, replays the log on
//! load, and drives compaction.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::document::{Document, DocumentId};
use crate::error::{Error, Result};
use crate::index::IndexDeclaration;
use crate::storage;
use crate::value::{self, Value};

pub type SerializationHook = Arc<dyn Fn(&str) -> String + Send + Sync>;

pub const DEFAULT_CORRUPT_ALERT_THRESHOLD: f64 = 0.1;

/// One parsed log line.
#[derive(Debug, Clone, PartialEq)]
pub enum LogRecord {
    Document(Document),
    Deleted { id: DocumentId },
    IndexCreated(IndexDeclaration),
    IndexRemoved { field_name: String },
}

impl LogRecord {
    pub fn to_value(&self) -> Value {
        match self {
            LogRecord::Document(doc) => doc.as_value(),
            LogRecord::Deleted { id } => {
                let mut m = std::collections::BTreeMap::new();
                m.insert("$$deleted".to_string(), Value::Bool(true));
                m.insert("_id".to_string(), Value::String(id.clone()));
                Value::Object(m)
            }
            LogRecord::IndexCreated(decl) => {
                let mut inner = std::collections::BTreeMap::new();
                inner.insert("fieldName".to_string(), Value::String(decl.field_name.clone()));
                inner.insert("unique".to_string(), Value::Bool(decl.unique));
                inner.insert("sparse".to_string(), Value::Bool(decl.sparse));
                if let Some(secs) = decl.expire_after_seconds {
                    inner.insert("expireAfterSeconds".to_string(), Value::Number(secs as f64));
                }
                let mut m = std::collections::BTreeMap::new();
                m.insert("$$indexCreated".to_string(), Value::Object(inner));
                Value::Object(m)
            }
            LogRecord::IndexRemoved { field_name } => {
                let mut m = std::collections::BTreeMap::new();
                m.insert("$$indexRemoved".to_string(), Value::String(field_name.clone()));
                Value::Object(m)
            }
        }
    }

    pub fn from_value(v: &Value) -> Option<LogRecord> {
        if let Some(map) = v.as_object() {
            if matches!(map.get("$$deleted"), Some(Value::Bool(true))) {
                if let Some(Value::String(id)) = map.get("_id") {
                    return Some(LogRecord::Deleted { id: id.clone() });
                }
                return None;
            }
            if let Some(decl_value) = map.get("$$indexCreated") {
                let decl_map = decl_value.as_object()?;
                let field_name = decl_map.get("fieldName")?.as_str()?.to_string();
                let unique = matches!(decl_map.get("unique"), Some(Value::Bool(true)));
                let sparse = matches!(decl_map.get("sparse"), Some(Value::Bool(true)));
                let expire_after_seconds = decl_map
                    .get("expireAfterSeconds")
                    .and_then(|v| v.as_f64())
                    .map(|n| n as i64);
                return Some(LogRecord::IndexCreated(IndexDeclaration {
                    field_name,
                    unique,
                    sparse,
                    expire_after_seconds,
                }));
            }
            if let Some(Value::String(field_name)) = map.get("$$indexRemoved") {
                return Some(LogRecord::IndexRemoved {
                    field_name: field_name.clone(),
                });
            }
        }
        Document::from_value(v.clone()).map(LogRecord::Document)
    }
}

/// The folded result of replaying a datafile.
pub struct LoadedState {
    pub by_id: HashMap<DocumentId, Document>,
    pub indexes: HashMap<String, IndexDeclaration>,
}

pub struct Persistence {
    filename: Option<PathBuf>,
    in_memory_only: bool,
    corrupt_alert_threshold: f64,
    before_write: Option<SerializationHook>,
    after_read: Option<SerializationHook>,
}

impl Persistence {
    pub fn new(
        filename: Option<PathBuf>,
        in_memory_only: bool,
        corrupt_alert_threshold: f64,
        before_write: Option<SerializationHook>,
        after_read: Option<SerializationHook>,
    ) -> Result<Self> {
        if before_write.is_some() || after_read.is_some() {
            verify_hooks_invertible(&before_write, &after_read)?;
        }
        Ok(Persistence {
            filename,
            in_memory_only,
            corrupt_alert_threshold,
            before_write,
            after_read,
        })
    }

    pub fn filename(&self) -> Option<&Path> {
        self.filename.as_deref()
    }

    pub fn is_in_memory_only(&self) -> bool {
        self.in_memory_only || self.filename.is_none()
    }

    fn apply_before_write(&self, text: &str) -> String {
        match &self.before_write {
            Some(hook) => hook(text),
            None => text.to_string(),
        }
    }

    fn apply_after_read(&self, text: &str) -> String {
        match &self.after_read {
            Some(hook) => hook(text),
            None => text.to_string(),
        }
    }

    /// Appends one encoded line per record to the datafile.
    pub fn persist_new_state(&self, records: &[LogRecord]) -> Result<()> {
        if self.is_in_memory_only() {
            return Ok(());
        }
        let path = self.filename.as_ref().expect("checked by is_in_memory_only");
        let mut buf = String::new();
        for record in records {
            let text = value::serialize(&record.to_value());
            buf.push_str(&self.apply_before_write(&text));
            buf.push('\n');
        }
        if !buf.is_empty() {
            storage::append_file(path, &buf)?;
        }
        Ok(())
    }

    /// Rewrites the datafile to hold exactly one record per live document
    /// plus one `$$indexCreated` per non-`_id` index declaration.
    pub fn persist_cached_database(
        &self,
        live_docs: &[&Document],
        declarations: &[&IndexDeclaration],
    ) -> Result<()> {
        if self.is_in_memory_only() {
            return Ok(());
        }
        let path = self.filename.as_ref().expect("checked by is_in_memory_only");
        let mut buf = String::new();
        for doc in live_docs {
            let text = value::serialize(&doc.as_value());
            buf.push_str(&self.apply_before_write(&text));
            buf.push('\n');
        }
        for decl in declarations {
            let record = LogRecord::IndexCreated((*decl).clone());
            let text = value::serialize(&record.to_value());
            buf.push_str(&self.apply_before_write(&text));
            buf.push('\n');
        }
        storage::crash_safe_write_file(path, &buf)
    }

    /// Folds raw datafile text into a live-document map and index
    /// declaration map, failing if too large a fraction of lines are
    /// unparsable.
    pub fn treat_raw_data(&self, raw: &str) -> Result<LoadedState> {
        let lines: Vec<&str> = raw.split('\n').filter(|l| !l.is_empty()).collect();
        let total = lines.len();
        let mut corrupt = 0usize;
        let mut by_id: HashMap<DocumentId, Document> = HashMap::new();
        let mut indexes: HashMap<String, IndexDeclaration> = HashMap::new();

        for line in lines {
            let text = self.apply_after_read(line);
            let parsed = value::deserialize(&text).and_then(|v| LogRecord::from_value(&v));
            match parsed {
                Some(LogRecord::Document(doc)) => {
                    if let Some(id) = doc.id() {
                        by_id.insert(id.to_string(), doc);
                    } else {
                        corrupt += 1;
                    }
                }
                Some(LogRecord::Deleted { id }) => {
                    by_id.remove(&id);
                }
                Some(LogRecord::IndexCreated(decl)) => {
                    indexes.insert(decl.field_name.clone(), decl);
                }
                Some(LogRecord::IndexRemoved { field_name }) => {
                    indexes.remove(&field_name);
                }
                None => corrupt += 1,
            }
        }

        if total > 0 {
            let ratio = corrupt as f64 / total as f64;
            if ratio > self.corrupt_alert_threshold {
                return Err(Error::CorruptLog {
                    ratio,
                    threshold: self.corrupt_alert_threshold,
                });
            }
        }

        Ok(LoadedState { by_id, indexes })
    }

    pub fn read_datafile(&self) -> Result<String> {
        match &self.filename {
            Some(path) => storage::read_to_string(path),
            None => Ok(String::new()),
        }
    }

    pub fn ensure_datafile_integrity(&self) -> Result<()> {
        if let Some(path) = &self.filename {
            storage::ensure_datafile_integrity(path)?;
        }
        Ok(())
    }
}

/// Verifies `afterRead . beforeWrite` is the identity over a battery of
/// random strings (lengths 1..29, ten samples each).
fn verify_hooks_invertible(
    before_write: &Option<SerializationHook>,
    after_read: &Option<SerializationHook>,
) -> Result<()> {
    let before = before_write
        .clone()
        .unwrap_or_else(|| Arc::new(|s: &str| s.to_string()));
    let after = after_read
        .clone()
        .unwrap_or_else(|| Arc::new(|s: &str| s.to_string()));

    let mut rng = rand::thread_rng();
    for len in 1..29 {
        for _ in 0..10 {
            let sample: String = (&mut rng)
                .sample_iter(&Alphanumeric)
                .take(len)
                .map(char::from)
                .collect();
            if after(&before(&sample)) != sample {
                return Err(Error::HookNotInvertible);
            }
        }
    }
    Ok(())
}
