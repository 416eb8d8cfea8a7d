//! `DataStore`: owns the indexes, persistence, and executor, and implements
//! the public insert/update/remove/find/ensureIndex surface. TTL eviction is
//! driven from `getCandidates`, inline with the documents it returns.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;

use crate::config::DataStoreConfig;
use crate::cursor::Cursor;
use crate::document::{self, Document, DocumentId};
use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::index::{Index, IndexDeclaration, RangeQuery};
use crate::persistence::{LogRecord, Persistence};
use crate::query;
use crate::value::{self, Value};
use crate::{log_debug, log_info, log_warn};

const MIN_AUTOCOMPACTION_INTERVAL_MS: u64 = 5000;

/// Options for `DataStore::update`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateOptions {
    pub multi: bool,
    pub upsert: bool,
    pub return_updated_docs: bool,
}

/// Options for `DataStore::remove`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveOptions {
    pub multi: bool,
}

/// The outcome of an `update` call: either a count, or the updated
/// documents when `return_updated_docs` was requested.
#[derive(Debug, Clone)]
pub enum UpdateOutcome {
    Count(usize),
    Docs(Vec<Document>),
}

impl UpdateOutcome {
    pub fn count(&self) -> usize {
        match self {
            UpdateOutcome::Count(n) => *n,
            UpdateOutcome::Docs(docs) => docs.len(),
        }
    }
}

/// In-memory state, mutated only from within a task run on the executor.
pub(crate) struct State {
    pub(crate) docs: HashMap<DocumentId, Document>,
    pub(crate) indexes: BTreeMap<String, Index>,
    pub(crate) ttl_fields: HashMap<String, i64>,
}

impl State {
    fn new() -> Self {
        let mut indexes = BTreeMap::new();
        indexes.insert(
            "_id".to_string(),
            Index::new(IndexDeclaration::new("_id").unique(true)),
        );
        State {
            docs: HashMap::new(),
            indexes,
            ttl_fields: HashMap::new(),
        }
    }

    fn reset(&mut self) {
        *self = State::new();
    }
}

struct AutocompactionHandle {
    stop: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl Drop for AutocompactionHandle {
    fn drop(&mut self) {
        self.stop.store(true, AtomicOrdering::SeqCst);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

struct Inner {
    state: Mutex<State>,
    executor: Executor,
    persistence: Persistence,
    config: DataStoreConfig,
    autocompaction: Mutex<Option<AutocompactionHandle>>,
    compaction_listeners: Mutex<Vec<Box<dyn Fn() + Send + Sync>>>,
}

/// An embeddable, single-process document store. Cheap to clone: every
/// clone is a handle onto the same underlying state, executor, and
/// persistence; a `Cursor` holds one such handle for the duration of a
/// query rather than a borrow, since the handle is already reference-counted.
#[derive(Clone)]
pub struct DataStore {
    inner: Arc<Inner>,
}

impl DataStore {
    /// Opens a store under `config`. If `config.autoload` is set, loads the
    /// datafile synchronously before returning; otherwise the store is left
    /// unready and the caller must invoke `load_database` before any
    /// queued operation will complete.
    pub fn open(config: DataStoreConfig) -> Result<Self> {
        if let Some(name) = &config.filename {
            if name.to_string_lossy().ends_with('~') {
                return Err(Error::IoError {
                    op: "open",
                    source: std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        "datafile name must not end with '~', reserved for crash-safe rewrites",
                    ),
                });
            }
        }

        let persistence = Persistence::new(
            config.filename.clone(),
            config.is_in_memory_only(),
            config.effective_corrupt_alert_threshold(),
            config.before_serialization.clone(),
            config.after_serialization.clone(),
        )?;

        let store = DataStore {
            inner: Arc::new(Inner {
                state: Mutex::new(State::new()),
                executor: Executor::new(),
                persistence,
                config,
                autocompaction: Mutex::new(None),
                compaction_listeners: Mutex::new(Vec::new()),
            }),
        };

        if store.inner.config.autoload {
            store.load_database()?;
        }
        Ok(store)
    }

    /// `resetIndexes` → read the datafile → fold into live docs and index
    /// declarations → rebuild every index → compact → flip the executor
    /// ready and drain its pre-ready buffer.
    pub fn load_database(&self) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        inner.executor.push(true, move || Self::load_database_locked(&inner))
    }

    fn load_database_locked(inner: &Inner) -> Result<()> {
        {
            let mut state = inner.state.lock();
            state.reset();
        }
        if inner.persistence.is_in_memory_only() {
            inner.executor.set_ready();
            return Ok(());
        }

        inner.persistence.ensure_datafile_integrity()?;
        let raw = inner.persistence.read_datafile()?;
        let loaded = inner.persistence.treat_raw_data(&raw)?;

        let mut state = State::new();
        for decl in loaded.indexes.values() {
            state
                .indexes
                .insert(decl.field_name.clone(), Index::new(decl.clone()));
            if let Some(seconds) = decl.expire_after_seconds {
                if seconds > 0 {
                    state.ttl_fields.insert(decl.field_name.clone(), seconds);
                }
            }
        }

        let docs: Vec<Document> = loaded.by_id.values().cloned().collect();
        if let Err(e) = Self::bulk_load_indexes(&mut state, &docs) {
            log_warn!("load_database: bulk index rebuild failed, store left empty: {}", e);
            return Err(e);
        }
        state.docs = loaded.by_id;

        {
            let mut guard = inner.state.lock();
            *guard = state;
        }

        Self::compact_locked(inner)?;
        inner.executor.set_ready();
        log_info!("load_database: loaded {} documents", inner.state.lock().docs.len());
        Ok(())
    }

    /// Bulk-loads every index from scratch; on any unique violation every
    /// index (not just the failing one) rolls back to empty.
    fn bulk_load_indexes(state: &mut State, docs: &[Document]) -> Result<()> {
        let names: Vec<String> = state.indexes.keys().cloned().collect();
        let mut failure: Option<(String, Error)> = None;

        for name in &names {
            let index = state.indexes.get_mut(name).expect("name collected above");
            if let Err(e) = index.reset(Some(docs)) {
                failure = Some((name.clone(), e));
                break;
            }
        }

        if let Some((failed_name, e)) = failure {
            for name in &names {
                let index = state.indexes.get_mut(name).expect("name collected above");
                let _ = index.reset(None);
            }
            log_warn!("bulk_load_indexes: index '{}' rejected bulk load: {}", failed_name, e);
            return Err(e);
        }
        Ok(())
    }

    /// Rewrites the datafile to hold exactly one record per live document
    /// plus one `$$indexCreated` per non-`_id` index, then fires the
    /// `compaction.done` listeners.
    pub fn compact(&self) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        inner.executor.push(false, move || Self::compact_locked(&inner))
    }

    fn compact_locked(inner: &Inner) -> Result<()> {
        let state = inner.state.lock();
        let live_docs: Vec<&Document> = state.docs.values().collect();
        let declarations: Vec<&IndexDeclaration> = state
            .indexes
            .iter()
            .filter(|(name, _)| name.as_str() != "_id")
            .map(|(_, idx)| idx.declaration())
            .collect();
        inner.persistence.persist_cached_database(&live_docs, &declarations)?;
        drop(state);
        for listener in inner.compaction_listeners.lock().iter() {
            listener();
        }
        Ok(())
    }

    /// Registers a listener fired every time the log is rewritten
    /// (`compaction.done`).
    pub fn on_compaction_done(&self, listener: impl Fn() + Send + Sync + 'static) {
        self.inner.compaction_listeners.lock().push(Box::new(listener));
    }

    /// Schedules `compact` every `max(ms, 5000)` milliseconds, replacing any
    /// prior schedule.
    pub fn set_autocompaction_interval(&self, ms: u64) {
        let interval = Duration::from_millis(ms.max(MIN_AUTOCOMPACTION_INTERVAL_MS));
        let stop = Arc::new(AtomicBool::new(false));
        let stop_for_thread = Arc::clone(&stop);
        let store = self.clone();
        let handle = std::thread::Builder::new()
            .name("docstore-autocompaction".to_string())
            .spawn(move || {
                while !stop_for_thread.load(AtomicOrdering::SeqCst) {
                    std::thread::sleep(interval);
                    if stop_for_thread.load(AtomicOrdering::SeqCst) {
                        break;
                    }
                    if let Err(e) = store.compact() {
                        log_warn!("autocompaction run failed: {}", e);
                    }
                }
            })
            .expect("failed to spawn autocompaction thread");
        *self.inner.autocompaction.lock() = Some(AutocompactionHandle {
            stop,
            handle: Some(handle),
        });
    }

    /// Cancels any scheduled autocompaction.
    pub fn stop_autocompaction(&self) {
        self.inner.autocompaction.lock().take();
    }

    /// Blocks until the executor's task queue is next empty.
    pub fn on_empty(&self) {
        self.inner.executor.on_empty();
    }

    // ---------------------------------------------------------------- insert

    pub fn insert_one(&self, doc: Value) -> Result<Document> {
        let mut docs = self.insert_many(vec![doc])?;
        Ok(docs.remove(0))
    }

    pub fn insert_many(&self, docs: Vec<Value>) -> Result<Vec<Document>> {
        let inner = Arc::clone(&self.inner);
        inner.executor.push(false, move || Self::insert_many_locked(&inner, docs))
    }

    fn insert_many_locked(inner: &Inner, raw_docs: Vec<Value>) -> Result<Vec<Document>> {
        let mut state = inner.state.lock();
        let mut inserted: Vec<Document> = Vec::with_capacity(raw_docs.len());

        for raw in raw_docs {
            match Self::insert_single_locked(&mut state, raw, inner.config.timestamp_data) {
                Ok(doc) => inserted.push(doc),
                Err(e) => {
                    for doc in inserted.iter().rev() {
                        for index in state.indexes.values_mut() {
                            index.remove(doc);
                        }
                        if let Some(id) = doc.id() {
                            state.docs.remove(id);
                        }
                    }
                    return Err(e);
                }
            }
        }

        let records: Vec<LogRecord> = inserted.iter().cloned().map(LogRecord::Document).collect();
        drop(state);
        inner.persistence.persist_new_state(&records)?;
        Ok(inserted)
    }

    fn insert_single_locked(state: &mut State, raw: Value, timestamp_data: bool) -> Result<Document> {
        let copy = value::deep_copy(&raw);
        value::check_object(&copy)?;
        let mut doc = Document::from_value(copy).ok_or_else(|| Error::InvalidKey {
            reason: "document must be an object".to_string(),
        })?;

        if doc.id().is_none() {
            let id = loop {
                let candidate = document::generate_id();
                if !state.docs.contains_key(&candidate) {
                    break candidate;
                }
            };
            doc.set_id(id);
        }

        if timestamp_data {
            let now = Utc::now();
            doc.set_created_at(now);
            doc.set_updated_at(now);
        }

        let names: Vec<String> = state.indexes.keys().cloned().collect();
        let mut touched: Vec<String> = Vec::new();
        let mut failure: Option<(String, Error)> = None;

        for name in &names {
            let index = state.indexes.get_mut(name).expect("name collected above");
            if let Err(e) = index.insert(&doc) {
                failure = Some((name.clone(), e));
                break;
            }
            touched.push(name.clone());
        }

        if let Some((failed_name, e)) = failure {
            for done in &touched {
                let idx = state.indexes.get_mut(done).expect("touched name is present");
                idx.remove(&doc);
            }
            log_debug!("insert rolled back on index '{}': {}", failed_name, e);
            return Err(e);
        }

        let id = doc.id().expect("id assigned above").to_string();
        state.docs.insert(id, doc.clone());
        Ok(doc)
    }

    // ---------------------------------------------------------------- update

    pub fn update_one(&self, query: Value, update_query: Value) -> Result<usize> {
        let outcome = self.update(query, update_query, UpdateOptions::default())?;
        Ok(outcome.count())
    }

    pub fn update_many(&self, query: Value, update_query: Value) -> Result<usize> {
        let outcome = self.update(
            query,
            update_query,
            UpdateOptions { multi: true, ..Default::default() },
        )?;
        Ok(outcome.count())
    }

    pub fn update(&self, query: Value, update_query: Value, options: UpdateOptions) -> Result<UpdateOutcome> {
        let inner = Arc::clone(&self.inner);
        inner
            .executor
            .push(false, move || Self::update_locked(&inner, query, update_query, options))
    }

    fn update_locked(
        inner: &Inner,
        query: Value,
        update_query: Value,
        options: UpdateOptions,
    ) -> Result<UpdateOutcome> {
        if options.upsert {
            let mut state = inner.state.lock();
            Self::expire_stale_in_place(inner, &mut state)?;
            let candidates = Self::select_candidates(&state, &query);
            let existing = candidates
                .into_iter()
                .filter_map(|id| state.docs.get(&id).cloned())
                .find(|doc| query::matches_filter(doc, &query).unwrap_or(false));
            if existing.is_none() {
                let base = if has_operator_keys(&update_query) {
                    value::deep_copy_strict_keys(&query)
                } else {
                    update_query.clone()
                };
                let synthesized = if has_operator_keys(&update_query) {
                    let base_doc = Document::from_value(base).unwrap_or_else(|| {
                        Document::from_fields(std::collections::BTreeMap::new())
                    });
                    crate::modify::modify(&base_doc, &update_query)?
                } else {
                    Document::from_value(base).ok_or_else(|| Error::InvalidModifier {
                        reason: "upsert replacement document must be an object".to_string(),
                    })?
                };
                drop(state);
                let inserted = Self::insert_many_locked(inner, vec![synthesized.as_value()])?;
                return Ok(if options.return_updated_docs {
                    UpdateOutcome::Docs(inserted)
                } else {
                    UpdateOutcome::Count(1)
                });
            }
            drop(state);
        }

        let mut state = inner.state.lock();
        Self::expire_stale_in_place(inner, &mut state)?;
        let candidate_ids = Self::select_candidates(&state, &query);
        let mut modifications: Vec<(Document, Document)> = Vec::new();

        for id in candidate_ids {
            let Some(old_doc) = state.docs.get(&id).cloned() else { continue };
            if !query::matches_filter(&old_doc, &query)? {
                continue;
            }

            let mut new_doc = crate::modify::modify(&old_doc, &update_query)?;
            if let Some(id_value) = old_doc.get("_id").cloned() {
                new_doc.set("_id", id_value);
            }
            if let Some(created) = old_doc.get("createdAt").cloned() {
                new_doc.set("createdAt", created);
            }
            if inner.config.timestamp_data {
                new_doc.set_updated_at(Utc::now());
            }
            modifications.push((old_doc, new_doc));

            if !options.multi {
                break;
            }
        }

        Self::apply_updates(&mut state, &modifications)?;

        let new_docs: Vec<Document> = modifications.iter().map(|(_, n)| n.clone()).collect();
        let records: Vec<LogRecord> = new_docs.iter().cloned().map(LogRecord::Document).collect();
        drop(state);
        inner.persistence.persist_new_state(&records)?;

        Ok(if options.return_updated_docs {
            UpdateOutcome::Docs(new_docs)
        } else {
            UpdateOutcome::Count(modifications.len())
        })
    }

    /// Atomically replaces `old` with `new` across every index; on a
    /// unique-violation midway, every index already updated for this batch
    /// is rolled back to its pre-call contents.
    fn apply_updates(state: &mut State, modifications: &[(Document, Document)]) -> Result<()> {
        let mut done: Vec<&(Document, Document)> = Vec::new();
        for pair @ (old_doc, new_doc) in modifications {
            let mut touched: Vec<String> = Vec::new();
            let mut failure = None;
            for (name, index) in state.indexes.iter_mut() {
                if let Err(e) = index.update(old_doc, new_doc) {
                    failure = Some((name.clone(), e));
                    break;
                }
                touched.push(name.clone());
            }
            if let Some((failed_name, e)) = failure {
                for done_name in &touched {
                    if let Some(idx) = state.indexes.get_mut(done_name) {
                        let _ = idx.update(new_doc, old_doc);
                    }
                }
                for (old_done, new_done) in done.iter().rev() {
                    for index in state.indexes.values_mut() {
                        let _ = index.update(new_done, old_done);
                    }
                    if let Some(id) = old_done.id() {
                        state.docs.insert(id.to_string(), (*old_done).clone());
                    }
                }
                log_debug!("update rolled back on index '{}': {}", failed_name, e);
                return Err(e);
            }
            if let Some(id) = new_doc.id() {
                state.docs.insert(id.to_string(), new_doc.clone());
            }
            done.push(pair);
        }
        Ok(())
    }

    // ---------------------------------------------------------------- remove

    pub fn delete_one(&self, query: Value) -> Result<usize> {
        self.remove(query, RemoveOptions::default())
    }

    pub fn delete_many(&self, query: Value) -> Result<usize> {
        self.remove(query, RemoveOptions { multi: true })
    }

    pub fn remove(&self, query: Value, options: RemoveOptions) -> Result<usize> {
        let inner = Arc::clone(&self.inner);
        inner.executor.push(false, move || Self::remove_locked(&inner, query, options))
    }

    fn remove_locked(inner: &Inner, query: Value, options: RemoveOptions) -> Result<usize> {
        let mut state = inner.state.lock();
        let candidate_ids = Self::select_candidates(&state, &query);
        let mut to_remove: Vec<Document> = Vec::new();

        for id in candidate_ids {
            let Some(doc) = state.docs.get(&id).cloned() else { continue };
            if !query::matches_filter(&doc, &query)? {
                continue;
            }
            to_remove.push(doc);
            if !options.multi {
                break;
            }
        }

        Self::remove_documents(&mut state, &to_remove);

        let records: Vec<LogRecord> = to_remove
            .iter()
            .filter_map(|d| d.id().map(|id| LogRecord::Deleted { id: id.to_string() }))
            .collect();
        let count = records.len();
        drop(state);
        inner.persistence.persist_new_state(&records)?;
        Ok(count)
    }

    fn remove_documents(state: &mut State, docs: &[Document]) {
        for doc in docs {
            for index in state.indexes.values_mut() {
                index.remove(doc);
            }
            if let Some(id) = doc.id() {
                state.docs.remove(id);
            }
        }
    }

    // -------------------------------------------------------------- indexes

    pub fn ensure_index(&self, declaration: IndexDeclaration) -> Result<()> {
        if declaration.field_name.is_empty() {
            return Err(Error::MissingFieldName);
        }
        let inner = Arc::clone(&self.inner);
        inner.executor.push(false, move || Self::ensure_index_locked(&inner, declaration))
    }

    fn ensure_index_locked(inner: &Inner, declaration: IndexDeclaration) -> Result<()> {
        let mut state = inner.state.lock();
        if state.indexes.contains_key(&declaration.field_name) {
            return Ok(());
        }

        let mut index = Index::new(declaration.clone());
        let docs: Vec<Document> = state.docs.values().cloned().collect();
        if let Err(e) = index.reset(Some(&docs)) {
            log_warn!("ensure_index('{}') rejected: {}", declaration.field_name, e);
            return Err(e);
        }

        if let Some(seconds) = declaration.expire_after_seconds {
            if seconds > 0 {
                state.ttl_fields.insert(declaration.field_name.clone(), seconds);
            }
        }
        state.indexes.insert(declaration.field_name.clone(), index);
        drop(state);

        inner
            .persistence
            .persist_new_state(&[LogRecord::IndexCreated(declaration)])
    }

    pub fn remove_index(&self, field_name: impl Into<String>) -> Result<()> {
        let field_name = field_name.into();
        if field_name == "_id" {
            return Err(Error::InvalidIndexField { field: field_name });
        }
        let inner = Arc::clone(&self.inner);
        inner.executor.push(false, move || Self::remove_index_locked(&inner, field_name))
    }

    fn remove_index_locked(inner: &Inner, field_name: String) -> Result<()> {
        {
            let mut state = inner.state.lock();
            state.indexes.remove(&field_name);
            state.ttl_fields.remove(&field_name);
        }
        inner
            .persistence
            .persist_new_state(&[LogRecord::IndexRemoved { field_name }])
    }

    // ----------------------------------------------------------------- find

    pub fn find(&self, query: Value) -> Cursor {
        Cursor::new(self.clone(), query)
    }

    /// The configured string comparator override, if any. Used by `Cursor`
    /// to order sort keys the way this store's documents were configured to
    /// compare strings; the secondary indexes themselves always order by
    /// natural string order, since their `BTreeMap` key ordering is fixed at
    /// insert time and cannot vary per query.
    pub(crate) fn string_comparator(&self) -> Option<crate::config::StringComparator> {
        self.inner.config.compare_strings.clone()
    }

    pub fn find_one(&self, query: Value) -> Result<Option<Document>> {
        let result = self.find(query).limit(1).exec()?;
        Ok(result.docs.into_iter().next())
    }

    // ----------------------------------------------------------- candidates

    pub(crate) fn get_candidates(&self, query: &Value, dont_expire_stale_docs: bool) -> Result<Vec<Document>> {
        let inner = Arc::clone(&self.inner);
        let query = query.clone();
        inner
            .executor
            .push(false, move || Self::get_candidates_task(&inner, &query, dont_expire_stale_docs))
    }

    pub(crate) fn get_candidates_task(inner: &Inner, query: &Value, dont_expire_stale_docs: bool) -> Result<Vec<Document>> {
        let mut state = inner.state.lock();
        if !dont_expire_stale_docs {
            Self::expire_stale_in_place(inner, &mut state)?;
        }
        let ids = Self::select_candidates(&state, query);
        let docs: Vec<Document> = ids.iter().filter_map(|id| state.docs.get(id).cloned()).collect();
        Ok(docs)
    }

    /// Picks a candidate set per the four-rule priority order: an indexed
    /// field tested for primitive equality, else an indexed field tested
    /// with `$in`, else an indexed field tested with a range bound, else a
    /// full `_id` scan. Each rule is checked across every query field before
    /// falling through to the next rule, so a range-queryable indexed field
    /// never loses to a later equality field that happens to come first in
    /// the query map.
    fn select_candidates(state: &State, query: &Value) -> Vec<DocumentId> {
        let Some(map) = query.as_object() else {
            return state.indexes.get("_id").map(|idx| idx.get_all()).unwrap_or_default();
        };

        for (field, spec) in map {
            if field.starts_with('$') {
                continue;
            }
            if matches!(spec, Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) | Value::Timestamp(_))
            {
                if let Some(index) = state.indexes.get(field) {
                    return index.get_matching(spec);
                }
            }
        }

        for (field, spec) in map {
            if field.starts_with('$') {
                continue;
            }
            if let Some(op_map) = spec.as_object() {
                if let Some(in_values) = op_map.get("$in") {
                    if let Some(index) = state.indexes.get(field) {
                        return index.get_matching(in_values);
                    }
                }
            }
        }

        for (field, spec) in map {
            if field.starts_with('$') {
                continue;
            }
            if let Some(range) = RangeQuery::from_value(spec) {
                if let Some(index) = state.indexes.get(field) {
                    return index.get_between_bounds(&range);
                }
            }
        }

        state
            .indexes
            .get("_id")
            .map(|idx| idx.get_all())
            .unwrap_or_default()
    }

    /// Evicts every document in `state` whose TTL field has expired, taking
    /// the lock as already held. Used both by `get_candidates_task` and by
    /// `update_locked`, which cannot re-enter the executor to evict via
    /// `get_candidates` since it already runs inside a queued task holding
    /// this same lock.
    fn expire_stale_in_place(inner: &Inner, state: &mut State) -> Result<()> {
        if state.ttl_fields.is_empty() {
            return Ok(());
        }

        let now = Utc::now();
        let ttl_fields = state.ttl_fields.clone();
        let expired: Vec<Document> = state
            .docs
            .values()
            .filter(|doc| {
                ttl_fields.iter().any(|(field, seconds)| {
                    matches!(doc.get_dot(field), Some(Value::Timestamp(ts))
                        if now.signed_duration_since(ts).num_milliseconds() > seconds * 1000)
                })
            })
            .cloned()
            .collect();

        if expired.is_empty() {
            return Ok(());
        }

        log_debug!("expiring {} TTL document(s)", expired.len());
        Self::remove_documents(state, &expired);
        let records: Vec<LogRecord> = expired
            .iter()
            .filter_map(|d| d.id().map(|id| LogRecord::Deleted { id: id.to_string() }))
            .collect();
        inner.persistence.persist_new_state(&records)
    }
}

fn has_operator_keys(v: &Value) -> bool {
    matches!(v.as_object(), Some(map) if map.keys().any(|k| k.starts_with('$')))
}
