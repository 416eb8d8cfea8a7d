// Integration tests for the document store.
use std::collections::BTreeMap;

use chrono::Utc;
use docstore::{DataStore, DataStoreConfig, IndexDeclaration, RemoveOptions, UpdateOptions, Value};
use tempfile::TempDir;

fn obj(pairs: &[(&str, Value)]) -> Value {
    let mut m = BTreeMap::new();
    for (k, v) in pairs {
        m.insert(k.to_string(), v.clone());
    }
    Value::Object(m)
}

fn create_test_store() -> (TempDir, DataStore) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("test.db");
    let store = DataStore::open(DataStoreConfig::file(&path)).unwrap();
    (temp_dir, store)
}

#[test]
fn insert_then_regex_find_returns_matching_document() {
    let (_temp, store) = create_test_store();
    store
        .insert_many(vec![
            obj(&[
                ("artist", Value::String("Hendrix".into())),
                ("title", Value::String("Hey Joe".into())),
            ]),
            obj(&[
                ("artist", Value::String("Zeppelin".into())),
                ("title", Value::String("Kashmir".into())),
            ]),
        ])
        .unwrap();

    let found = store
        .find(obj(&[(
            "artist",
            obj(&[("$regex", Value::String("Hen".into()))]),
        )]))
        .exec()
        .unwrap();
    assert_eq!(found.docs.len(), 1);
    assert_eq!(found.docs[0].get("artist"), Some(&Value::String("Hendrix".into())));
    assert!(found.docs[0].id().is_some());
}

#[test]
fn upsert_inserts_once_and_updates_on_repeat() {
    let (_temp, store) = create_test_store();
    let query = obj(&[("name", Value::String("x".into()))]);
    let update = obj(&[("$set", obj(&[("v", Value::Number(1.0))]))]);
    let opts = UpdateOptions { upsert: true, ..Default::default() };

    let outcome = store.update(query.clone(), update.clone(), opts).unwrap();
    assert_eq!(outcome.count(), 1);

    let outcome2 = store.update(query, update, opts).unwrap();
    assert_eq!(outcome2.count(), 1);

    let all = store.find(obj(&[])).exec().unwrap();
    assert_eq!(all.docs.len(), 1);
    assert_eq!(all.docs[0].get("v"), Some(&Value::Number(1.0)));
}

#[test]
fn unique_violation_rolls_back_whole_batch_and_persists_nothing() {
    let (_temp, store) = create_test_store();
    store.ensure_index(IndexDeclaration::new("k").unique(true)).unwrap();

    let err = store.insert_many(vec![
        obj(&[("k", Value::Number(1.0))]),
        obj(&[("k", Value::Number(2.0))]),
        obj(&[("k", Value::Number(1.0))]),
    ]);
    assert!(err.is_err());

    let all = store.find(obj(&[])).exec().unwrap();
    assert_eq!(all.docs.len(), 0);
}

#[test]
fn ttl_index_evicts_and_logs_a_tombstone() {
    let (temp, store) = create_test_store();
    store
        .ensure_index(IndexDeclaration::new("exp").expire_after_seconds(1))
        .unwrap();
    let stale = Utc::now() - chrono::Duration::seconds(2);
    store.insert_one(obj(&[("exp", Value::Timestamp(stale))])).unwrap();

    let found = store.find(obj(&[])).exec().unwrap();
    assert_eq!(found.docs.len(), 0);

    let raw = std::fs::read_to_string(temp.path().join("test.db")).unwrap();
    assert!(raw.contains("$$deleted"));
}

#[test]
fn projection_inclusion_exclusion_and_mixed_rejection() {
    let (_temp, store) = create_test_store();
    store
        .insert_one(obj(&[("a", Value::Number(1.0)), ("b", Value::Number(2.0))]))
        .unwrap();

    let included = store.find(obj(&[])).project(obj(&[("a", Value::Number(1.0))])).exec().unwrap();
    assert_eq!(included.docs[0].get("a"), Some(&Value::Number(1.0)));
    assert_eq!(included.docs[0].get("b"), None);
    assert!(included.docs[0].get("_id").is_some());

    let excluded = store.find(obj(&[])).project(obj(&[("a", Value::Number(0.0))])).exec().unwrap();
    assert_eq!(excluded.docs[0].get("a"), None);
    assert_eq!(excluded.docs[0].get("b"), Some(&Value::Number(2.0)));

    let mixed = store
        .find(obj(&[]))
        .project(obj(&[("a", Value::Number(1.0)), ("b", Value::Number(0.0))]))
        .exec();
    assert!(mixed.is_err());
}

#[test]
fn reopening_the_store_replays_the_log_to_the_same_live_set() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("test.db");

    {
        let store = DataStore::open(DataStoreConfig::file(&path)).unwrap();
        store.insert_many(vec![
            obj(&[("a", Value::Number(1.0))]),
            obj(&[("a", Value::Number(2.0))]),
        ]).unwrap();
        store.delete_one(obj(&[("a", Value::Number(1.0))])).unwrap();
    }

    let reopened = DataStore::open(DataStoreConfig::file(&path)).unwrap();
    let all = reopened.find(obj(&[])).exec().unwrap();
    assert_eq!(all.docs.len(), 1);
    assert_eq!(all.docs[0].get("a"), Some(&Value::Number(2.0)));
}

#[test]
fn compact_rewrites_the_log_to_one_line_per_live_document_and_index() {
    let (temp, store) = create_test_store();
    store.ensure_index(IndexDeclaration::new("a")).unwrap();
    for n in 0..5 {
        store.insert_one(obj(&[("a", Value::Number(n as f64))])).unwrap();
    }
    store.delete_one(obj(&[("a", Value::Number(0.0))])).unwrap();
    store.compact().unwrap();

    let raw = std::fs::read_to_string(temp.path().join("test.db")).unwrap();
    let lines: Vec<&str> = raw.split('\n').filter(|l| !l.is_empty()).collect();
    assert_eq!(lines.len(), 4 + 1); // 4 live docs + 1 index declaration

    let all = store.find(obj(&[])).exec().unwrap();
    assert_eq!(all.docs.len(), 4);
}

#[test]
fn compaction_done_listener_fires_on_compact() {
    let (_temp, store) = create_test_store();
    let fired = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    let fired2 = fired.clone();
    store.on_compaction_done(move || {
        fired2.store(true, std::sync::atomic::Ordering::SeqCst);
    });
    store.compact().unwrap();
    assert!(fired.load(std::sync::atomic::Ordering::SeqCst));
}

#[test]
fn crash_interrupted_compaction_recovers_from_tilde_file_on_reload() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("test.db");
    {
        let store = DataStore::open(DataStoreConfig::file(&path)).unwrap();
        store.insert_many(vec![
            obj(&[("a", Value::Number(1.0))]),
            obj(&[("a", Value::Number(2.0))]),
        ]).unwrap();
        store.compact().unwrap();
    }

    // `compact` writes the fully-formed replacement to `<file>~`, fsyncs it,
    // then renames over `<file>`. A crash between the fsync and the rename
    // leaves the complete new state sitting in `<file>~` with `<file>`
    // either stale or, as simulated here, absent.
    let compacted = std::fs::read_to_string(&path).unwrap();
    let tilde = temp.path().join("test.db~");
    std::fs::write(&tilde, &compacted).unwrap();
    std::fs::remove_file(&path).unwrap();

    let reopened = DataStore::open(DataStoreConfig::file(&path)).unwrap();
    let all = reopened.find(obj(&[])).exec().unwrap();
    assert_eq!(all.docs.len(), 2);
    assert!(!tilde.exists());
}

#[test]
fn remove_many_deletes_every_match() {
    let (_temp, store) = create_test_store();
    store.insert_many(vec![
        obj(&[("a", Value::Number(1.0))]),
        obj(&[("a", Value::Number(1.0))]),
        obj(&[("a", Value::Number(2.0))]),
    ]).unwrap();

    let removed = store.remove(obj(&[("a", Value::Number(1.0))]), RemoveOptions { multi: true }).unwrap();
    assert_eq!(removed, 2);

    let all = store.find(obj(&[])).exec().unwrap();
    assert_eq!(all.docs.len(), 1);
}
