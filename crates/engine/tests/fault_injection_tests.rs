//! Fault Injection Tests
//!
//! A `DocumentStore` wrapper that fails selected calls, used to check that
//! driver errors surface as typed failures, that only retryable reads are
//! retried, and that batch writes report per-entity failures.

use mantle_core::{Entity, Key};
use mantle_engine::codec::KeyCodec;
use mantle_engine::{AdapterConfig, DatastoreService, Error, ErrorKind, Query, SCHEMA_COLLECTION};
use mantle_storage::{
    Document, DocumentStore, Filter, FindQuery, MemoryDocumentStore, StoreError, StoreResult,
    WriteConcern, ID_FIELD,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Store that fails finds and selected upserts on demand
///
/// `upsert_calls` counts entity writes only; schema records are not counted.
struct FaultyStore {
    inner: MemoryDocumentStore,
    find_failures: Mutex<Vec<StoreError>>,
    find_calls: AtomicUsize,
    upsert_calls: AtomicUsize,
    failing_ids: Mutex<HashSet<String>>,
    fail_increments: Mutex<bool>,
}

impl FaultyStore {
    fn new() -> Self {
        Self {
            inner: MemoryDocumentStore::new(),
            find_failures: Mutex::new(Vec::new()),
            find_calls: AtomicUsize::new(0),
            upsert_calls: AtomicUsize::new(0),
            failing_ids: Mutex::new(HashSet::new()),
            fail_increments: Mutex::new(false),
        }
    }

    fn fail_next_finds(&self, errors: Vec<StoreError>) {
        *self.find_failures.lock() = errors;
    }

    fn fail_writes_to(&self, key: &Key) {
        self.failing_ids.lock().insert(KeyCodec::encode(key));
    }
}

impl DocumentStore for FaultyStore {
    fn find(&self, db: &str, collection: &str, query: &FindQuery) -> StoreResult<Vec<Document>> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        {
            let mut failures = self.find_failures.lock();
            if !failures.is_empty() {
                return Err(failures.remove(0));
            }
        }
        self.inner.find(db, collection, query)
    }

    fn upsert(&self, db: &str, collection: &str, doc: Document, concern: WriteConcern) -> StoreResult<()> {
        if collection != SCHEMA_COLLECTION {
            self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        }
        let id = doc.get(ID_FIELD).and_then(|v| v.as_str()).unwrap_or_default().to_string();
        if self.failing_ids.lock().contains(&id) {
            return match concern {
                WriteConcern::Acknowledged => {
                    Err(StoreError::WriteConcern(format!("replica write failed for {:?}", id)))
                }
                WriteConcern::Unacknowledged => Ok(()),
            };
        }
        self.inner.upsert(db, collection, doc, concern)
    }

    fn insert(&self, db: &str, collection: &str, doc: Document, concern: WriteConcern) -> StoreResult<()> {
        self.inner.insert(db, collection, doc, concern)
    }

    fn delete_many(&self, db: &str, collection: &str, filter: &Filter, concern: WriteConcern) -> StoreResult<u64> {
        self.inner.delete_many(db, collection, filter, concern)
    }

    fn increment(&self, db: &str, collection: &str, id: &str, field: &str, by: i64) -> StoreResult<i64> {
        if *self.fail_increments.lock() {
            return Err(StoreError::Timeout("counter update timed out".into()));
        }
        self.inner.increment(db, collection, id, field, by)
    }

    fn update_max(&self, db: &str, collection: &str, id: &str, field: &str, value: i64) -> StoreResult<i64> {
        self.inner.update_max(db, collection, id, field, value)
    }

    fn drop_database(&self, db: &str) -> StoreResult<()> {
        self.inner.drop_database(db)
    }
}

fn setup(durability: &str) -> (Arc<FaultyStore>, DatastoreService) {
    let store = Arc::new(FaultyStore::new());
    let mut config = AdapterConfig::for_app("faults");
    config.durability = durability.into();
    config.read_retries = 2;
    let svc = DatastoreService::new(store.clone(), config).unwrap();
    (store, svc)
}

fn item(name: &str) -> Entity {
    Entity::new(Key::with_name("Item", name)).with("n", 1i64)
}

// ============================================================================
// Reads
// ============================================================================

#[test]
fn test_transient_find_is_retried() {
    let (store, svc) = setup("acknowledged");
    svc.put(&[item("a")]).unwrap();
    store.fail_next_finds(vec![
        StoreError::Transient("election".into()),
        StoreError::Transient("election".into()),
    ]);
    let before = store.find_calls.load(Ordering::SeqCst);
    let result = svc.run_query(&Query::new("Item")).unwrap();
    assert_eq!(result.items.len(), 1);
    assert_eq!(store.find_calls.load(Ordering::SeqCst) - before, 3);
}

#[test]
fn test_retry_budget_exhausted_surfaces_storage_error() {
    let (store, svc) = setup("acknowledged");
    store.fail_next_finds(vec![
        StoreError::Transient("election".into()),
        StoreError::Transient("election".into()),
        StoreError::Transient("election".into()),
    ]);
    let err = svc.get(&[Key::with_name("Item", "a")]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);
    assert!(err.is_retryable());
}

#[test]
fn test_non_retryable_read_errors_are_not_retried() {
    let (store, svc) = setup("acknowledged");
    store.fail_next_finds(vec![StoreError::Connection("refused".into())]);
    let before = store.find_calls.load(Ordering::SeqCst);
    let err = svc.run_query(&Query::new("Item")).unwrap_err();
    assert!(matches!(err, Error::Storage(StoreError::Connection(_))));
    assert_eq!(store.find_calls.load(Ordering::SeqCst) - before, 1);
}

// ============================================================================
// Writes
// ============================================================================

#[test]
fn test_partial_batch_reports_each_failure() {
    let (store, svc) = setup("acknowledged");
    store.fail_writes_to(&Key::with_name("Item", "b"));
    let err = svc.put(&[item("a"), item("b"), item("c")]).unwrap_err();
    match err {
        Error::PartialBatch { completed, failures } => {
            assert_eq!(completed, vec![Key::with_name("Item", "a"), Key::with_name("Item", "c")]);
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].index, 1);
            assert_eq!(failures[0].key, Key::with_name("Item", "b"));
            assert!(matches!(failures[0].error, StoreError::WriteConcern(_)));
        }
        other => panic!("expected partial batch, got {:?}", other),
    }
    let metrics = svc.metrics();
    assert_eq!((metrics.written, metrics.failed), (2, 1));
    let got = svc
        .get(&[Key::with_name("Item", "a"), Key::with_name("Item", "b"), Key::with_name("Item", "c")])
        .unwrap();
    assert!(got[0].is_some() && got[1].is_none() && got[2].is_some());
}

#[test]
fn test_writes_are_never_retried() {
    let (store, svc) = setup("acknowledged");
    store.fail_writes_to(&Key::with_name("Item", "a"));
    assert!(svc.put(&[item("a")]).is_err());
    assert_eq!(store.upsert_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_fire_and_forget_hides_write_failures() {
    let (store, svc) = setup("fire_and_forget");
    store.fail_writes_to(&Key::with_name("Item", "b"));
    let keys = svc.put(&[item("a"), item("b")]).unwrap();
    assert_eq!(keys.len(), 2);
    let got = svc.get(&keys).unwrap();
    assert!(got[0].is_some());
    assert!(got[1].is_none());
}

#[test]
fn test_counter_failure_writes_nothing() {
    let (store, svc) = setup("acknowledged");
    *store.fail_increments.lock() = true;
    let err = svc.put(&[item("a")]).unwrap_err();
    assert!(matches!(err, Error::Storage(StoreError::Timeout(_))));
    assert_eq!(store.upsert_calls.load(Ordering::SeqCst), 0);

    let err = svc.put(&[Entity::new(Key::incomplete("Item"))]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Allocation);
}
