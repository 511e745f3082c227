//! In-process document store
//!
//! `MemoryDocumentStore` keeps databases in a `DashMap`, collections in an
//! `FxHashMap` behind a `RwLock`, and each collection's documents in a
//! `BTreeMap` keyed by `_id` so natural order is `_id` order.
//!
//! # Thread Safety
//!
//! - Different databases never contend
//! - Writes lock only the target collection
//! - `increment`/`update_max` hold the collection write lock for the whole
//!   read-modify-write, so concurrent increments never lose updates

use crate::document::{validate_field_names, DocValue, Document, ID_FIELD};
use crate::error::{StoreError, StoreResult};
use crate::filter::{Filter, FindQuery};
use crate::traits::{DocumentStore, WriteConcern};
use dashmap::DashMap;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

type Collection = Arc<RwLock<BTreeMap<String, Document>>>;

#[derive(Debug, Default)]
struct MemoryDatabase {
    collections: RwLock<FxHashMap<String, Collection>>,
}

impl MemoryDatabase {
    fn collection(&self, name: &str) -> Option<Collection> {
        self.collections.read().get(name).cloned()
    }

    fn collection_or_create(&self, name: &str) -> Collection {
        if let Some(existing) = self.collection(name) {
            return existing;
        }
        self.collections
            .write()
            .entry(name.to_string())
            .or_default()
            .clone()
    }
}

/// In-memory `DocumentStore`
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    databases: DashMap<String, Arc<MemoryDatabase>>,
}

impl MemoryDocumentStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in a collection (0 if it does not exist)
    pub fn document_count(&self, db: &str, collection: &str) -> usize {
        self.existing(db, collection)
            .map(|c| c.read().len())
            .unwrap_or(0)
    }

    /// Names of the non-empty collections in a database, sorted
    pub fn collection_names(&self, db: &str) -> Vec<String> {
        let Some(database) = self.databases.get(db).map(|d| Arc::clone(d.value())) else {
            return Vec::new();
        };
        let collections = database.collections.read();
        let mut names: Vec<String> = collections
            .iter()
            .filter(|(_, docs)| !docs.read().is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    fn existing(&self, db: &str, collection: &str) -> Option<Collection> {
        let database = self.databases.get(db).map(|d| Arc::clone(d.value()))?;
        database.collection(collection)
    }

    fn writable(&self, db: &str, collection: &str) -> Collection {
        let database = Arc::clone(self.databases.entry(db.to_string()).or_default().value());
        database.collection_or_create(collection)
    }

    fn write_doc(&self, db: &str, collection: &str, doc: Document, replace: bool) -> StoreResult<()> {
        let id = document_id(&doc)?;
        validate_field_names(&doc).map_err(StoreError::InvalidDocument)?;
        let target = self.writable(db, collection);
        let mut docs = target.write();
        if !replace && docs.contains_key(&id) {
            return Err(StoreError::DuplicateKey {
                collection: collection.to_string(),
                id,
            });
        }
        docs.insert(id, doc);
        Ok(())
    }

    fn update_counter(
        &self,
        db: &str,
        collection: &str,
        id: &str,
        field: &str,
        apply: impl FnOnce(i64) -> Option<i64>,
    ) -> StoreResult<i64> {
        let target = self.writable(db, collection);
        let mut docs = target.write();
        let doc = docs.entry(id.to_string()).or_insert_with(|| {
            let mut fresh = Document::new();
            fresh.insert(ID_FIELD.to_string(), DocValue::String(id.to_string()));
            fresh
        });
        let current = match doc.get(field) {
            None => 0,
            Some(DocValue::Int(v)) => *v,
            Some(other) => {
                return Err(StoreError::InvalidDocument(format!(
                    "counter field '{}' holds non-integer {:?}",
                    field, other
                )))
            }
        };
        let next = apply(current).ok_or_else(|| StoreError::CounterOverflow {
            collection: collection.to_string(),
            id: id.to_string(),
        })?;
        doc.insert(field.to_string(), DocValue::Int(next));
        Ok(next)
    }
}

fn document_id(doc: &Document) -> StoreResult<String> {
    match doc.get(ID_FIELD) {
        Some(DocValue::String(id)) => Ok(id.clone()),
        Some(_) => Err(StoreError::InvalidDocument("_id must be a string".into())),
        None => Err(StoreError::InvalidDocument("missing _id".into())),
    }
}

// Fire-and-forget writes never report failure to the caller.
fn apply_concern<T: Default>(result: StoreResult<T>, concern: WriteConcern, op: &str) -> StoreResult<T> {
    match (result, concern) {
        (Err(e), WriteConcern::Unacknowledged) => {
            warn!(target: "mantle::storage", op, error = %e, "Unacknowledged write failed");
            Ok(T::default())
        }
        (result, _) => result,
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn find(&self, db: &str, collection: &str, query: &FindQuery) -> StoreResult<Vec<Document>> {
        let Some(source) = self.existing(db, collection) else {
            return Ok(Vec::new());
        };
        let mut matched: Vec<Document> = {
            let docs = source.read();
            docs.values()
                .filter(|doc| query.filter.matches(doc))
                .cloned()
                .collect()
        };
        if !query.sort.is_empty() {
            // stable: ties keep `_id` order
            matched.sort_by(|a, b| query.compare(a, b));
        }
        let limit = query.limit.unwrap_or(usize::MAX);
        let out: Vec<Document> = matched.into_iter().skip(query.skip).take(limit).collect();
        debug!(target: "mantle::storage", db, collection, returned = out.len(), "Find completed");
        Ok(out)
    }

    fn upsert(
        &self,
        db: &str,
        collection: &str,
        doc: Document,
        concern: WriteConcern,
    ) -> StoreResult<()> {
        apply_concern(self.write_doc(db, collection, doc, true), concern, "upsert")
    }

    fn insert(
        &self,
        db: &str,
        collection: &str,
        doc: Document,
        concern: WriteConcern,
    ) -> StoreResult<()> {
        apply_concern(self.write_doc(db, collection, doc, false), concern, "insert")
    }

    fn delete_many(
        &self,
        db: &str,
        collection: &str,
        filter: &Filter,
        concern: WriteConcern,
    ) -> StoreResult<u64> {
        let Some(target) = self.existing(db, collection) else {
            return Ok(0);
        };
        let mut docs = target.write();
        let before = docs.len();
        docs.retain(|_, doc| !filter.matches(doc));
        let removed = (before - docs.len()) as u64;
        debug!(target: "mantle::storage", db, collection, removed, "Documents deleted");
        apply_concern(Ok(removed), concern, "delete_many")
    }

    fn increment(
        &self,
        db: &str,
        collection: &str,
        id: &str,
        field: &str,
        by: i64,
    ) -> StoreResult<i64> {
        self.update_counter(db, collection, id, field, |current| current.checked_add(by))
    }

    fn update_max(
        &self,
        db: &str,
        collection: &str,
        id: &str,
        field: &str,
        value: i64,
    ) -> StoreResult<i64> {
        self.update_counter(db, collection, id, field, |current| Some(current.max(value)))
    }

    fn drop_database(&self, db: &str) -> StoreResult<()> {
        let existed = self.databases.remove(db).is_some();
        debug!(target: "mantle::storage", db, existed, "Database dropped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::SortDirection;
    use std::sync::Barrier;
    use std::thread;

    fn doc(id: &str, pairs: Vec<(&str, DocValue)>) -> Document {
        let mut d: Document = pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        d.insert(ID_FIELD.to_string(), DocValue::from(id));
        d
    }

    fn seeded() -> MemoryDocumentStore {
        let store = MemoryDocumentStore::new();
        for (id, n) in [("c", 1), ("a", 3), ("b", 2)] {
            store
                .upsert("db", "K", doc(id, vec![("n", DocValue::Int(n))]), WriteConcern::Acknowledged)
                .unwrap();
        }
        store
    }

    #[test]
    fn test_natural_order_is_id_order() {
        let store = seeded();
        let all = store.find("db", "K", &FindQuery::new(Filter::all())).unwrap();
        let ids: Vec<&str> = all.iter().map(|d| d[ID_FIELD].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_sort_skip_limit() {
        let store = seeded();
        let q = FindQuery::new(Filter::all())
            .sort_by("n", SortDirection::Descending)
            .skip(1)
            .limit(1);
        let out = store.find("db", "K", &q).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["n"], DocValue::Int(2));
    }

    #[test]
    fn test_missing_collection_reads_empty() {
        let store = MemoryDocumentStore::new();
        assert!(store.find("db", "none", &FindQuery::new(Filter::all())).unwrap().is_empty());
        assert_eq!(
            store.delete_many("db", "none", &Filter::all(), WriteConcern::Acknowledged).unwrap(),
            0
        );
    }

    #[test]
    fn test_upsert_replaces() {
        let store = seeded();
        store
            .upsert("db", "K", doc("a", vec![]), WriteConcern::Acknowledged)
            .unwrap();
        let out = store
            .find("db", "K", &FindQuery::new(Filter::Eq(ID_FIELD.into(), DocValue::from("a"))))
            .unwrap();
        assert_eq!(out[0].len(), 1);
    }

    #[test]
    fn test_insert_rejects_duplicates() {
        let store = seeded();
        let err = store
            .insert("db", "K", doc("a", vec![]), WriteConcern::Acknowledged)
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { .. }));
    }

    #[test]
    fn test_unacknowledged_swallows_errors() {
        let store = MemoryDocumentStore::new();
        let bad = doc("x", vec![("a.b", DocValue::Null)]);
        assert!(store.upsert("db", "K", bad.clone(), WriteConcern::Unacknowledged).is_ok());
        assert!(matches!(
            store.upsert("db", "K", bad, WriteConcern::Acknowledged),
            Err(StoreError::InvalidDocument(_))
        ));
        assert_eq!(store.document_count("db", "K"), 0);
    }

    #[test]
    fn test_missing_id_rejected() {
        let store = MemoryDocumentStore::new();
        let err = store
            .upsert("db", "K", Document::new(), WriteConcern::Acknowledged)
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidDocument(_)));
    }

    #[test]
    fn test_increment_and_update_max() {
        let store = MemoryDocumentStore::new();
        assert_eq!(store.increment("db", "c", "k", "next", 5).unwrap(), 5);
        assert_eq!(store.increment("db", "c", "k", "next", 1).unwrap(), 6);
        assert_eq!(store.update_max("db", "c", "k", "next", 3).unwrap(), 6);
        assert_eq!(store.update_max("db", "c", "k", "next", 10).unwrap(), 10);
    }

    #[test]
    fn test_increment_overflow() {
        let store = MemoryDocumentStore::new();
        store.update_max("db", "c", "k", "next", i64::MAX).unwrap();
        assert!(matches!(
            store.increment("db", "c", "k", "next", 1),
            Err(StoreError::CounterOverflow { .. })
        ));
    }

    #[test]
    fn test_concurrent_increments_do_not_lose_updates() {
        let store = Arc::new(MemoryDocumentStore::new());
        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..100 {
                        store.increment("db", "c", "k", "next", 1).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.increment("db", "c", "k", "next", 0).unwrap(), 800);
    }

    #[test]
    fn test_drop_database() {
        let store = seeded();
        store.upsert("other", "K", doc("z", vec![]), WriteConcern::Acknowledged).unwrap();
        store.drop_database("db").unwrap();
        assert_eq!(store.document_count("db", "K"), 0);
        assert_eq!(store.document_count("other", "K"), 1);
        assert_eq!(store.collection_names("other"), vec!["K".to_string()]);
    }
}
