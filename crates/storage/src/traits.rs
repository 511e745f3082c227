//! The document-store driver seam
//!
//! The engine depends only on this narrow capability set: find with
//! filter/sort/skip/limit, upsert and insert by `_id`, delete, an atomic
//! counter increment, and dropping a whole database. Any document database
//! driver that offers those can sit behind `DocumentStore`.

use crate::document::Document;
use crate::error::StoreResult;
use crate::filter::{Filter, FindQuery};
use serde::{Deserialize, Serialize};

/// Acknowledgment level requested for a write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WriteConcern {
    /// Return once the store has acknowledged the write; failures are reported
    #[default]
    Acknowledged,
    /// Fire-and-forget: return immediately, failures are not reported
    Unacknowledged,
}

/// Document database driver
///
/// Every method addresses a `(database, collection)` pair. Databases and
/// collections spring into existence on first write and reads against
/// missing ones return nothing.
///
/// Implementations must be safe for concurrent use; single-document writes
/// are atomic, multi-document operations are not.
pub trait DocumentStore: Send + Sync {
    /// Documents matching `query`, sorted, skipped and limited
    ///
    /// Ties under `query.sort` (and an empty sort) fall back to `_id`
    /// ascending.
    fn find(&self, db: &str, collection: &str, query: &FindQuery) -> StoreResult<Vec<Document>>;

    /// Replace or insert the document with `doc["_id"]`
    ///
    /// `_id` must be a string.
    fn upsert(&self, db: &str, collection: &str, doc: Document, concern: WriteConcern)
        -> StoreResult<()>;

    /// Insert a new document; `DuplicateKey` if `_id` exists
    fn insert(&self, db: &str, collection: &str, doc: Document, concern: WriteConcern)
        -> StoreResult<()>;

    /// Delete every matching document, returning how many were removed
    fn delete_many(
        &self,
        db: &str,
        collection: &str,
        filter: &Filter,
        concern: WriteConcern,
    ) -> StoreResult<u64>;

    /// Atomically add `by` to integer `field` of document `id`, creating
    /// it at zero first; returns the new value
    fn increment(&self, db: &str, collection: &str, id: &str, field: &str, by: i64)
        -> StoreResult<i64>;

    /// Atomically raise integer `field` of document `id` to at least
    /// `value`; returns the resulting value
    fn update_max(&self, db: &str, collection: &str, id: &str, field: &str, value: i64)
        -> StoreResult<i64>;

    /// Drop a database with every collection in it
    fn drop_database(&self, db: &str) -> StoreResult<()>;
}
