//! Entity id allocation
//!
//! Ids are allocated per `(kind, parent)` from two disjoint ranges:
//!
//! - **Sequential** ids come from `[1, 2^52)`, handed out by an atomic
//!   increment of a counter document in `__counters__`. Every explicitly
//!   written id below `2^52` raises the counter, so a sequential id is
//!   always greater than any such id written for the pair.
//! - **Scattered** ids are drawn at random from `[2^52, 2^53)`. Each draw is
//!   claimed by inserting a marker document into `__allocations__`; a
//!   duplicate-key failure or an existing entity with that id means the draw
//!   is discarded. Draws for one `(kind, parent)` are serialized by a
//!   per-pair mutex so the check and the claim happen together. The mutex
//!   is dropped from the lock table once no caller holds it. Explicitly
//!   written ids at or above `2^52` are claimed the same way.
//!
//! Both counters and claims live in the store, so a restarted process never
//! reuses an id.

use crate::codec::KeyCodec;
use crate::error::{Error, Result};
use dashmap::DashMap;
use mantle_core::Key;
use mantle_storage::{
    DocValue, Document, DocumentStore, Filter, FindQuery, StoreError, WriteConcern, ID_FIELD,
};
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Collection holding sequential counters
pub const COUNTERS_COLLECTION: &str = "__counters__";
/// Collection holding scattered and reserved id claims
pub const ALLOCATIONS_COLLECTION: &str = "__allocations__";
/// Counter field of a counter document
pub const COUNTER_FIELD: &str = "next";

/// Largest sequential id
pub const SEQUENTIAL_MAX: i64 = (1 << 52) - 1;
/// Smallest scattered id
pub const SCATTERED_MIN: i64 = 1 << 52;
/// One past the largest scattered id
pub const SCATTERED_END: i64 = 1 << 53;

const MAX_DRAWS: usize = 32;

/// Id allocation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IdPolicy {
    /// Contiguous increasing ids
    #[default]
    Sequential,
    /// Sparse pseudo-random ids
    Scattered,
}

/// Allocates and reserves entity ids against a document store
pub struct IdAllocator {
    store: Arc<dyn DocumentStore>,
    db: String,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl IdAllocator {
    /// Allocator for the application database `db`
    pub fn new(store: Arc<dyn DocumentStore>, db: impl Into<String>) -> Self {
        Self {
            store,
            db: db.into(),
            locks: DashMap::new(),
        }
    }

    /// Allocate `count` ids for `(kind, parent)`
    ///
    /// # Errors
    ///
    /// `Error::Encode` for an invalid kind or parent, `Error::Allocation` when
    /// the id space is exhausted or the store fails.
    pub fn allocate_ids(
        &self,
        kind: &str,
        parent: Option<&Key>,
        count: usize,
        policy: IdPolicy,
    ) -> Result<Vec<i64>> {
        check_scope(kind, parent)?;
        if count == 0 {
            return Ok(Vec::new());
        }
        let counter = KeyCodec::counter_id(kind, parent);
        let ids = match policy {
            IdPolicy::Sequential => self.allocate_sequential(&counter, count)?,
            IdPolicy::Scattered => self.allocate_scattered(kind, parent, &counter, count)?,
        };
        debug!(target: "mantle::alloc", kind, count, ?policy, "Ids allocated");
        Ok(ids)
    }

    /// Mark externally chosen ids as used so allocation never returns them
    ///
    /// # Errors
    ///
    /// `Error::Encode` for non-positive ids or an invalid scope,
    /// `Error::Allocation` when the store fails.
    pub fn reserve_ids(&self, kind: &str, parent: Option<&Key>, ids: &[i64]) -> Result<()> {
        check_scope(kind, parent)?;
        if let Some(bad) = ids.iter().find(|id| **id <= 0) {
            return Err(Error::encode(format!("cannot reserve id {}", bad)));
        }
        let counter = KeyCodec::counter_id(kind, parent);
        if let Some(highest) = ids.iter().copied().filter(|id| *id < SCATTERED_MIN).max() {
            self.store
                .update_max(&self.db, COUNTERS_COLLECTION, &counter, COUNTER_FIELD, highest)
                .map_err(|e| alloc_failure("reserve", e))?;
        }
        for id in ids.iter().copied().filter(|id| *id >= SCATTERED_MIN) {
            self.claim(&counter, id).map_err(|e| alloc_failure("reserve", e))?;
        }
        debug!(target: "mantle::alloc", kind, count = ids.len(), "Ids reserved");
        Ok(())
    }

    fn allocate_sequential(&self, counter: &str, count: usize) -> Result<Vec<i64>> {
        let by = i64::try_from(count)
            .map_err(|_| Error::Allocation(format!("cannot allocate {} ids", count)))?;
        let last = self
            .store
            .increment(&self.db, COUNTERS_COLLECTION, counter, COUNTER_FIELD, by)
            .map_err(|e| alloc_failure("increment", e))?;
        if last > SEQUENTIAL_MAX {
            return Err(Error::Allocation("sequential id space exhausted".into()));
        }
        Ok((last - by + 1..=last).collect())
    }

    fn allocate_scattered(
        &self,
        kind: &str,
        parent: Option<&Key>,
        counter: &str,
        count: usize,
    ) -> Result<Vec<i64>> {
        let lock = self.locks.entry(counter.to_string()).or_default().clone();
        let drawn = {
            let _guard = lock.lock();
            self.draw_scattered(kind, parent, counter, count)
        };
        drop(lock);
        // The table's own reference is the last one once every caller is done.
        self.locks.remove_if(counter, |_, held| Arc::strong_count(held) == 1);
        drawn
    }

    fn draw_scattered(
        &self,
        kind: &str,
        parent: Option<&Key>,
        counter: &str,
        count: usize,
    ) -> Result<Vec<i64>> {
        let mut rng = rand::thread_rng();
        let mut ids = Vec::with_capacity(count);
        while ids.len() < count {
            let mut drawn = None;
            for _ in 0..MAX_DRAWS {
                let candidate = rng.gen_range(SCATTERED_MIN..SCATTERED_END);
                if self.entity_exists(kind, parent, candidate)? {
                    continue;
                }
                if self.claim(counter, candidate).map_err(|e| alloc_failure("claim", e))? {
                    drawn = Some(candidate);
                    break;
                }
            }
            match drawn {
                Some(id) => ids.push(id),
                None => {
                    return Err(Error::Allocation(format!(
                        "no free scattered id after {} draws",
                        MAX_DRAWS
                    )))
                }
            }
        }
        Ok(ids)
    }

    fn entity_exists(&self, kind: &str, parent: Option<&Key>, id: i64) -> Result<bool> {
        let key = match parent {
            Some(p) => p.child(kind, id),
            None => Key::with_id(kind, id),
        };
        let query = FindQuery::new(Filter::Eq(
            ID_FIELD.to_string(),
            DocValue::String(KeyCodec::encode(&key)),
        ))
        .limit(1);
        let found = self
            .store
            .find(&self.db, kind, &query)
            .map_err(|e| alloc_failure("lookup", e))?;
        Ok(!found.is_empty())
    }

    // Ok(false) when the id was already claimed.
    fn claim(&self, counter: &str, id: i64) -> std::result::Result<bool, StoreError> {
        let mut marker = Document::new();
        marker.insert(
            ID_FIELD.to_string(),
            DocValue::String(format!("{}\0{:016X}", counter, id)),
        );
        match self
            .store
            .insert(&self.db, ALLOCATIONS_COLLECTION, marker, WriteConcern::Acknowledged)
        {
            Ok(()) => Ok(true),
            Err(StoreError::DuplicateKey { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

fn check_scope(kind: &str, parent: Option<&Key>) -> Result<()> {
    let probe = match parent {
        Some(p) => {
            if !p.is_complete() {
                return Err(Error::encode(format!("parent key {} is incomplete", p)));
            }
            p.child(kind, 1)
        }
        None => Key::with_id(kind, 1),
    };
    probe.validate()?;
    Ok(())
}

fn alloc_failure(op: &str, e: StoreError) -> Error {
    Error::Allocation(format!("{} failed: {}", op, e))
}
