//! Write coordinator for batched put, get and delete
//!
//! A put runs in three phases:
//! 1. Encode every entity. Any encoding failure rejects the whole batch
//!    before the store is touched.
//! 2. Allocate ids for incomplete keys (grouped per kind and parent) and
//!    reserve caller-chosen numeric ids so allocation never hands them out.
//! 3. Stamp `_seq`, record the batch's property types in the schema
//!    registry, and upsert each record independently. Entities are
//!    written one by one with no cross-entity atomicity; per-entity
//!    failures are collected into `Error::PartialBatch`.
//!
//! Under the fire-and-forget durability mode the store does not report
//! write failures, so a batch always appears to succeed.

use crate::allocator::{IdAllocator, IdPolicy, COUNTERS_COLLECTION, COUNTER_FIELD};
use crate::codec::{EntityCodec, KeyCodec, SEQ_FIELD};
use crate::error::{EntityFailure, Error, Result};
use crate::retry::read_with_retries;
use crate::schema::SchemaRegistry;
use mantle_core::{Entity, Key};
use mantle_storage::{DocValue, DocumentStore, Filter, FindQuery, WriteConcern, ID_FIELD};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Counter document backing `_seq`
pub const SEQUENCE_COUNTER: &str = "__seq__";

/// Write counters
///
/// Counters use Relaxed ordering; they are observational only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteMetrics {
    /// Entities written
    pub written: u64,
    /// Entity writes that failed
    pub failed: u64,
    /// Documents removed by deletes
    pub deleted: u64,
}

/// Executes batched writes and key lookups for one application database
pub struct WriteCoordinator {
    store: Arc<dyn DocumentStore>,
    db: String,
    codec: EntityCodec,
    allocator: Arc<IdAllocator>,
    policy: IdPolicy,
    concern: WriteConcern,
    read_retries: u32,
    schema: SchemaRegistry,
    total_written: AtomicU64,
    total_failed: AtomicU64,
    total_deleted: AtomicU64,
}

impl WriteCoordinator {
    /// Create a coordinator
    ///
    /// # Arguments
    /// * `policy` - allocation policy for incomplete keys
    /// * `concern` - write concern for entity writes and deletes
    pub fn new(
        store: Arc<dyn DocumentStore>,
        db: impl Into<String>,
        codec: EntityCodec,
        allocator: Arc<IdAllocator>,
        policy: IdPolicy,
        concern: WriteConcern,
        read_retries: u32,
    ) -> Self {
        let db: String = db.into();
        let schema = SchemaRegistry::new(store.clone(), db.clone(), concern, read_retries);
        Self {
            store,
            db,
            codec,
            allocator,
            policy,
            concern,
            read_retries,
            schema,
            total_written: AtomicU64::new(0),
            total_failed: AtomicU64::new(0),
            total_deleted: AtomicU64::new(0),
        }
    }

    /// Write entities, returning their complete keys in input order
    ///
    /// # Errors
    ///
    /// `Encode` if any entity cannot be encoded (nothing is written),
    /// `Allocation` if ids cannot be allocated or reserved, `Storage` if the
    /// sequence counter or schema record cannot be updated (nothing is
    /// written), and `PartialBatch` when some entity writes failed.
    pub fn put(&self, entities: &[Entity]) -> Result<Vec<Key>> {
        if entities.is_empty() {
            return Ok(Vec::new());
        }

        // Phase 1: encode with a placeholder id for incomplete keys
        let mut records = Vec::with_capacity(entities.len());
        for entity in entities {
            if entity.key.is_complete() {
                records.push(self.codec.to_record(entity)?);
            } else {
                if let Some(parent) = entity.key.parent() {
                    if !parent.is_complete() {
                        return Err(Error::encode(format!("parent key {} is incomplete", parent)));
                    }
                }
                let mut probe = entity.clone();
                probe.key = entity.key.with_allocated_id(1);
                records.push(self.codec.to_record(&probe)?);
            }
        }

        // Phase 2: complete the keys
        let keys = self.complete_keys(entities)?;
        self.reserve_explicit_ids(entities)?;

        // Phase 3: write
        let count = i64::try_from(entities.len())
            .map_err(|_| Error::encode("batch too large"))?;
        let last_seq = self
            .store
            .increment(&self.db, COUNTERS_COLLECTION, SEQUENCE_COUNTER, COUNTER_FIELD, count)?;
        let first_seq = last_seq - count + 1;
        self.schema.record(entities)?;

        let mut completed = Vec::with_capacity(keys.len());
        let mut failures = Vec::new();
        for (index, (mut record, key)) in records.into_iter().zip(keys.iter()).enumerate() {
            record.insert(ID_FIELD.to_string(), DocValue::String(KeyCodec::encode(key)));
            record.insert(SEQ_FIELD.to_string(), DocValue::Int(first_seq + index as i64));
            match self.store.upsert(&self.db, key.kind(), record, self.concern) {
                Ok(()) => completed.push(key.clone()),
                Err(error) => {
                    warn!(target: "mantle::write", %key, %error, "Entity write failed");
                    failures.push(EntityFailure {
                        index,
                        key: key.clone(),
                        error,
                    });
                }
            }
        }

        self.total_written
            .fetch_add(completed.len() as u64, Ordering::Relaxed);
        self.total_failed
            .fetch_add(failures.len() as u64, Ordering::Relaxed);
        debug!(
            target: "mantle::write",
            written = completed.len(),
            failed = failures.len(),
            concern = ?self.concern,
            "Put completed"
        );
        if failures.is_empty() {
            Ok(keys)
        } else {
            Err(Error::PartialBatch {
                completed,
                failures,
            })
        }
    }

    /// Look up entities by key
    ///
    /// Returns one slot per input key, in input order; `None` marks a key
    /// with no stored entity.
    ///
    /// # Errors
    ///
    /// `Encode` for incomplete or invalid keys, `Decode` for corrupt
    /// records, `Storage` when the find fails after retries.
    pub fn get(&self, keys: &[Key]) -> Result<Vec<Option<Entity>>> {
        let by_kind = group_encoded(keys)?;
        let mut found: FxHashMap<String, Entity> = FxHashMap::default();
        for (kind, ids) in &by_kind {
            let query = FindQuery::new(Filter::In(
                ID_FIELD.to_string(),
                ids.iter().cloned().map(DocValue::String).collect(),
            ));
            let docs = read_with_retries(self.read_retries, "get", || {
                self.store.find(&self.db, kind, &query)
            })?;
            for doc in &docs {
                let entity = self.codec.from_record(doc)?;
                found.insert(KeyCodec::encode(&entity.key), entity);
            }
        }
        debug!(target: "mantle::write", requested = keys.len(), found = found.len(), "Get completed");
        Ok(keys
            .iter()
            .map(|key| found.get(&KeyCodec::encode(key)).cloned())
            .collect())
    }

    /// Delete entities by key; absent keys are ignored
    ///
    /// # Errors
    ///
    /// `Encode` for incomplete or invalid keys, `Storage` for driver failures.
    pub fn delete(&self, keys: &[Key]) -> Result<()> {
        let by_kind = group_encoded(keys)?;
        let mut removed = 0;
        for (kind, ids) in by_kind {
            let filter = Filter::In(
                ID_FIELD.to_string(),
                ids.into_iter().map(DocValue::String).collect(),
            );
            removed += self.store.delete_many(&self.db, &kind, &filter, self.concern)?;
        }
        self.total_deleted.fetch_add(removed, Ordering::Relaxed);
        debug!(target: "mantle::write", requested = keys.len(), removed, "Delete completed");
        Ok(())
    }

    /// Property type records maintained by [`WriteCoordinator::put`]
    pub fn schema(&self) -> &SchemaRegistry {
        &self.schema
    }

    /// Snapshot of the write counters
    pub fn metrics(&self) -> WriteMetrics {
        WriteMetrics {
            written: self.total_written.load(Ordering::Relaxed),
            failed: self.total_failed.load(Ordering::Relaxed),
            deleted: self.total_deleted.load(Ordering::Relaxed),
        }
    }

    fn complete_keys(&self, entities: &[Entity]) -> Result<Vec<Key>> {
        // (kind, parent) -> positions of incomplete keys
        let mut groups: BTreeMap<(String, Option<Key>), Vec<usize>> = BTreeMap::new();
        for (i, entity) in entities.iter().enumerate() {
            if !entity.key.is_complete() {
                groups
                    .entry((entity.key.kind().to_string(), entity.key.parent()))
                    .or_default()
                    .push(i);
            }
        }
        let mut keys: Vec<Key> = entities.iter().map(|e| e.key.clone()).collect();
        for ((kind, parent), positions) in groups {
            let ids = self
                .allocator
                .allocate_ids(&kind, parent.as_ref(), positions.len(), self.policy)?;
            for (position, id) in positions.into_iter().zip(ids) {
                keys[position] = keys[position].with_allocated_id(id);
            }
        }
        Ok(keys)
    }

    fn reserve_explicit_ids(&self, entities: &[Entity]) -> Result<()> {
        let mut groups: BTreeMap<(String, Option<Key>), Vec<i64>> = BTreeMap::new();
        for entity in entities {
            if let Some(id) = entity.key.id().filter(|id| *id > 0) {
                groups
                    .entry((entity.key.kind().to_string(), entity.key.parent()))
                    .or_default()
                    .push(id);
            }
        }
        for ((kind, parent), ids) in groups {
            self.allocator.reserve_ids(&kind, parent.as_ref(), &ids)?;
        }
        Ok(())
    }
}

// Encoded keys grouped by kind; rejects keys that cannot address an entity.
fn group_encoded(keys: &[Key]) -> Result<BTreeMap<String, Vec<String>>> {
    let mut by_kind: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for key in keys {
        key.validate()?;
        if !key.is_complete() {
            return Err(Error::encode(format!("key {} is incomplete", key)));
        }
        by_kind
            .entry(key.kind().to_string())
            .or_default()
            .push(KeyCodec::encode(key));
    }
    Ok(by_kind)
}
