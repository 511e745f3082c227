//! Pluggable datastore service
//!
//! `DatastoreService` assembles the engine for one application: codec,
//! allocator, write coordinator and query executor share one injected
//! document-store handle. The process hosting the service owns the store
//! and registers the service under [`SERVICE_NAME`].

use crate::allocator::IdAllocator;
use crate::codec::EntityCodec;
use crate::config::AdapterConfig;
use crate::coordinator::{WriteCoordinator, WriteMetrics};
use crate::error::{Error, Result};
use crate::query::{Query, QueryExecutor, QueryResult};
use crate::schema::KindSchema;
use mantle_core::{Entity, Key};
use mantle_storage::DocumentStore;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Name the service is registered under
pub const SERVICE_NAME: &str = "datastore_v3";

/// Service request
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Look up entities by key
    Get(Vec<Key>),
    /// Write entities
    Put(Vec<Entity>),
    /// Delete entities by key
    Delete(Vec<Key>),
    /// Run a query
    RunQuery(Query),
    /// Count query results
    Count(Query),
    /// Allocate `count` ids in the scope (kind and parent) of `scope`
    AllocateIds {
        /// Key whose kind and parent define the id scope
        scope: Key,
        /// Number of ids
        count: usize,
    },
    /// Mark the numeric ids of these keys as used
    ReserveIds(Vec<Key>),
    /// Property types recorded for a kind
    Schema(String),
}

impl Request {
    /// RPC method name
    pub fn method(&self) -> &'static str {
        match self {
            Request::Get(_) => "Get",
            Request::Put(_) => "Put",
            Request::Delete(_) => "Delete",
            Request::RunQuery(_) => "RunQuery",
            Request::Count(_) => "Count",
            Request::AllocateIds { .. } => "AllocateIds",
            Request::ReserveIds(_) => "ReserveIds",
            Request::Schema(_) => "Schema",
        }
    }
}

/// Service response, one variant per request
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Entities in request order, `None` for absent keys
    Get(Vec<Option<Entity>>),
    /// Complete keys in request order
    Put(Vec<Key>),
    /// Delete finished
    Delete,
    /// One page of results
    RunQuery(QueryResult),
    /// Result count
    Count(usize),
    /// Allocated keys
    AllocateIds(Vec<Key>),
    /// Reservation finished
    ReserveIds,
    /// Recorded property types, `None` for a kind never written
    Schema(Option<KindSchema>),
}

/// Datastore service over a document store
pub struct DatastoreService {
    store: Arc<dyn DocumentStore>,
    config: AdapterConfig,
    allocator: Arc<IdAllocator>,
    writer: WriteCoordinator,
    queries: QueryExecutor,
}

impl DatastoreService {
    /// Assemble the service
    ///
    /// # Errors
    ///
    /// `Error::Config` if the configuration is invalid.
    pub fn new(store: Arc<dyn DocumentStore>, config: AdapterConfig) -> Result<Self> {
        config.validate()?;
        let concern = config.durability_mode()?;
        let policy = config.id_policy()?;
        let codec = EntityCodec::default();
        let allocator = Arc::new(IdAllocator::new(store.clone(), config.app_id.clone()));
        let writer = WriteCoordinator::new(
            store.clone(),
            config.app_id.clone(),
            codec.clone(),
            allocator.clone(),
            policy,
            concern,
            config.read_retries,
        );
        let queries = QueryExecutor::new(store.clone(), &config, codec);
        info!(
            target: "mantle::service",
            service = SERVICE_NAME,
            app_id = %config.app_id,
            durability = %config.durability,
            id_policy = %config.id_policy,
            "Datastore service created"
        );
        Ok(Self {
            store,
            config,
            allocator,
            writer,
            queries,
        })
    }

    /// Configuration in effect
    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    /// Write entities; see [`WriteCoordinator::put`]
    pub fn put(&self, entities: &[Entity]) -> Result<Vec<Key>> {
        self.writer.put(entities)
    }

    /// Look up entities; see [`WriteCoordinator::get`]
    pub fn get(&self, keys: &[Key]) -> Result<Vec<Option<Entity>>> {
        self.writer.get(keys)
    }

    /// Delete entities; see [`WriteCoordinator::delete`]
    pub fn delete(&self, keys: &[Key]) -> Result<()> {
        self.writer.delete(keys)
    }

    /// Run a query; see [`QueryExecutor::run`]
    pub fn run_query(&self, query: &Query) -> Result<QueryResult> {
        self.queries.run(query)
    }

    /// Count query results; see [`QueryExecutor::count`]
    pub fn count(&self, query: &Query) -> Result<usize> {
        self.queries.count(query)
    }

    /// Allocate ids in the scope of `scope` under the configured policy
    ///
    /// Returns complete keys that share `scope`'s kind and parent.
    pub fn allocate_ids(&self, scope: &Key, count: usize) -> Result<Vec<Key>> {
        let parent = scope.parent();
        let ids = self.allocator.allocate_ids(
            scope.kind(),
            parent.as_ref(),
            count,
            self.config.id_policy()?,
        )?;
        Ok(ids.into_iter().map(|id| scope.with_allocated_id(id)).collect())
    }

    /// Reserve the numeric ids of complete keys
    ///
    /// # Errors
    ///
    /// `Error::Encode` for keys without a numeric id.
    pub fn reserve_ids(&self, keys: &[Key]) -> Result<()> {
        let mut scopes: BTreeMap<(String, Option<Key>), Vec<i64>> = BTreeMap::new();
        for key in keys {
            let id = key
                .id()
                .filter(|id| *id > 0)
                .ok_or_else(|| Error::encode(format!("key {} has no numeric id to reserve", key)))?;
            scopes
                .entry((key.kind().to_string(), key.parent()))
                .or_default()
                .push(id);
        }
        for ((kind, parent), ids) in scopes {
            self.allocator.reserve_ids(&kind, parent.as_ref(), &ids)?;
        }
        Ok(())
    }

    /// Property types recorded for `kind` by earlier puts
    pub fn schema(&self, kind: &str) -> Result<Option<KindSchema>> {
        self.writer.schema().kind_schema(kind)
    }

    /// Property type records of every kind written so far
    pub fn schemas(&self) -> Result<Vec<KindSchema>> {
        self.writer.schema().all()
    }

    /// Drop every entity, counter, id claim and schema record of this
    /// application
    ///
    /// Destructive and not recoverable.
    pub fn clear(&self) -> Result<()> {
        self.store.drop_database(&self.config.app_id)?;
        self.writer.schema().forget();
        info!(target: "mantle::service", app_id = %self.config.app_id, "Application data cleared");
        Ok(())
    }

    /// Write counters of this service
    pub fn metrics(&self) -> WriteMetrics {
        self.writer.metrics()
    }

    /// RPC entry point
    pub fn call(&self, request: Request) -> Result<Response> {
        let method = request.method();
        let response = match request {
            Request::Get(keys) => Response::Get(self.get(&keys)?),
            Request::Put(entities) => Response::Put(self.put(&entities)?),
            Request::Delete(keys) => {
                self.delete(&keys)?;
                Response::Delete
            }
            Request::RunQuery(query) => Response::RunQuery(self.run_query(&query)?),
            Request::Count(query) => Response::Count(self.count(&query)?),
            Request::AllocateIds { scope, count } => {
                Response::AllocateIds(self.allocate_ids(&scope, count)?)
            }
            Request::ReserveIds(keys) => {
                self.reserve_ids(&keys)?;
                Response::ReserveIds
            }
            Request::Schema(kind) => Response::Schema(self.schema(&kind)?),
        };
        debug!(target: "mantle::service", method, "Call completed");
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mantle_storage::MemoryDocumentStore;

    fn service() -> DatastoreService {
        DatastoreService::new(Arc::new(MemoryDocumentStore::new()), AdapterConfig::for_app("app"))
            .unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = AdapterConfig::for_app("app");
        config.id_policy = "random".into();
        let result = DatastoreService::new(Arc::new(MemoryDocumentStore::new()), config);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_call_dispatch() {
        let svc = service();
        let alice = Entity::new(Key::with_name("Person", "alice")).with("age", 30i64);
        let put = svc.call(Request::Put(vec![alice.clone()])).unwrap();
        assert_eq!(put, Response::Put(vec![alice.key.clone()]));
        let got = svc.call(Request::Get(vec![alice.key.clone()])).unwrap();
        assert_eq!(got, Response::Get(vec![Some(alice)]));
        let count = svc.call(Request::Count(Query::new("Person"))).unwrap();
        assert_eq!(count, Response::Count(1));
    }

    #[test]
    fn test_allocate_ids_returns_keys_in_scope() {
        let svc = service();
        let parent = Key::with_name("Team", "red");
        let keys = svc.allocate_ids(&parent.incomplete_child("Player"), 2).unwrap();
        assert_eq!(keys, vec![parent.child("Player", 1i64), parent.child("Player", 2i64)]);
    }

    #[test]
    fn test_reserve_ids_requires_numeric_ids() {
        let svc = service();
        assert!(svc.reserve_ids(&[Key::with_id("K", 5)]).is_ok());
        assert!(matches!(
            svc.reserve_ids(&[Key::with_name("K", "x")]),
            Err(Error::Encode(_))
        ));
        let keys = svc.allocate_ids(&Key::incomplete("K"), 1).unwrap();
        assert_eq!(keys, vec![Key::with_id("K", 6)]);
    }

    #[test]
    fn test_clear_drops_everything() {
        let svc = service();
        svc.put(&[Entity::new(Key::incomplete("K"))]).unwrap();
        svc.clear().unwrap();
        assert_eq!(svc.count(&Query::new("K")).unwrap(), 0);
        // counters are gone too
        let keys = svc.put(&[Entity::new(Key::incomplete("K"))]).unwrap();
        assert_eq!(keys, vec![Key::with_id("K", 1)]);
    }
}
