//! Mantle - datastore emulation over a document database
//!
//! Mantle lets code written against a datastore contract (typed entities,
//! hierarchical keys, declarative queries with cursors) run on a document
//! store. Datastore ordering and type comparison follow the reference rules
//! exactly, whatever the store's native ordering.
//!
//! # Quick Start
//!
//! ```
//! use mantle::{AdapterConfig, DatastoreService, Direction, Entity, Key, MemoryDocumentStore, Operator, Query};
//! use std::sync::Arc;
//!
//! let service = DatastoreService::new(
//!     Arc::new(MemoryDocumentStore::new()),
//!     AdapterConfig::for_app("guestbook"),
//! )?;
//!
//! service.put(&[Entity::new(Key::with_name("Person", "alice")).with("age", 30i64)])?;
//!
//! let page = service.run_query(
//!     &Query::new("Person")
//!         .filter("age", Operator::GreaterThanOrEqual, 25i64)
//!         .order("age", Direction::Ascending),
//! )?;
//! assert_eq!(page.items.len(), 1);
//! # Ok::<(), mantle::Error>(())
//! ```
//!
//! # Architecture
//!
//! - [`mantle_core`]: keys, values, entities and the reference ordering
//! - [`mantle_storage`]: the document-store driver seam and an in-memory driver
//! - [`mantle_engine`]: codecs, id allocation, queries, cursors, writes and the service

pub use mantle_core::{Entity, GeoPoint, Key, Property, Timestamp, Value};
pub use mantle_engine::*;
pub use mantle_storage::{DocumentStore, MemoryDocumentStore, StoreError, WriteConcern};
