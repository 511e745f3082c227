//! Translation engine for Mantle
//!
//! This crate maps the datastore contract onto a document store:
//! - codec: key and entity encoding with per-value type tags
//! - allocator: sequential and scattered id allocation per (kind, parent)
//! - query: validation, native prefilters and reference-order evaluation
//! - cursor: opaque resumption tokens
//! - coordinator: batched put, get and delete
//! - schema: per-kind property type records kept up to date by puts
//! - service: the pluggable `datastore_v3` service and its dispatcher
//!
//! The engine is the only component that knows both the datastore
//! semantics and the document layout. The store handle is injected; the
//! engine keeps no entity data between requests.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod allocator;
pub mod codec;
pub mod config;
pub mod coordinator;
pub mod cursor;
pub mod error;
pub mod query;
mod retry;
pub mod schema;
pub mod service;

pub use allocator::{IdAllocator, IdPolicy};
pub use codec::{EntityCodec, KeyCodec};
pub use config::{AdapterConfig, CONFIG_FILE_NAME};
pub use coordinator::{WriteCoordinator, WriteMetrics};
pub use cursor::{Cursor, CursorCodec, CursorPosition};
pub use error::{EntityFailure, Error, ErrorKind, Result};
pub use query::{
    Direction, Operator, PropertyFilter, Query, QueryExecutor, QueryResult, QueryResultItem,
    SortOrder,
};
pub use schema::{KindSchema, SchemaRegistry, SCHEMA_COLLECTION};
pub use service::{DatastoreService, Request, Response, SERVICE_NAME};
