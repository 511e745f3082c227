//! Storage layer for Mantle
//!
//! This crate is the document-store driver seam:
//! - DocValue/Document: the store's record model and native comparison
//! - Filter/FindQuery: the native query form
//! - DocumentStore: the narrow driver capability set the engine consumes
//! - MemoryDocumentStore: DashMap + FxHashMap in-process driver
//!
//! The engine never assumes the store orders values the way the datastore
//! does; see `document::native_cmp` for where they differ.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod document;
pub mod error;
pub mod filter;
pub mod memory;
pub mod traits;

pub use document::{native_cmp, DocValue, Document, ID_FIELD};
pub use error::{StoreError, StoreResult};
pub use filter::{Filter, FindQuery, SortDirection};
pub use memory::MemoryDocumentStore;
pub use traits::{DocumentStore, WriteConcern};
