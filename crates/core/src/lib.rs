//! Core types for Mantle
//!
//! This crate defines the datastore data model that every other layer
//! speaks:
//! - Key: hierarchical entity key (kind + ancestor chain + id or name)
//! - Value / Property: discriminated property values, single or repeated
//! - Entity: a key plus a property bag and its unindexed names
//! - Timestamp: microsecond timestamps for `Value::Timestamp`
//! - order: the reference comparator table for mixed-type ordering
//! - Limits: key and nesting limits enforced on write

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod entity;
pub mod key;
pub mod limits;
pub mod order;
pub mod timestamp;
pub mod value;

pub use entity::Entity;
pub use key::{IdOrName, Key, KeyError, PathElement, KEY_PROPERTY};
pub use limits::Limits;
pub use order::{compare_values, type_rank};
pub use timestamp::Timestamp;
pub use value::{GeoPoint, Property, PropertyMap, Value, ValueType};
