//! Property values
//!
//! This module defines:
//! - Value: the discriminated union of datastore value types
//! - ValueType: the declared-type tag carried by every stored value
//! - Property: a single value or an ordered repeated sequence
//! - PropertyMap: a named bag of properties (entity body or structured value)
//!
//! ## Absence vs. null
//!
//! A property missing from a `PropertyMap` is *absent*. A property present
//! as `Property::Single(Value::Null)` is an explicit null, and an empty
//! `Property::Repeated(vec![])` is an empty sequence. The three are distinct
//! and survive a storage round trip.

use crate::key::Key;
use crate::timestamp::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Named bag of properties
pub type PropertyMap = BTreeMap<String, Property>;

/// Geographical point
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude in degrees
    pub lat: f64,
    /// Longitude in degrees
    pub lon: f64,
}

impl GeoPoint {
    /// Create a geo point
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// Datastore property value
///
/// Different variants are never equal, even when they hold the "same"
/// number: `Int(1) != Float(1.0)`. Cross-type *ordering* is defined by
/// [`crate::order::compare_values`], not by this type's `PartialEq`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Explicit null
    Null,
    /// Boolean
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit float (IEEE-754)
    Float(f64),
    /// UTF-8 string
    String(String),
    /// Byte string
    Bytes(Vec<u8>),
    /// Point in time
    Timestamp(Timestamp),
    /// Reference to another entity
    Key(Key),
    /// Geographical point
    GeoPoint(GeoPoint),
    /// Structured value: a nested property bag
    Entity(PropertyMap),
}

/// Declared type of a stored value
///
/// The tag strings are part of the stored record format and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ValueType {
    /// `Value::Null`
    Null,
    /// `Value::Bool`
    Bool,
    /// `Value::Int`
    Int,
    /// `Value::Float`
    Float,
    /// `Value::String`
    String,
    /// `Value::Bytes`
    Bytes,
    /// `Value::Timestamp`
    Timestamp,
    /// `Value::Key`
    Key,
    /// `Value::GeoPoint`
    GeoPoint,
    /// `Value::Entity`
    Entity,
}

impl ValueType {
    /// Record tag for this type
    pub fn tag(&self) -> &'static str {
        match self {
            ValueType::Null => "null",
            ValueType::Bool => "bool",
            ValueType::Int => "int",
            ValueType::Float => "float",
            ValueType::String => "str",
            ValueType::Bytes => "bytes",
            ValueType::Timestamp => "ts",
            ValueType::Key => "key",
            ValueType::GeoPoint => "geo",
            ValueType::Entity => "entity",
        }
    }

    /// Parse a record tag
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "null" => Some(ValueType::Null),
            "bool" => Some(ValueType::Bool),
            "int" => Some(ValueType::Int),
            "float" => Some(ValueType::Float),
            "str" => Some(ValueType::String),
            "bytes" => Some(ValueType::Bytes),
            "ts" => Some(ValueType::Timestamp),
            "key" => Some(ValueType::Key),
            "geo" => Some(ValueType::GeoPoint),
            "entity" => Some(ValueType::Entity),
            _ => None,
        }
    }
}

impl Value {
    /// Declared type of this value
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Null => ValueType::Null,
            Value::Bool(_) => ValueType::Bool,
            Value::Int(_) => ValueType::Int,
            Value::Float(_) => ValueType::Float,
            Value::String(_) => ValueType::String,
            Value::Bytes(_) => ValueType::Bytes,
            Value::Timestamp(_) => ValueType::Timestamp,
            Value::Key(_) => ValueType::Key,
            Value::GeoPoint(_) => ValueType::GeoPoint,
            Value::Entity(_) => ValueType::Entity,
        }
    }

    /// Check if this is an explicit null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get as i64 if this is an Int value
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as &str if this is a String value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get the nested bag if this is a structured value
    pub fn as_entity(&self) -> Option<&PropertyMap> {
        match self {
            Value::Entity(map) => Some(map),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<Key> for Value {
    fn from(k: Key) -> Self {
        Value::Key(k)
    }
}

impl From<Timestamp> for Value {
    fn from(t: Timestamp) -> Self {
        Value::Timestamp(t)
    }
}

impl From<GeoPoint> for Value {
    fn from(g: GeoPoint) -> Self {
        Value::GeoPoint(g)
    }
}

impl From<PropertyMap> for Value {
    fn from(map: PropertyMap) -> Self {
        Value::Entity(map)
    }
}

/// A property: one value, or an ordered repeated sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Property {
    /// Single value (possibly an explicit null)
    Single(Value),
    /// Repeated values of one declared type (possibly empty)
    Repeated(Vec<Value>),
}

impl Property {
    /// All values of this property, in order
    pub fn values(&self) -> &[Value] {
        match self {
            Property::Single(v) => std::slice::from_ref(v),
            Property::Repeated(vs) => vs,
        }
    }

    /// Check if this is a repeated property
    pub fn is_repeated(&self) -> bool {
        matches!(self, Property::Repeated(_))
    }
}

impl From<Value> for Property {
    fn from(v: Value) -> Self {
        Property::Single(v)
    }
}
