//! Entities: a key plus a property bag

use crate::key::Key;
use crate::value::{Property, PropertyMap, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A stored entity
///
/// Entities are replaced whole on put; there is no partial property update.
///
/// ```
/// use mantle_core::{Entity, Key, Value};
///
/// let e = Entity::new(Key::with_name("Person", "alice"))
///     .with("age", 30i64)
///     .with_repeated("tags", vec![Value::from("a"), Value::from("b")])
///     .with_unindexed("bio", "long text");
/// assert!(e.is_indexed("age"));
/// assert!(!e.is_indexed("bio"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Entity key (may be incomplete before the first put)
    pub key: Key,
    /// Properties by name
    pub properties: PropertyMap,
    /// Names of properties excluded from filters, sorts and projections
    pub unindexed: BTreeSet<String>,
}

impl Entity {
    /// Create an entity with no properties
    pub fn new(key: Key) -> Self {
        Self {
            key,
            properties: PropertyMap::new(),
            unindexed: BTreeSet::new(),
        }
    }

    /// Builder: set a single-valued property
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, Property::Single(value.into()));
        self
    }

    /// Builder: set a repeated property
    pub fn with_repeated(mut self, name: impl Into<String>, values: Vec<Value>) -> Self {
        self.set(name, Property::Repeated(values));
        self
    }

    /// Builder: set a single-valued property excluded from indexes
    pub fn with_unindexed(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let name = name.into();
        self.unindexed.insert(name.clone());
        self.set(name, Property::Single(value.into()));
        self
    }

    /// Set (replace) a property
    pub fn set(&mut self, name: impl Into<String>, property: Property) {
        self.properties.insert(name.into(), property);
    }

    /// Get a property
    pub fn get(&self, name: &str) -> Option<&Property> {
        self.properties.get(name)
    }

    /// Remove a property, returning it if present
    pub fn remove(&mut self, name: &str) -> Option<Property> {
        self.unindexed.remove(name);
        self.properties.remove(name)
    }

    /// True unless `name` is marked unindexed
    pub fn is_indexed(&self, name: &str) -> bool {
        !self.unindexed.contains(name)
    }
}
