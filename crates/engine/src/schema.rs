//! Per-kind property type records
//!
//! Every put records, for each kind it writes, the type of every property
//! path it saw. Records live in the `__schema__` collection, one document
//! per kind:
//!
//! ```text
//! { _id: <kind>, properties: [ { name: "age", type: "int" }, ... ] }
//! ```
//!
//! Type names are value tags (`int`, `str`, `entity`, ...). Repeated
//! properties record `list:<tag>`, or plain `list` while empty. Properties
//! inside structured values are recorded under dotted paths (`addr.city`).
//! Records only grow: a later write replaces the type of a path it
//! mentions and leaves the other paths alone.
//!
//! A process-local copy of each record is kept so unchanged batches never
//! touch the store. Writers in other processes are not seen by that copy;
//! [`SchemaRegistry::kind_schema`] always reads the stored record.

use crate::error::{Error, Result};
use crate::retry::read_with_retries;
use mantle_core::{Entity, Property, PropertyMap, Value};
use mantle_storage::{
    DocValue, Document, DocumentStore, Filter, FindQuery, SortDirection, WriteConcern, ID_FIELD,
};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Collection holding one type record per kind
pub const SCHEMA_COLLECTION: &str = "__schema__";

const PROPERTIES_FIELD: &str = "properties";
const NAME_FIELD: &str = "name";
const TYPE_FIELD: &str = "type";

/// Property types observed for one kind
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KindSchema {
    /// Kind the record describes
    pub kind: String,
    /// Type name by property path
    pub properties: BTreeMap<String, String>,
}

impl KindSchema {
    /// Empty record for `kind`
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            properties: BTreeMap::new(),
        }
    }

    /// Record describing a single entity
    pub fn of(entity: &Entity) -> Self {
        let mut schema = Self::new(entity.key.kind());
        collect_types(&entity.properties, "", &mut schema.properties);
        schema
    }

    /// Type recorded for a property path
    pub fn property_type(&self, path: &str) -> Option<&str> {
        self.properties.get(path).map(String::as_str)
    }

    /// Fold `other` into this record; true when anything changed
    pub fn merge(&mut self, other: &KindSchema) -> bool {
        let mut changed = false;
        for (path, type_name) in &other.properties {
            if self.properties.get(path) != Some(type_name) {
                self.properties.insert(path.clone(), type_name.clone());
                changed = true;
            }
        }
        changed
    }

    fn to_document(&self) -> Document {
        let entries = self
            .properties
            .iter()
            .map(|(path, type_name)| {
                let mut entry = Document::new();
                entry.insert(NAME_FIELD.to_string(), DocValue::String(path.clone()));
                entry.insert(TYPE_FIELD.to_string(), DocValue::String(type_name.clone()));
                DocValue::Document(entry)
            })
            .collect();
        let mut doc = Document::new();
        doc.insert(ID_FIELD.to_string(), DocValue::String(self.kind.clone()));
        doc.insert(PROPERTIES_FIELD.to_string(), DocValue::Array(entries));
        doc
    }

    fn from_document(doc: &Document) -> Result<Self> {
        let kind = doc
            .get(ID_FIELD)
            .and_then(DocValue::as_str)
            .ok_or_else(|| Error::decode("schema record has no string _id"))?;
        let mut schema = Self::new(kind);
        let entries = match doc.get(PROPERTIES_FIELD) {
            None => return Ok(schema),
            Some(value) => value
                .as_array()
                .ok_or_else(|| Error::decode("schema properties is not an array"))?,
        };
        for entry in entries {
            let field = |name: &str| {
                entry
                    .as_document()
                    .and_then(|e| e.get(name))
                    .and_then(DocValue::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| Error::decode(format!("schema entry of '{}' has no {}", kind, name)))
            };
            schema.properties.insert(field(NAME_FIELD)?, field(TYPE_FIELD)?);
        }
        Ok(schema)
    }
}

fn collect_types(properties: &PropertyMap, prefix: &str, out: &mut BTreeMap<String, String>) {
    for (name, property) in properties {
        let path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{}.{}", prefix, name)
        };
        match property {
            Property::Single(value) => {
                out.insert(path.clone(), value.value_type().tag().to_string());
                if let Value::Entity(nested) = value {
                    collect_types(nested, &path, out);
                }
            }
            Property::Repeated(values) => {
                let type_name = match values.first() {
                    Some(first) => format!("list:{}", first.value_type().tag()),
                    None => "list".to_string(),
                };
                out.insert(path.clone(), type_name);
                for value in values {
                    if let Value::Entity(nested) = value {
                        collect_types(nested, &path, out);
                    }
                }
            }
        }
    }
}

/// Keeps the per-kind type records of one application database
pub struct SchemaRegistry {
    store: Arc<dyn DocumentStore>,
    db: String,
    concern: WriteConcern,
    read_retries: u32,
    known: Mutex<FxHashMap<String, KindSchema>>,
}

impl SchemaRegistry {
    /// Registry over the application database `db`
    pub fn new(
        store: Arc<dyn DocumentStore>,
        db: impl Into<String>,
        concern: WriteConcern,
        read_retries: u32,
    ) -> Self {
        Self {
            store,
            db: db.into(),
            concern,
            read_retries,
            known: Mutex::new(FxHashMap::default()),
        }
    }

    /// Record the property types of a batch
    ///
    /// Only kinds whose record changed are written.
    ///
    /// # Errors
    ///
    /// `Storage` when the stored record cannot be read or written,
    /// `Decode` for a corrupt stored record.
    pub fn record(&self, entities: &[Entity]) -> Result<()> {
        let mut observed: BTreeMap<&str, KindSchema> = BTreeMap::new();
        for entity in entities {
            let kind = entity.key.kind();
            observed
                .entry(kind)
                .or_insert_with(|| KindSchema::new(kind))
                .merge(&KindSchema::of(entity));
        }

        // Held across the store round trip so concurrent puts do not lose types.
        let mut known = self.known.lock();
        for (kind, schema) in observed {
            let mut current = match known.get(kind) {
                Some(cached) => cached.clone(),
                None => self.load(kind)?.unwrap_or_else(|| KindSchema::new(kind)),
            };
            let changed = current.merge(&schema);
            if changed {
                self.store
                    .upsert(&self.db, SCHEMA_COLLECTION, current.to_document(), self.concern)?;
                debug!(
                    target: "mantle::write",
                    kind,
                    properties = current.properties.len(),
                    "Schema updated"
                );
            }
            known.insert(kind.to_string(), current);
        }
        Ok(())
    }

    /// Stored record for `kind`, `None` if nothing was ever written to it
    ///
    /// # Errors
    ///
    /// `Storage` when the read fails after retries, `Decode` for a corrupt
    /// record.
    pub fn kind_schema(&self, kind: &str) -> Result<Option<KindSchema>> {
        self.load(kind)
    }

    /// Every stored record, ordered by kind
    ///
    /// # Errors
    ///
    /// As [`SchemaRegistry::kind_schema`].
    pub fn all(&self) -> Result<Vec<KindSchema>> {
        let query = FindQuery::new(Filter::all()).sort_by(ID_FIELD, SortDirection::Ascending);
        let docs = read_with_retries(self.read_retries, "schema", || {
            self.store.find(&self.db, SCHEMA_COLLECTION, &query)
        })?;
        docs.iter().map(KindSchema::from_document).collect()
    }

    /// Drop the process-local copies, e.g. after the database was dropped
    pub fn forget(&self) {
        self.known.lock().clear();
    }

    fn load(&self, kind: &str) -> Result<Option<KindSchema>> {
        let query = FindQuery::new(Filter::Eq(ID_FIELD.to_string(), DocValue::from(kind))).limit(1);
        let docs = read_with_retries(self.read_retries, "schema", || {
            self.store.find(&self.db, SCHEMA_COLLECTION, &query)
        })?;
        docs.first().map(KindSchema::from_document).transpose()
    }
}
