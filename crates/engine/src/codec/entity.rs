//! Entity <-> document record
//!
//! Record layout:
//!
//! | field | content |
//! |-------|---------|
//! | `_id` | `KeyCodec::encode(key)` |
//! | `<name>` | tagged value, or array of tagged values if repeated |
//! | `_unindexed` | array of unindexed property names (omitted when empty) |
//! | `_seq` | insertion sequence number, written by the coordinator |
//!
//! A tagged value is `{t: <tag>, v: <native>}`; `null` carries no `v`.
//! Structured values nest a full property record under `v`. Property names
//! starting with `_` are reserved for these bookkeeping fields.

use super::key::KeyCodec;
use crate::error::{Error, Result};
use mantle_core::{Entity, GeoPoint, Limits, Property, PropertyMap, Timestamp, Value, ValueType};
use mantle_storage::{DocValue, Document, ID_FIELD};
use std::collections::BTreeSet;

/// Field holding unindexed property names
pub const UNINDEXED_FIELD: &str = "_unindexed";
/// Field holding the insertion sequence number
pub const SEQ_FIELD: &str = "_seq";
/// Tag field of a tagged value
pub const TAG_FIELD: &str = "t";
/// Payload field of a tagged value
pub const VALUE_FIELD: &str = "v";

/// Entity encoder/decoder
#[derive(Debug, Clone, Default)]
pub struct EntityCodec {
    limits: Limits,
}

impl EntityCodec {
    /// Codec enforcing the given limits
    pub fn new(limits: Limits) -> Self {
        Self { limits }
    }

    /// Limits enforced by this codec
    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Encode an entity with a complete key into a record
    ///
    /// # Errors
    ///
    /// `Error::Encode` for incomplete or invalid keys, reserved or malformed
    /// property names, mixed-type repeated properties, and values beyond
    /// the nesting or repeated-length limits.
    pub fn to_record(&self, entity: &Entity) -> Result<Document> {
        entity.key.validate_with_limits(&self.limits)?;
        if !entity.key.is_complete() {
            return Err(Error::encode(format!("key {} is incomplete", entity.key)));
        }
        let mut doc = self.encode_map(&entity.properties, 0)?;
        doc.insert(ID_FIELD.to_string(), DocValue::String(KeyCodec::encode(&entity.key)));
        if !entity.unindexed.is_empty() {
            for name in &entity.unindexed {
                validate_property_name(name)?;
            }
            let names = entity
                .unindexed
                .iter()
                .map(|n| DocValue::String(n.clone()))
                .collect();
            doc.insert(UNINDEXED_FIELD.to_string(), DocValue::Array(names));
        }
        Ok(doc)
    }

    /// Decode a record produced by [`EntityCodec::to_record`]
    ///
    /// # Errors
    ///
    /// `Error::Decode` on a missing or malformed `_id`, unknown tags, or
    /// payloads that do not match their tag.
    pub fn from_record(&self, doc: &Document) -> Result<Entity> {
        let key = match doc.get(ID_FIELD) {
            Some(DocValue::String(encoded)) => KeyCodec::decode(encoded)?,
            _ => return Err(Error::decode("record has no string _id")),
        };
        let mut entity = Entity::new(key);
        for (name, value) in doc {
            if name.starts_with('_') {
                continue;
            }
            entity.properties.insert(name.clone(), decode_property(value)?);
        }
        entity.unindexed = match doc.get(UNINDEXED_FIELD) {
            None => BTreeSet::new(),
            Some(DocValue::Array(names)) => names
                .iter()
                .map(|n| {
                    n.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| Error::decode("non-string entry in _unindexed"))
                })
                .collect::<Result<_>>()?,
            Some(_) => return Err(Error::decode("_unindexed is not an array")),
        };
        Ok(entity)
    }

    fn encode_map(&self, properties: &PropertyMap, depth: usize) -> Result<Document> {
        if depth > self.limits.max_nesting_depth {
            return Err(Error::encode(format!(
                "structured value nested deeper than {}",
                self.limits.max_nesting_depth
            )));
        }
        let mut doc = Document::new();
        for (name, property) in properties {
            validate_property_name(name)?;
            doc.insert(name.clone(), self.encode_property(name, property, depth)?);
        }
        Ok(doc)
    }

    fn encode_property(&self, name: &str, property: &Property, depth: usize) -> Result<DocValue> {
        match property {
            Property::Single(value) => self.encode_tagged(value, depth),
            Property::Repeated(values) => {
                if values.len() > self.limits.max_repeated_len {
                    return Err(Error::encode(format!(
                        "repeated property '{}' has {} values, maximum is {}",
                        name,
                        values.len(),
                        self.limits.max_repeated_len
                    )));
                }
                if let Some(first) = values.first() {
                    let declared = first.value_type();
                    if let Some(other) = values.iter().find(|v| v.value_type() != declared) {
                        return Err(Error::encode(format!(
                            "repeated property '{}' mixes {} and {}",
                            name,
                            declared.tag(),
                            other.value_type().tag()
                        )));
                    }
                }
                values
                    .iter()
                    .map(|v| self.encode_tagged(v, depth))
                    .collect::<Result<Vec<_>>>()
                    .map(DocValue::Array)
            }
        }
    }

    fn encode_tagged(&self, value: &Value, depth: usize) -> Result<DocValue> {
        let mut tagged = Document::new();
        tagged.insert(
            TAG_FIELD.to_string(),
            DocValue::String(value.value_type().tag().to_string()),
        );
        let payload = match value {
            Value::Entity(map) => Some(DocValue::Document(self.encode_map(map, depth + 1)?)),
            Value::Key(key) => {
                key.validate_with_limits(&self.limits)?;
                Some(encode_native(value)?)
            }
            Value::Null => None,
            _ => Some(encode_native(value)?),
        };
        if let Some(payload) = payload {
            tagged.insert(VALUE_FIELD.to_string(), payload);
        }
        Ok(DocValue::Document(tagged))
    }
}

/// Native form of a scalar value, as stored under `v`
///
/// # Errors
///
/// `Error::Encode` for structured values, which have no scalar form and
/// are only encoded through [`EntityCodec::to_record`].
pub fn encode_native(value: &Value) -> Result<DocValue> {
    Ok(match value {
        Value::Null => DocValue::Null,
        Value::Bool(b) => DocValue::Bool(*b),
        Value::Int(i) => DocValue::Int(*i),
        Value::Float(f) => DocValue::Double(*f),
        Value::String(s) => DocValue::String(s.clone()),
        Value::Bytes(b) => DocValue::Binary(b.clone()),
        Value::Timestamp(t) => DocValue::DateTime(t.as_micros()),
        Value::Key(k) => DocValue::String(KeyCodec::encode(k)),
        Value::GeoPoint(g) => {
            let mut point = Document::new();
            point.insert("lat".to_string(), DocValue::Double(g.lat));
            point.insert("lon".to_string(), DocValue::Double(g.lon));
            DocValue::Document(point)
        }
        Value::Entity(_) => {
            return Err(Error::encode("structured value has no scalar native form"))
        }
    })
}

fn validate_property_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::encode("property name cannot be empty"));
    }
    if name.starts_with('_') {
        return Err(Error::encode(format!("property name '{}' is reserved", name)));
    }
    if name.contains('.') || name.starts_with('$') {
        return Err(Error::encode(format!("property name '{}' is not storable", name)));
    }
    Ok(())
}

fn decode_property(stored: &DocValue) -> Result<Property> {
    match stored {
        DocValue::Array(items) => {
            let values = items.iter().map(decode_tagged).collect::<Result<Vec<_>>>()?;
            if let Some(first) = values.first() {
                let declared = first.value_type();
                if values.iter().any(|v| v.value_type() != declared) {
                    return Err(Error::decode("repeated property mixes types"));
                }
            }
            Ok(Property::Repeated(values))
        }
        single => decode_tagged(single).map(Property::Single),
    }
}

fn decode_tagged(stored: &DocValue) -> Result<Value> {
    let doc = stored
        .as_document()
        .ok_or_else(|| Error::decode("property value is not a tagged document"))?;
    let tag = doc
        .get(TAG_FIELD)
        .and_then(DocValue::as_str)
        .ok_or_else(|| Error::decode("tagged value has no tag"))?;
    let value_type =
        ValueType::from_tag(tag).ok_or_else(|| Error::decode(format!("unknown tag '{}'", tag)))?;
    let payload = doc.get(VALUE_FIELD);
    let mismatch = || Error::decode(format!("payload does not match tag '{}'", tag));
    let value = match (value_type, payload) {
        (ValueType::Null, None) => Value::Null,
        (ValueType::Bool, Some(DocValue::Bool(b))) => Value::Bool(*b),
        (ValueType::Int, Some(DocValue::Int(i))) => Value::Int(*i),
        (ValueType::Float, Some(DocValue::Double(f))) => Value::Float(*f),
        (ValueType::String, Some(DocValue::String(s))) => Value::String(s.clone()),
        (ValueType::Bytes, Some(DocValue::Binary(b))) => Value::Bytes(b.clone()),
        (ValueType::Timestamp, Some(DocValue::DateTime(t))) => {
            Value::Timestamp(Timestamp::from_micros(*t))
        }
        (ValueType::Key, Some(DocValue::String(s))) => Value::Key(KeyCodec::decode(s)?),
        (ValueType::GeoPoint, Some(DocValue::Document(point))) => {
            let coord = |name: &str| match point.get(name) {
                Some(DocValue::Double(v)) => Ok(*v),
                _ => Err(mismatch()),
            };
            Value::GeoPoint(GeoPoint::new(coord("lat")?, coord("lon")?))
        }
        (ValueType::Entity, Some(DocValue::Document(nested))) => {
            let mut map = PropertyMap::new();
            for (name, value) in nested {
                map.insert(name.clone(), decode_property(value)?);
            }
            Value::Entity(map)
        }
        _ => return Err(mismatch()),
    };
    Ok(value)
}
