//! Document model of the backing store
//!
//! `DocValue` mirrors the value space of a BSON-style document database.
//! Its comparison (`native_cmp`) is the store's *native* ordering, which
//! brackets types as:
//!
//! `null < numbers < string < document < array < binary < bool < datetime`
//!
//! Binaries compare by length before content. Both points differ from the
//! datastore's reference ordering, which is why the engine re-sorts and
//! re-filters whatever crosses types.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Primary-key field of every stored document
pub const ID_FIELD: &str = "_id";

/// A stored record: field name to value
pub type Document = BTreeMap<String, DocValue>;

/// Document field value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DocValue {
    /// Null
    Null,
    /// Boolean
    Bool(bool),
    /// 64-bit integer
    Int(i64),
    /// 64-bit float
    Double(f64),
    /// UTF-8 string
    String(String),
    /// Binary blob
    Binary(Vec<u8>),
    /// Microseconds since the Unix epoch
    DateTime(i64),
    /// Array of values
    Array(Vec<DocValue>),
    /// Embedded document
    Document(Document),
}

impl DocValue {
    /// Native type bracket used by `native_cmp`
    pub fn bracket(&self) -> u8 {
        match self {
            DocValue::Null => 1,
            DocValue::Int(_) | DocValue::Double(_) => 2,
            DocValue::String(_) => 3,
            DocValue::Document(_) => 4,
            DocValue::Array(_) => 5,
            DocValue::Binary(_) => 6,
            DocValue::Bool(_) => 8,
            DocValue::DateTime(_) => 9,
        }
    }

    /// Get as &str if this is a String
    pub fn as_str(&self) -> Option<&str> {
        match self {
            DocValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as i64 if this is an Int
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DocValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as a slice if this is an Array
    pub fn as_array(&self) -> Option<&[DocValue]> {
        match self {
            DocValue::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Get as a document if this is an embedded Document
    pub fn as_document(&self) -> Option<&Document> {
        match self {
            DocValue::Document(d) => Some(d),
            _ => None,
        }
    }
}

impl From<&str> for DocValue {
    fn from(s: &str) -> Self {
        DocValue::String(s.to_string())
    }
}

impl From<String> for DocValue {
    fn from(s: String) -> Self {
        DocValue::String(s)
    }
}

impl From<i64> for DocValue {
    fn from(i: i64) -> Self {
        DocValue::Int(i)
    }
}

impl From<bool> for DocValue {
    fn from(b: bool) -> Self {
        DocValue::Bool(b)
    }
}

/// Native store comparison
pub fn native_cmp(a: &DocValue, b: &DocValue) -> Ordering {
    let by_bracket = a.bracket().cmp(&b.bracket());
    if by_bracket != Ordering::Equal {
        return by_bracket;
    }
    match (a, b) {
        (DocValue::Null, DocValue::Null) => Ordering::Equal,
        (DocValue::Int(x), DocValue::Int(y)) => x.cmp(y),
        (DocValue::Int(x), DocValue::Double(y)) => cmp_f64(*x as f64, *y),
        (DocValue::Double(x), DocValue::Int(y)) => cmp_f64(*x, *y as f64),
        (DocValue::Double(x), DocValue::Double(y)) => cmp_f64(*x, *y),
        (DocValue::String(x), DocValue::String(y)) => x.cmp(y),
        (DocValue::Document(x), DocValue::Document(y)) => {
            for ((ka, va), (kb, vb)) in x.iter().zip(y.iter()) {
                let ord = ka.cmp(kb).then_with(|| native_cmp(va, vb));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (DocValue::Array(x), DocValue::Array(y)) => {
            for (va, vb) in x.iter().zip(y.iter()) {
                let ord = native_cmp(va, vb);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (DocValue::Binary(x), DocValue::Binary(y)) => {
            x.len().cmp(&y.len()).then_with(|| x.cmp(y))
        }
        (DocValue::Bool(x), DocValue::Bool(y)) => x.cmp(y),
        (DocValue::DateTime(x), DocValue::DateTime(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

fn cmp_f64(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or_else(|| a.is_nan().cmp(&b.is_nan()).reverse())
}

/// Collect the values reachable at a dotted `path`
///
/// Arrays met along the way are traversed element-wise, so `a.b` on
/// `{a: [{b: 1}, {b: 2}]}` yields both `1` and `2`.
pub fn lookup_path<'a>(doc: &'a Document, path: &str) -> Vec<&'a DocValue> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut out = Vec::new();
    if let Some(first) = doc.get(segments[0]) {
        collect(first, &segments[1..], &mut out);
    }
    out
}

fn collect<'a>(value: &'a DocValue, rest: &[&str], out: &mut Vec<&'a DocValue>) {
    if rest.is_empty() {
        out.push(value);
        return;
    }
    match value {
        DocValue::Document(doc) => {
            if let Some(next) = doc.get(rest[0]) {
                collect(next, &rest[1..], out);
            }
        }
        DocValue::Array(items) => {
            for item in items {
                if let DocValue::Document(_) = item {
                    collect(item, rest, out);
                }
            }
        }
        _ => {}
    }
}

/// Validate field names of a document about to be stored
///
/// Field names must be non-empty and may not contain `.` or start with `$`.
pub fn validate_field_names(doc: &Document) -> Result<(), String> {
    for (name, value) in doc {
        if name.is_empty() || name.contains('.') || name.starts_with('$') {
            return Err(format!("illegal field name '{}'", name));
        }
        validate_nested(value)?;
    }
    Ok(())
}

fn validate_nested(value: &DocValue) -> Result<(), String> {
    match value {
        DocValue::Document(doc) => validate_field_names(doc),
        DocValue::Array(items) => items.iter().try_for_each(validate_nested),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(pairs: Vec<(&str, DocValue)>) -> Document {
        pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    #[test]
    fn test_native_brackets_put_bool_after_string() {
        assert_eq!(
            native_cmp(&DocValue::Bool(false), &DocValue::from("zzz")),
            Ordering::Greater
        );
        assert_eq!(
            native_cmp(&DocValue::Null, &DocValue::Int(i64::MIN)),
            Ordering::Less
        );
    }

    #[test]
    fn test_native_binary_compares_length_first() {
        let short = DocValue::Binary(vec![0xff]);
        let long = DocValue::Binary(vec![0x00, 0x00]);
        assert_eq!(native_cmp(&short, &long), Ordering::Less);
    }

    #[test]
    fn test_native_numbers_mix() {
        assert_eq!(
            native_cmp(&DocValue::Int(2), &DocValue::Double(1.5)),
            Ordering::Greater
        );
    }

    #[test]
    fn test_lookup_path_through_arrays() {
        let d = doc(vec![(
            "a",
            DocValue::Array(vec![
                DocValue::Document(doc(vec![("b", DocValue::Int(1))])),
                DocValue::Document(doc(vec![("b", DocValue::Int(2))])),
                DocValue::Int(3),
            ]),
        )]);
        let found = lookup_path(&d, "a.b");
        assert_eq!(found, vec![&DocValue::Int(1), &DocValue::Int(2)]);
        assert!(lookup_path(&d, "missing").is_empty());
    }

    #[test]
    fn test_validate_field_names() {
        assert!(validate_field_names(&doc(vec![("ok", DocValue::Null)])).is_ok());
        assert!(validate_field_names(&doc(vec![("a.b", DocValue::Null)])).is_err());
        assert!(validate_field_names(&doc(vec![("$set", DocValue::Null)])).is_err());
        let nested = doc(vec![(
            "outer",
            DocValue::Document(doc(vec![("bad.name", DocValue::Null)])),
        )]);
        assert!(validate_field_names(&nested).is_err());
    }
}
