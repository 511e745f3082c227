//! Native query form accepted by a `DocumentStore`
//!
//! Matching follows document-database conventions rather than datastore
//! ones:
//!
//! - A path that resolves to an array matches if the array itself or any
//!   of its elements satisfies the predicate.
//! - Range predicates only match values in the same native type bracket as
//!   the operand (`{$gt: 5}` never matches a string).
//! - `Ne` matches documents where the path is missing.
//! - Sorting on an array field uses the smallest element ascending and the
//!   largest descending; a missing field sorts as null.

use crate::document::{lookup_path, native_cmp, DocValue, Document};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Document predicate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Filter {
    /// All sub-filters match; an empty list matches every document
    And(Vec<Filter>),
    /// Path equals value
    Eq(String, DocValue),
    /// Path does not equal value (also matches when missing)
    Ne(String, DocValue),
    /// Path greater than value
    Gt(String, DocValue),
    /// Path greater than or equal to value
    Gte(String, DocValue),
    /// Path less than value
    Lt(String, DocValue),
    /// Path less than or equal to value
    Lte(String, DocValue),
    /// Path equals any of the values
    In(String, Vec<DocValue>),
    /// Path presence
    Exists(String, bool),
    /// String at path starts with the prefix
    StartsWith(String, String),
}

impl Filter {
    /// Filter matching every document
    pub fn all() -> Self {
        Filter::And(Vec::new())
    }

    /// Conjunction, flattening nested `And`s
    pub fn and(self, other: Filter) -> Self {
        let mut parts = match self {
            Filter::And(parts) => parts,
            single => vec![single],
        };
        match other {
            Filter::And(more) => parts.extend(more),
            single => parts.push(single),
        }
        Filter::And(parts)
    }

    /// Evaluate against a document
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::And(parts) => parts.iter().all(|f| f.matches(doc)),
            Filter::Eq(path, operand) => any_candidate(doc, path, |v| native_eq(v, operand)),
            Filter::Ne(path, operand) => !any_candidate(doc, path, |v| native_eq(v, operand)),
            Filter::Gt(path, operand) => range(doc, path, operand, |o| o == Ordering::Greater),
            Filter::Gte(path, operand) => range(doc, path, operand, |o| o != Ordering::Less),
            Filter::Lt(path, operand) => range(doc, path, operand, |o| o == Ordering::Less),
            Filter::Lte(path, operand) => range(doc, path, operand, |o| o != Ordering::Greater),
            Filter::In(path, operands) => {
                any_candidate(doc, path, |v| operands.iter().any(|o| native_eq(v, o)))
            }
            Filter::Exists(path, wanted) => !lookup_path(doc, path).is_empty() == *wanted,
            Filter::StartsWith(path, prefix) => any_candidate(doc, path, |v| {
                v.as_str().map(|s| s.starts_with(prefix.as_str())).unwrap_or(false)
            }),
        }
    }
}

/// Native equality: same bracket and comparing equal
pub fn native_eq(a: &DocValue, b: &DocValue) -> bool {
    a.bracket() == b.bracket() && native_cmp(a, b) == Ordering::Equal
}

fn any_candidate(doc: &Document, path: &str, mut pred: impl FnMut(&DocValue) -> bool) -> bool {
    for value in lookup_path(doc, path) {
        if pred(value) {
            return true;
        }
        if let DocValue::Array(items) = value {
            if items.iter().any(&mut pred) {
                return true;
            }
        }
    }
    false
}

fn range(
    doc: &Document,
    path: &str,
    operand: &DocValue,
    accept: impl Fn(Ordering) -> bool,
) -> bool {
    any_candidate(doc, path, |v| {
        v.bracket() == operand.bracket() && accept(native_cmp(v, operand))
    })
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    /// Smallest first
    Ascending,
    /// Largest first
    Descending,
}

/// Native find request: filter, sort, skip and limit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindQuery {
    /// Predicate
    pub filter: Filter,
    /// Sort keys, most significant first; empty means natural (`_id`) order
    pub sort: Vec<(String, SortDirection)>,
    /// Documents to skip after sorting
    pub skip: usize,
    /// Maximum documents to return
    pub limit: Option<usize>,
}

impl FindQuery {
    /// Query with the given filter and no sort, skip or limit
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            sort: Vec::new(),
            skip: 0,
            limit: None,
        }
    }

    /// Builder: add a sort key
    pub fn sort_by(mut self, path: impl Into<String>, direction: SortDirection) -> Self {
        self.sort.push((path.into(), direction));
        self
    }

    /// Builder: set skip
    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    /// Builder: set limit
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Compare two documents under this query's sort
    pub fn compare(&self, a: &Document, b: &Document) -> Ordering {
        for (path, direction) in &self.sort {
            let ka = sort_value(a, path, *direction);
            let kb = sort_value(b, path, *direction);
            let ord = match direction {
                SortDirection::Ascending => native_cmp(&ka, &kb),
                SortDirection::Descending => native_cmp(&kb, &ka),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

fn sort_value(doc: &Document, path: &str, direction: SortDirection) -> DocValue {
    let mut candidates: Vec<&DocValue> = Vec::new();
    for value in lookup_path(doc, path) {
        match value {
            DocValue::Array(items) if !items.is_empty() => candidates.extend(items.iter()),
            other => candidates.push(other),
        }
    }
    let chosen = match direction {
        SortDirection::Ascending => candidates.into_iter().min_by(|a, b| native_cmp(a, b)),
        SortDirection::Descending => candidates.into_iter().max_by(|a, b| native_cmp(a, b)),
    };
    chosen.cloned().unwrap_or(DocValue::Null)
}
