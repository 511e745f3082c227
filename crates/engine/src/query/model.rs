//! Query descriptors and results

use crate::cursor::Cursor;
use mantle_core::{Entity, Key, Value};
use serde::{Deserialize, Serialize};

/// Filter operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    /// `=`
    Equal,
    /// `<`
    LessThan,
    /// `<=`
    LessThanOrEqual,
    /// `>`
    GreaterThan,
    /// `>=`
    GreaterThanOrEqual,
    /// `!=`, evaluated as `<` OR `>`
    NotEqual,
    /// Membership, evaluated as the union of one `=` per value
    In,
}

impl Operator {
    /// True for operators that constrain a range (`!=` included)
    pub fn is_inequality(&self) -> bool {
        matches!(
            self,
            Operator::LessThan
                | Operator::LessThanOrEqual
                | Operator::GreaterThan
                | Operator::GreaterThanOrEqual
                | Operator::NotEqual
        )
    }
}

/// One `(property, operator, value)` filter
///
/// `values` holds exactly one value for every operator but `In`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyFilter {
    /// Property name, dotted path, or `__key__`
    pub property: String,
    /// Operator
    pub op: Operator,
    /// Operand(s)
    pub values: Vec<Value>,
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Direction {
    /// Smallest first
    #[default]
    Ascending,
    /// Largest first
    Descending,
}

/// One sort order
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortOrder {
    /// Property name, dotted path, or `__key__`
    pub property: String,
    /// Direction
    pub direction: Direction,
}

/// Declarative datastore query
///
/// ```
/// use mantle_engine::query::{Direction, Operator, Query};
///
/// let q = Query::new("Person")
///     .filter("age", Operator::GreaterThanOrEqual, 25i64)
///     .order("age", Direction::Ascending)
///     .limit(10);
/// assert_eq!(q.filters.len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Query {
    /// Entity kind
    pub kind: String,
    /// Restrict to this key and its descendants
    pub ancestor: Option<Key>,
    /// Filters, all of which must hold
    pub filters: Vec<PropertyFilter>,
    /// Sort orders, most significant first
    pub orders: Vec<SortOrder>,
    /// Properties to return instead of whole entities
    pub projection: Vec<String>,
    /// Return keys only
    pub keys_only: bool,
    /// Maximum results
    pub limit: Option<usize>,
    /// Results to skip after the start cursor
    pub offset: usize,
    /// Resume after this position
    pub start_cursor: Option<Cursor>,
    /// Stop at this position (inclusive)
    pub end_cursor: Option<Cursor>,
}

impl Query {
    /// Query over one kind
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Self::default()
        }
    }

    /// Builder: ancestor constraint
    pub fn ancestor(mut self, ancestor: Key) -> Self {
        self.ancestor = Some(ancestor);
        self
    }

    /// Builder: add a single-operand filter
    pub fn filter(mut self, property: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        self.filters.push(PropertyFilter {
            property: property.into(),
            op,
            values: vec![value.into()],
        });
        self
    }

    /// Builder: add an `IN` filter
    pub fn filter_in(mut self, property: impl Into<String>, values: Vec<Value>) -> Self {
        self.filters.push(PropertyFilter {
            property: property.into(),
            op: Operator::In,
            values,
        });
        self
    }

    /// Builder: add a sort order
    pub fn order(mut self, property: impl Into<String>, direction: Direction) -> Self {
        self.orders.push(SortOrder {
            property: property.into(),
            direction,
        });
        self
    }

    /// Builder: project these properties
    pub fn project<I, S>(mut self, properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = properties.into_iter().map(Into::into).collect();
        self
    }

    /// Builder: keys-only
    pub fn keys_only(mut self) -> Self {
        self.keys_only = true;
        self
    }

    /// Builder: limit
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Builder: offset
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Builder: start cursor
    pub fn start_cursor(mut self, cursor: Cursor) -> Self {
        self.start_cursor = Some(cursor);
        self
    }

    /// Builder: end cursor
    pub fn end_cursor(mut self, cursor: Cursor) -> Self {
        self.end_cursor = Some(cursor);
        self
    }
}

/// One query result
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResultItem {
    /// Whole entity, projected entity, or key-only entity
    pub entity: Entity,
    /// Position right after this result
    pub cursor: Cursor,
}

/// A page of query results
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    /// Results in query order
    pub items: Vec<QueryResultItem>,
    /// Position after the last result (or the start cursor when empty)
    pub end_cursor: Option<Cursor>,
    /// True when the limit cut off further matches
    pub more_results: bool,
    /// Results skipped by the offset
    pub skipped_results: usize,
}

impl QueryResult {
    /// Entities of this page
    pub fn entities(&self) -> Vec<&Entity> {
        self.items.iter().map(|item| &item.entity).collect()
    }

    /// Keys of this page
    pub fn keys(&self) -> Vec<&Key> {
        self.items.iter().map(|item| &item.entity.key).collect()
    }
}
