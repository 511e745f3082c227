//! Query validation and native plan compilation
//!
//! The planner turns a [`Query`] into a [`QueryPlan`]:
//!
//! 1. Validate the kind, ancestor, filters, sort orders and projection.
//!    At most one property may carry inequality filters, and when sort
//!    orders are given that property must be sorted first.
//! 2. Expand `!=` into `<` OR `>` and `IN` into one `=` per value. The
//!    cartesian product of these alternatives forms the plan's branches;
//!    an entity matches the query if it matches any branch.
//! 3. Compile a native prefilter. `__key__` filters and the ancestor
//!    constraint are exact (key encodings sort like keys). Property
//!    equality is pushed down as a superset check; everything else is
//!    re-checked in process against the reference ordering.
//! 4. Decide whether the native query is *exact*: key-only filters and a
//!    key-only sort. Exact plans let the store apply the cursor, sort and
//!    limit; all others fetch the prefiltered set and sort in process.

use crate::codec::{encode_native, KeyCodec, UNINDEXED_FIELD};
use crate::cursor::CursorPosition;
use crate::error::{Error, Result};
use crate::query::model::{Direction, Operator, Query, SortOrder};
use mantle_core::{Key, Value, KEY_PROPERTY};
use mantle_storage::{DocValue, Filter, FindQuery, SortDirection, ID_FIELD};
use rustc_hash::FxHasher;
use serde::Serialize;
use std::collections::BTreeMap;
use std::hash::Hasher;

/// Upper bound on disjunctive branches after `!=`/`IN` expansion
pub const MAX_BRANCHES: usize = 30;

/// Single-operand comparison after expansion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
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
}

/// Constraints one branch places on one property
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyConstraints {
    /// Each operand must equal some value of the property
    pub equals: Vec<Value>,
    /// A single value must satisfy all of these
    pub ranges: Vec<(Comparison, Value)>,
}

/// One conjunctive alternative: property name to constraints
pub type Branch = BTreeMap<String, PropertyConstraints>;

/// Validated, compiled query
#[derive(Debug, Clone)]
pub struct QueryPlan {
    /// Entity kind (collection)
    pub kind: String,
    /// Ancestor constraint
    pub ancestor: Option<Key>,
    /// Disjunctive branches; empty means nothing can match
    pub branches: Vec<Branch>,
    /// Effective sort orders (with the implicit inequality order)
    pub orders: Vec<SortOrder>,
    /// Projected properties
    pub projection: Vec<String>,
    /// Keys-only query
    pub keys_only: bool,
    /// Key tie-break direction
    pub key_direction: Direction,
    /// Query shape fingerprint carried by cursors
    pub shape: u64,
    /// Native prefilter
    pub native: Filter,
    /// True when the native filter and key order are exact
    pub exact: bool,
}

impl QueryPlan {
    /// Length of a row's comparison tuple
    pub fn arity(&self) -> usize {
        self.orders.len() + self.projection.len()
    }

    /// Direction of tuple position `i`
    pub fn direction_at(&self, i: usize) -> Direction {
        self.orders
            .get(i)
            .map(|o| o.direction)
            .unwrap_or(self.key_direction)
    }

    /// Native find request for this plan
    ///
    /// Exact plans push the key sort, the start cursor and `fetch_limit`
    /// down to the store; other plans fetch the whole prefiltered set.
    pub fn native_query(&self, start: Option<&CursorPosition>, fetch_limit: Option<usize>) -> FindQuery {
        if !self.exact {
            return FindQuery::new(self.native.clone());
        }
        let mut filter = self.native.clone();
        if let Some(position) = start {
            let after = DocValue::String(KeyCodec::encode(&position.key));
            filter = filter.and(match self.key_direction {
                Direction::Ascending => Filter::Gt(ID_FIELD.to_string(), after),
                Direction::Descending => Filter::Lt(ID_FIELD.to_string(), after),
            });
        }
        let direction = match self.key_direction {
            Direction::Ascending => SortDirection::Ascending,
            Direction::Descending => SortDirection::Descending,
        };
        let mut find = FindQuery::new(filter).sort_by(ID_FIELD, direction);
        if let Some(limit) = fetch_limit {
            find = find.limit(limit);
        }
        find
    }
}

#[derive(Serialize)]
struct Shape<'a> {
    kind: &'a str,
    ancestor: &'a Option<Key>,
    filters: &'a [crate::query::model::PropertyFilter],
    orders: &'a [SortOrder],
    projection: &'a [String],
    keys_only: bool,
}

/// Validate and compile a query
///
/// # Errors
///
/// `Error::BadQuery` for any rule violation.
pub fn plan(query: &Query) -> Result<QueryPlan> {
    validate_scope(query)?;
    let inequality = validate_filters(query)?;
    validate_projection(query)?;

    let mut orders = Vec::with_capacity(query.orders.len() + 1);
    for order in &query.orders {
        if order.property.is_empty() {
            return Err(Error::bad_query("sort order has an empty property name"));
        }
        if !orders.iter().any(|o: &SortOrder| o.property == order.property) {
            orders.push(order.clone());
        }
    }
    if let Some(property) = &inequality {
        match orders.first() {
            None => orders.push(SortOrder {
                property: property.clone(),
                direction: Direction::Ascending,
            }),
            Some(first) if &first.property != property => {
                return Err(Error::bad_query(format!(
                    "inequality filter on '{}' requires '{}' to be the first sort order, not '{}'",
                    property, property, first.property
                )))
            }
            Some(_) => {}
        }
    }
    let key_direction = orders.last().map(|o| o.direction).unwrap_or_default();

    let branches = expand_branches(query)?;
    let native = native_filter(query);
    let exact = query.projection.is_empty()
        && query.filters.iter().all(|f| f.property == KEY_PROPERTY)
        && orders.iter().all(|o| o.property == KEY_PROPERTY);
    let shape = fingerprint(&Shape {
        kind: &query.kind,
        ancestor: &query.ancestor,
        filters: &query.filters,
        orders: &orders,
        projection: &query.projection,
        keys_only: query.keys_only,
    })?;

    Ok(QueryPlan {
        kind: query.kind.clone(),
        ancestor: query.ancestor.clone(),
        branches,
        orders,
        projection: query.projection.clone(),
        keys_only: query.keys_only,
        key_direction,
        shape,
        native,
        exact,
    })
}

fn validate_scope(query: &Query) -> Result<()> {
    Key::with_id(query.kind.as_str(), 1)
        .validate()
        .map_err(|e| Error::bad_query(format!("invalid kind: {}", e)))?;
    if let Some(ancestor) = &query.ancestor {
        ancestor
            .validate()
            .map_err(|e| Error::bad_query(format!("invalid ancestor: {}", e)))?;
        if !ancestor.is_complete() {
            return Err(Error::bad_query("ancestor key must be complete"));
        }
    }
    if query.keys_only && !query.projection.is_empty() {
        return Err(Error::bad_query("keys-only queries cannot project properties"));
    }
    Ok(())
}

// Returns the single inequality property, if any.
fn validate_filters(query: &Query) -> Result<Option<String>> {
    let mut inequality: Option<String> = None;
    for filter in &query.filters {
        if filter.property.is_empty() {
            return Err(Error::bad_query("filter has an empty property name"));
        }
        if filter.op != Operator::In && filter.values.len() != 1 {
            return Err(Error::bad_query(format!(
                "{:?} filter on '{}' needs exactly one value",
                filter.op, filter.property
            )));
        }
        if filter.property == KEY_PROPERTY {
            for value in &filter.values {
                match value {
                    Value::Key(key) if key.is_complete() => {}
                    _ => {
                        return Err(Error::bad_query(
                            "__key__ filters need complete key values",
                        ))
                    }
                }
            }
        }
        if filter.op.is_inequality() {
            match &inequality {
                Some(existing) if existing != &filter.property => {
                    return Err(Error::bad_query(format!(
                        "inequality filters on '{}' and '{}'; only one property may have inequality filters",
                        existing, filter.property
                    )))
                }
                _ => inequality = Some(filter.property.clone()),
            }
        }
    }
    Ok(inequality)
}

fn validate_projection(query: &Query) -> Result<()> {
    for (i, name) in query.projection.iter().enumerate() {
        if name.is_empty() {
            return Err(Error::bad_query("projection has an empty property name"));
        }
        if name == KEY_PROPERTY {
            return Err(Error::bad_query("__key__ cannot be projected; use a keys-only query"));
        }
        if query.projection[..i].contains(name) {
            return Err(Error::bad_query(format!("property '{}' projected twice", name)));
        }
    }
    Ok(())
}

fn expand_branches(query: &Query) -> Result<Vec<Branch>> {
    let mut alternatives: Vec<Vec<(Comparison, Value)>> = Vec::with_capacity(query.filters.len());
    let mut total: usize = 1;
    for filter in &query.filters {
        let options: Vec<(Comparison, Value)> = match filter.op {
            Operator::Equal => vec![(Comparison::Equal, filter.values[0].clone())],
            Operator::LessThan => vec![(Comparison::LessThan, filter.values[0].clone())],
            Operator::LessThanOrEqual => vec![(Comparison::LessThanOrEqual, filter.values[0].clone())],
            Operator::GreaterThan => vec![(Comparison::GreaterThan, filter.values[0].clone())],
            Operator::GreaterThanOrEqual => {
                vec![(Comparison::GreaterThanOrEqual, filter.values[0].clone())]
            }
            Operator::NotEqual => vec![
                (Comparison::LessThan, filter.values[0].clone()),
                (Comparison::GreaterThan, filter.values[0].clone()),
            ],
            Operator::In => filter
                .values
                .iter()
                .map(|v| (Comparison::Equal, v.clone()))
                .collect(),
        };
        total = total.saturating_mul(options.len());
        alternatives.push(options);
    }
    if total > MAX_BRANCHES {
        return Err(Error::bad_query(format!(
            "query expands to {} sub-queries, maximum is {}",
            total, MAX_BRANCHES
        )));
    }

    let mut branches: Vec<Branch> = vec![Branch::new()];
    for (filter, options) in query.filters.iter().zip(alternatives) {
        let mut next = Vec::with_capacity(branches.len() * options.len());
        for branch in &branches {
            for (cmp, value) in &options {
                let mut extended = branch.clone();
                let constraints = extended.entry(filter.property.clone()).or_default();
                match cmp {
                    Comparison::Equal => constraints.equals.push(value.clone()),
                    other => constraints.ranges.push((*other, value.clone())),
                }
                next.push(extended);
            }
        }
        branches = next;
    }
    Ok(branches)
}

// Path of the native payload for a (possibly dotted) property path.
fn native_path(property: &str, leaf: &str) -> String {
    let mut path = property.split('.').collect::<Vec<_>>().join(".v.");
    path.push('.');
    path.push_str(leaf);
    path
}

fn top_level(property: &str) -> &str {
    property.split('.').next().unwrap_or(property)
}

// Pushable operands compare natively exactly when the reference says equal.
fn pushable(value: &Value) -> bool {
    match value {
        Value::Float(f) => !f.is_nan(),
        Value::Entity(_) | Value::GeoPoint(_) | Value::Null => false,
        _ => true,
    }
}

fn native_filter(query: &Query) -> Filter {
    let mut filter = Filter::all();
    if let Some(ancestor) = &query.ancestor {
        filter = filter.and(Filter::StartsWith(
            ID_FIELD.to_string(),
            KeyCodec::encode(ancestor),
        ));
    }

    let mut referenced: Vec<&str> = Vec::new();
    for f in &query.filters {
        if f.property == KEY_PROPERTY {
            let id = |v: &Value| match v {
                Value::Key(k) => DocValue::String(KeyCodec::encode(k)),
                _ => DocValue::Null,
            };
            let field = ID_FIELD.to_string();
            let operand = id(&f.values[0]);
            filter = filter.and(match f.op {
                Operator::Equal => Filter::Eq(field, operand),
                Operator::LessThan => Filter::Lt(field, operand),
                Operator::LessThanOrEqual => Filter::Lte(field, operand),
                Operator::GreaterThan => Filter::Gt(field, operand),
                Operator::GreaterThanOrEqual => Filter::Gte(field, operand),
                Operator::NotEqual => Filter::Ne(field, operand),
                Operator::In => Filter::In(field, f.values.iter().map(id).collect()),
            });
            continue;
        }
        referenced.push(top_level(&f.property));
        let pushed = match f.op {
            Operator::Equal if pushable(&f.values[0]) => encode_native(&f.values[0])
                .ok()
                .map(|operand| Filter::Eq(native_path(&f.property, "v"), operand)),
            Operator::Equal if f.values[0].is_null() => Some(Filter::Eq(
                native_path(&f.property, "t"),
                DocValue::from("null"),
            )),
            Operator::In if f.values.iter().all(pushable) => f
                .values
                .iter()
                .map(encode_native)
                .collect::<Result<Vec<_>>>()
                .ok()
                .map(|operands| Filter::In(native_path(&f.property, "v"), operands)),
            _ => None,
        };
        filter = filter.and(
            pushed.unwrap_or_else(|| Filter::Exists(top_level(&f.property).to_string(), true)),
        );
    }
    for order in &query.orders {
        if order.property != KEY_PROPERTY {
            referenced.push(top_level(&order.property));
        }
    }
    for name in &query.projection {
        referenced.push(top_level(name));
    }
    referenced.sort_unstable();
    referenced.dedup();
    for name in referenced {
        filter = filter.and(Filter::Exists(name.to_string(), true));
        filter = filter.and(Filter::Ne(
            UNINDEXED_FIELD.to_string(),
            DocValue::String(name.to_string()),
        ));
    }
    filter
}

fn fingerprint(shape: &Shape<'_>) -> Result<u64> {
    let bytes = rmp_serde::to_vec(shape)
        .map_err(|e| Error::encode(format!("query shape serialization failed: {}", e)))?;
    let mut hasher = FxHasher::default();
    hasher.write(&bytes);
    Ok(hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::model::Query;

    #[test]
    fn test_inequality_requires_first_sort() {
        let q = Query::new("Person")
            .filter("age", Operator::GreaterThan, 20i64)
            .order("name", Direction::Ascending);
        let err = plan(&q).unwrap_err();
        assert!(matches!(err, Error::BadQuery(_)));
        assert!(err.to_string().contains("first sort order"));
    }

    #[test]
    fn test_two_inequality_properties_rejected() {
        let q = Query::new("Person")
            .filter("age", Operator::GreaterThan, 20i64)
            .filter("height", Operator::LessThan, 2.0f64);
        assert!(matches!(plan(&q), Err(Error::BadQuery(_))));
    }

    #[test]
    fn test_not_equal_counts_as_inequality() {
        let q = Query::new("Person")
            .filter("age", Operator::NotEqual, 20i64)
            .order("name", Direction::Ascending);
        assert!(matches!(plan(&q), Err(Error::BadQuery(_))));
    }

    #[test]
    fn test_implicit_inequality_order() {
        let q = Query::new("Person").filter("age", Operator::GreaterThanOrEqual, 25i64);
        let p = plan(&q).unwrap();
        assert_eq!(p.orders.len(), 1);
        assert_eq!(p.orders[0].property, "age");
        assert!(!p.exact);
    }

    #[test]
    fn test_branch_expansion() {
        let q = Query::new("K")
            .filter("a", Operator::NotEqual, 1i64)
            .filter_in("b", vec![Value::from("x"), Value::from("y"), Value::from("z")]);
        let p = plan(&q).unwrap();
        assert_eq!(p.branches.len(), 6);
        let empty_in = plan(&Query::new("K").filter_in("b", vec![])).unwrap();
        assert!(empty_in.branches.is_empty());
    }

    #[test]
    fn test_branch_limit() {
        let values: Vec<Value> = (0..6).map(Value::Int).collect();
        let q = Query::new("K")
            .filter_in("a", values.clone())
            .filter_in("b", values);
        assert!(matches!(plan(&q), Err(Error::BadQuery(_))));
    }

    #[test]
    fn test_projection_rules() {
        assert!(plan(&Query::new("K").project(vec![""])).is_err());
        assert!(plan(&Query::new("K").project(vec!["__key__"])).is_err());
        assert!(plan(&Query::new("K").project(vec!["a", "a"])).is_err());
        assert!(plan(&Query::new("K").project(vec!["a"]).keys_only()).is_err());
        assert_eq!(plan(&Query::new("K").project(vec!["a", "b"])).unwrap().arity(), 2);
    }

    #[test]
    fn test_scope_rules() {
        assert!(plan(&Query::new("")).is_err());
        assert!(plan(&Query::new("__kind__")).is_err());
        assert!(plan(&Query::new("K").ancestor(Key::incomplete("P"))).is_err());
        assert!(plan(&Query::new("K").filter(KEY_PROPERTY, Operator::Equal, 5i64)).is_err());
    }

    #[test]
    fn test_key_only_plans_are_exact() {
        let q = Query::new("K")
            .filter(KEY_PROPERTY, Operator::GreaterThan, Key::with_id("K", 3))
            .order(KEY_PROPERTY, Direction::Descending);
        let p = plan(&q).unwrap();
        assert!(p.exact);
        assert_eq!(p.key_direction, Direction::Descending);
        assert!(!plan(&Query::new("K").order("a", Direction::Ascending)).unwrap().exact);
        assert!(plan(&Query::new("K")).unwrap().exact);
    }

    #[test]
    fn test_shape_ignores_paging() {
        let base = Query::new("K").filter("a", Operator::Equal, 1i64);
        let paged = base.clone().limit(3).offset(2);
        assert_eq!(plan(&base).unwrap().shape, plan(&paged).unwrap().shape);
        let other = Query::new("K").filter("a", Operator::Equal, 2i64);
        assert_ne!(plan(&base).unwrap().shape, plan(&other).unwrap().shape);
    }

    #[test]
    fn test_native_paths() {
        assert_eq!(native_path("age", "v"), "age.v");
        assert_eq!(native_path("s.i", "v"), "s.v.i.v");
        assert_eq!(native_path("s.i", "t"), "s.v.i.t");
    }
}
