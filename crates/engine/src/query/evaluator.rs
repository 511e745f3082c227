//! In-process query evaluation
//!
//! The native prefilter only narrows the candidate set. Everything that
//! depends on the reference ordering (ranges, sort values, projections)
//! is decided here, one decoded entity at a time.

use crate::query::model::Direction;
use crate::query::planner::{Branch, Comparison, PropertyConstraints, QueryPlan};
use mantle_core::order::compare_value_lists;
use mantle_core::{compare_values, Entity, Key, Property, Value, KEY_PROPERTY};
use std::cmp::Ordering;

/// One result row: an entity plus its comparison tuple
///
/// Non-projection queries produce at most one row per entity. Projection
/// queries produce one row per distinct combination of projected values.
#[derive(Debug, Clone)]
pub struct Row {
    /// Matched entity (whole; shaped when the page is built)
    pub entity: Entity,
    /// Sort values, then projected values
    pub tuple: Vec<Value>,
}

/// Indexed values of a property path, empty when absent or unindexed
///
/// A dotted path descends into structured values, including every element
/// of a repeated structured property. Structured values themselves are
/// never indexed, so a path ending on one yields nothing and the entity
/// drops out of filters, sorts and projections on that path.
pub fn property_values(entity: &Entity, path: &str) -> Vec<Value> {
    if path == KEY_PROPERTY {
        return vec![Value::Key(entity.key.clone())];
    }
    let mut segments = path.split('.');
    let head = segments.next().unwrap_or(path);
    if !entity.is_indexed(head) {
        return Vec::new();
    }
    let mut current: Vec<&Value> = match entity.get(head) {
        Some(property) => property.values().iter().collect(),
        None => return Vec::new(),
    };
    for segment in segments {
        let mut next = Vec::new();
        for value in current {
            if let Value::Entity(map) = value {
                if let Some(property) = map.get(segment) {
                    next.extend(property.values().iter());
                }
            }
        }
        current = next;
    }
    current
        .into_iter()
        .filter(|v| !matches!(v, Value::Entity(_)))
        .cloned()
        .collect()
}

fn satisfies(value: &Value, cmp: Comparison, operand: &Value) -> bool {
    let ord = compare_values(value, operand);
    match cmp {
        Comparison::Equal => ord == Ordering::Equal,
        Comparison::LessThan => ord == Ordering::Less,
        Comparison::LessThanOrEqual => ord != Ordering::Greater,
        Comparison::GreaterThan => ord == Ordering::Greater,
        Comparison::GreaterThanOrEqual => ord != Ordering::Less,
    }
}

fn satisfies_ranges(value: &Value, constraints: &PropertyConstraints) -> bool {
    constraints
        .ranges
        .iter()
        .all(|(cmp, operand)| satisfies(value, *cmp, operand))
}

fn branch_matches(branch: &Branch, entity: &Entity) -> bool {
    branch.iter().all(|(property, constraints)| {
        let values = property_values(entity, property);
        if values.is_empty() {
            return false;
        }
        let equal_ok = constraints.equals.iter().all(|operand| {
            values
                .iter()
                .any(|v| satisfies(v, Comparison::Equal, operand))
        });
        // ranges must hold for one and the same element
        equal_ok && values.iter().any(|v| satisfies_ranges(v, constraints))
    })
}

// Values of `property` that can stand for the entity under this branch.
fn qualifying(entity: &Entity, branch: &Branch, property: &str) -> Vec<Value> {
    let values = property_values(entity, property);
    match branch.get(property) {
        None => values,
        Some(constraints) => values
            .into_iter()
            .filter(|v| {
                satisfies_ranges(v, constraints)
                    && (constraints.equals.is_empty()
                        || constraints
                            .equals
                            .iter()
                            .any(|operand| satisfies(v, Comparison::Equal, operand)))
            })
            .collect(),
    }
}

fn extreme(values: Vec<Value>, direction: Direction) -> Option<Value> {
    let pick = |a: Value, b: Value| {
        let ord = compare_values(&b, &a);
        let better = match direction {
            Direction::Ascending => ord == Ordering::Less,
            Direction::Descending => ord == Ordering::Greater,
        };
        if better {
            b
        } else {
            a
        }
    };
    values.into_iter().reduce(pick)
}

fn distinct(values: Vec<Value>) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::with_capacity(values.len());
    for v in values {
        if !out
            .iter()
            .any(|seen| compare_values(seen, &v) == Ordering::Equal)
        {
            out.push(v);
        }
    }
    out
}

fn branch_rows(plan: &QueryPlan, branch: &Branch, entity: &Entity) -> Vec<Vec<Value>> {
    let mut sort_values = Vec::with_capacity(plan.orders.len());
    for order in &plan.orders {
        match extreme(qualifying(entity, branch, &order.property), order.direction) {
            Some(v) => sort_values.push(v),
            None => return Vec::new(),
        }
    }
    if plan.projection.is_empty() {
        return vec![sort_values];
    }

    let mut combos: Vec<Vec<Value>> = vec![Vec::new()];
    for name in &plan.projection {
        let values = distinct(qualifying(entity, branch, name));
        if values.is_empty() {
            return Vec::new();
        }
        let mut next = Vec::with_capacity(combos.len() * values.len());
        for combo in &combos {
            for v in &values {
                let mut extended = combo.clone();
                extended.push(v.clone());
                next.push(extended);
            }
        }
        combos = next;
    }

    combos
        .into_iter()
        .map(|combo| {
            let mut tuple = sort_values.clone();
            // a projected sort property sorts by the row's own value
            for (i, order) in plan.orders.iter().enumerate() {
                if let Some(j) = plan.projection.iter().position(|p| p == &order.property) {
                    tuple[i] = combo[j].clone();
                }
            }
            tuple.extend(combo);
            tuple
        })
        .collect()
}

/// Rows an entity contributes to a query, unsorted
pub fn rows_for(plan: &QueryPlan, entity: &Entity) -> Vec<Row> {
    if let Some(ancestor) = &plan.ancestor {
        if !entity.key.has_ancestor(ancestor) {
            return Vec::new();
        }
    }
    let sorted_len = plan.orders.len();
    let mut tuples: Vec<Vec<Value>> = Vec::new();
    for branch in &plan.branches {
        if !branch_matches(branch, entity) {
            continue;
        }
        for tuple in branch_rows(plan, branch, entity) {
            // rows are identified by their projected values; keep the smallest tuple
            let same_row = tuples
                .iter()
                .position(|t| compare_value_lists(&t[sorted_len..], &tuple[sorted_len..]) == Ordering::Equal);
            match same_row {
                Some(i) => {
                    if compare_tuples(plan, &tuple, &tuples[i]) == Ordering::Less {
                        tuples[i] = tuple;
                    }
                }
                None => tuples.push(tuple),
            }
        }
    }
    tuples
        .into_iter()
        .map(|tuple| Row {
            entity: entity.clone(),
            tuple,
        })
        .collect()
}

fn directed(ord: Ordering, direction: Direction) -> Ordering {
    match direction {
        Direction::Ascending => ord,
        Direction::Descending => ord.reverse(),
    }
}

fn compare_tuples(plan: &QueryPlan, a: &[Value], b: &[Value]) -> Ordering {
    for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
        let ord = directed(compare_values(x, y), plan.direction_at(i));
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Query order of two positions (tuple, then key)
pub fn compare_positions(
    plan: &QueryPlan,
    a_tuple: &[Value],
    a_key: &Key,
    b_tuple: &[Value],
    b_key: &Key,
) -> Ordering {
    compare_tuples(plan, a_tuple, b_tuple)
        .then_with(|| directed(a_key.cmp(b_key), plan.key_direction))
}

/// Query order of two rows
pub fn compare_rows(plan: &QueryPlan, a: &Row, b: &Row) -> Ordering {
    compare_positions(plan, &a.tuple, &a.entity.key, &b.tuple, &b.entity.key)
}

/// Shape a row's entity for the result page
pub fn shape_entity(plan: &QueryPlan, row: &Row) -> Entity {
    if plan.keys_only {
        return Entity::new(row.entity.key.clone());
    }
    if plan.projection.is_empty() {
        return row.entity.clone();
    }
    let mut projected = Entity::new(row.entity.key.clone());
    let offset = plan.orders.len();
    for (i, name) in plan.projection.iter().enumerate() {
        projected.set(name.clone(), Property::Single(row.tuple[offset + i].clone()));
    }
    projected
}
