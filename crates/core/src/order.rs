//! Reference value ordering
//!
//! The reference datastore orders values of different types by a fixed
//! type rank, then within a rank by value:
//!
//! | rank | types |
//! |------|-------|
//! | 0 | null |
//! | 1 | boolean |
//! | 2 | integer, float (compared numerically across both) |
//! | 3 | string |
//! | 4 | byte string |
//! | 5 | timestamp |
//! | 6 | key reference |
//! | 7 | geo point |
//! | 8 | structured |
//!
//! Document stores rank types differently (booleans after strings, for
//! one), so every filter and sort that crosses types goes through this
//! table rather than the store's native comparison.

use crate::value::{GeoPoint, Property, PropertyMap, Value};
use std::cmp::Ordering;

/// Reference type rank of a value
pub fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Int(_) | Value::Float(_) => 2,
        Value::String(_) => 3,
        Value::Bytes(_) => 4,
        Value::Timestamp(_) => 5,
        Value::Key(_) => 6,
        Value::GeoPoint(_) => 7,
        Value::Entity(_) => 8,
    }
}

/// Compare two values under the reference total order
///
/// `Int(5)` and `Float(5.0)` compare `Equal`. NaN sorts below every other
/// number and equal to itself.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    let by_rank = type_rank(a).cmp(&type_rank(b));
    if by_rank != Ordering::Equal {
        return by_rank;
    }
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::Float(x), Value::Float(y)) => compare_floats(*x, *y),
        (Value::Int(x), Value::Float(y)) => compare_int_float(*x, *y),
        (Value::Float(x), Value::Int(y)) => compare_int_float(*y, *x).reverse(),
        (Value::String(x), Value::String(y)) => x.as_bytes().cmp(y.as_bytes()),
        (Value::Bytes(x), Value::Bytes(y)) => x.cmp(y),
        (Value::Timestamp(x), Value::Timestamp(y)) => x.cmp(y),
        (Value::Key(x), Value::Key(y)) => x.cmp(y),
        (Value::GeoPoint(x), Value::GeoPoint(y)) => compare_geo(x, y),
        (Value::Entity(x), Value::Entity(y)) => compare_maps(x, y),
        // unreachable: equal ranks imply matching variants
        _ => Ordering::Equal,
    }
}

/// Compare two sequences element-wise under the reference order
pub fn compare_value_lists(a: &[Value], b: &[Value]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        let ord = compare_values(x, y);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

fn compare_floats(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

// Exact comparison without rounding the integer through f64.
fn compare_int_float(i: i64, f: f64) -> Ordering {
    if f.is_nan() {
        return Ordering::Greater;
    }
    // 2^63 as f64; every f64 at or above it exceeds every i64.
    const TWO_POW_63: f64 = 9_223_372_036_854_775_808.0;
    if f >= TWO_POW_63 {
        return Ordering::Less;
    }
    if f < -TWO_POW_63 {
        return Ordering::Greater;
    }
    let truncated = f.trunc();
    match i.cmp(&(truncated as i64)) {
        Ordering::Equal => {
            let frac = f - truncated;
            if frac > 0.0 {
                Ordering::Less
            } else if frac < 0.0 {
                Ordering::Greater
            } else {
                Ordering::Equal
            }
        }
        other => other,
    }
}

fn compare_geo(a: &GeoPoint, b: &GeoPoint) -> Ordering {
    compare_floats(a.lat, b.lat).then_with(|| compare_floats(a.lon, b.lon))
}

fn compare_maps(a: &PropertyMap, b: &PropertyMap) -> Ordering {
    for ((name_a, prop_a), (name_b, prop_b)) in a.iter().zip(b.iter()) {
        let ord = name_a
            .as_bytes()
            .cmp(name_b.as_bytes())
            .then_with(|| compare_properties(prop_a, prop_b));
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

fn compare_properties(a: &Property, b: &Property) -> Ordering {
    compare_value_lists(a.values(), b.values())
}
