//! Query Semantics Tests
//!
//! End-to-end queries through the service against the in-memory store:
//! filters, reference ordering across types, repeated and structured
//! properties, projections, ancestors, paging and cursors.

use mantle_core::{Entity, Key, Property, PropertyMap, Timestamp, Value};
use mantle_engine::{
    AdapterConfig, DatastoreService, Direction, ErrorKind, Operator, Query, QueryResult,
};
use mantle_storage::MemoryDocumentStore;
use std::sync::Arc;

fn service() -> DatastoreService {
    DatastoreService::new(
        Arc::new(MemoryDocumentStore::new()),
        AdapterConfig::for_app("query-tests"),
    )
    .unwrap()
}

fn person(name: &str, age: i64) -> Entity {
    Entity::new(Key::with_name("Person", name)).with("age", age)
}

fn values_of(result: &QueryResult, property: &str) -> Vec<Value> {
    result
        .items
        .iter()
        .map(|item| match item.entity.get(property) {
            Some(Property::Single(v)) => v.clone(),
            other => panic!("unexpected {} property: {:?}", property, other),
        })
        .collect()
}

fn names_of(result: &QueryResult) -> Vec<String> {
    result
        .keys()
        .iter()
        .map(|k| k.name().unwrap_or_default().to_string())
        .collect()
}

fn numbered(svc: &DatastoreService, count: i64) {
    let entities: Vec<Entity> = (1..=count)
        .map(|n| Entity::new(Key::with_id("Num", n)).with("n", n))
        .collect();
    svc.put(&entities).unwrap();
}

// ============================================================================
// Reference Scenarios
// ============================================================================

#[test]
fn test_put_then_get_alice() {
    let svc = service();
    let alice = person("alice", 30);
    svc.put(&[alice.clone()]).unwrap();
    assert_eq!(svc.get(&[alice.key.clone()]).unwrap(), vec![Some(alice)]);
}

#[test]
fn test_age_filter_sort_and_resume() {
    let svc = service();
    svc.put(&[person("a", 20), person("b", 25), person("c", 30)])
        .unwrap();

    let query = Query::new("Person")
        .filter("age", Operator::GreaterThanOrEqual, 25i64)
        .order("age", Direction::Ascending);
    let first = svc.run_query(&query).unwrap();
    assert_eq!(values_of(&first, "age"), vec![Value::Int(25), Value::Int(30)]);

    let resumed = svc
        .run_query(&query.clone().start_cursor(first.items[0].cursor.clone()))
        .unwrap();
    assert_eq!(values_of(&resumed, "age"), vec![Value::Int(30)]);
}

#[test]
fn test_inequality_needs_matching_first_sort() {
    let svc = service();
    let query = Query::new("Person")
        .filter("age", Operator::GreaterThan, 20i64)
        .order("name", Direction::Ascending);
    let err = svc.run_query(&query).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadQuery);
}

// ============================================================================
// Reference Ordering
// ============================================================================

fn mixed(svc: &DatastoreService) {
    let entities = vec![
        Entity::new(Key::with_name("Mixed", "k1")).with("v", Key::with_id("Other", 1)),
        Entity::new(Key::with_name("Mixed", "k2")).with("v", "a"),
        Entity::new(Key::with_name("Mixed", "k3")).with("v", true),
        Entity::new(Key::with_name("Mixed", "k4")).with("v", Value::Null),
        Entity::new(Key::with_name("Mixed", "k5")).with("v", 3i64),
        Entity::new(Key::with_name("Mixed", "k6")).with("v", 2.5f64),
        Entity::new(Key::with_name("Mixed", "k7")).with("v", vec![0u8]),
        Entity::new(Key::with_name("Mixed", "k8")).with("v", Timestamp::from_secs(1)),
    ];
    svc.put(&entities).unwrap();
}

#[test]
fn test_mixed_types_sort_by_reference_rank() {
    let svc = service();
    mixed(&svc);
    let result = svc
        .run_query(&Query::new("Mixed").order("v", Direction::Ascending))
        .unwrap();
    assert_eq!(
        names_of(&result),
        vec!["k4", "k3", "k6", "k5", "k2", "k7", "k8", "k1"]
    );

    let reversed = svc
        .run_query(&Query::new("Mixed").order("v", Direction::Descending))
        .unwrap();
    assert_eq!(
        names_of(&reversed),
        vec!["k1", "k8", "k7", "k2", "k5", "k6", "k3", "k4"]
    );
}

#[test]
fn test_range_filter_follows_total_order() {
    let svc = service();
    mixed(&svc);
    let result = svc
        .run_query(&Query::new("Mixed").filter("v", Operator::GreaterThan, 2i64))
        .unwrap();
    assert_eq!(names_of(&result), vec!["k6", "k5", "k2", "k7", "k8", "k1"]);
}

#[test]
fn test_int_and_float_compare_numerically() {
    let svc = service();
    svc.put(&[
        Entity::new(Key::with_name("M", "i")).with("x", 5i64),
        Entity::new(Key::with_name("M", "f")).with("x", 5.0f64),
        Entity::new(Key::with_name("M", "g")).with("x", 4.5f64),
    ])
    .unwrap();
    let eq = svc
        .run_query(&Query::new("M").filter("x", Operator::Equal, 5i64))
        .unwrap();
    assert_eq!(names_of(&eq), vec!["f", "i"]);
    let sorted = svc
        .run_query(&Query::new("M").order("x", Direction::Ascending))
        .unwrap();
    assert_eq!(names_of(&sorted), vec!["g", "f", "i"]);
}

#[test]
fn test_equal_sort_values_tie_break_on_key() {
    let svc = service();
    svc.put(&[
        Entity::new(Key::with_name("S", "x1")).with("score", 5i64),
        Entity::new(Key::with_name("S", "x2")).with("score", 5i64),
        Entity::new(Key::with_name("S", "x3")).with("score", 7i64),
    ])
    .unwrap();
    let desc = svc
        .run_query(&Query::new("S").order("score", Direction::Descending))
        .unwrap();
    assert_eq!(names_of(&desc), vec!["x3", "x2", "x1"]);
    let asc = svc
        .run_query(&Query::new("S").order("score", Direction::Ascending))
        .unwrap();
    assert_eq!(names_of(&asc), vec!["x1", "x2", "x3"]);
}

// ============================================================================
// Property Shapes
// ============================================================================

#[test]
fn test_null_is_not_absence() {
    let svc = service();
    svc.put(&[
        Entity::new(Key::with_name("P", "n1")).with("age", Value::Null),
        Entity::new(Key::with_name("P", "n2")),
    ])
    .unwrap();
    let result = svc
        .run_query(&Query::new("P").filter("age", Operator::Equal, Value::Null))
        .unwrap();
    assert_eq!(names_of(&result), vec!["n1"]);
}

#[test]
fn test_unindexed_properties_do_not_match() {
    let svc = service();
    svc.put(&[
        person("alice", 30),
        Entity::new(Key::with_name("Person", "bob")).with_unindexed("age", 40i64),
    ])
    .unwrap();
    let result = svc
        .run_query(&Query::new("Person").filter("age", Operator::GreaterThanOrEqual, 25i64))
        .unwrap();
    assert_eq!(names_of(&result), vec!["alice"]);
    // still stored and returned by key
    let bob = svc.get(&[Key::with_name("Person", "bob")]).unwrap();
    assert!(!bob[0].as_ref().unwrap().is_indexed("age"));
}

#[test]
fn test_repeated_equality_matches_any_element() {
    let svc = service();
    svc.put(&[
        Entity::new(Key::with_name("Post", "p1"))
            .with_repeated("tags", vec![Value::from("a"), Value::from("b")]),
        Entity::new(Key::with_name("Post", "p2")).with_repeated("tags", vec![Value::from("c")]),
        Entity::new(Key::with_name("Post", "p3")).with_repeated("tags", vec![]),
    ])
    .unwrap();
    let result = svc
        .run_query(&Query::new("Post").filter("tags", Operator::Equal, "b"))
        .unwrap();
    assert_eq!(names_of(&result), vec!["p1"]);
    // empty repeated properties count as absent
    let sorted = svc
        .run_query(&Query::new("Post").order("tags", Direction::Ascending))
        .unwrap();
    assert_eq!(names_of(&sorted), vec!["p1", "p2"]);
}

#[test]
fn test_repeated_ranges_bind_to_one_element() {
    let svc = service();
    svc.put(&[
        Entity::new(Key::with_name("R", "split")).with_repeated("x", vec![Value::Int(0), Value::Int(9)]),
        Entity::new(Key::with_name("R", "inside")).with_repeated("x", vec![Value::Int(0), Value::Int(4)]),
    ])
    .unwrap();
    let result = svc
        .run_query(
            &Query::new("R")
                .filter("x", Operator::GreaterThan, 2i64)
                .filter("x", Operator::LessThan, 6i64),
        )
        .unwrap();
    assert_eq!(names_of(&result), vec!["inside"]);
}

#[test]
fn test_structured_property_path() {
    let svc = service();
    let mut paris = PropertyMap::new();
    paris.insert("city".into(), Property::Single(Value::from("Paris")));
    let mut rome = PropertyMap::new();
    rome.insert("city".into(), Property::Single(Value::from("Rome")));
    svc.put(&[
        Entity::new(Key::with_name("Office", "fr")).with("address", paris),
        Entity::new(Key::with_name("Office", "it")).with("address", rome),
    ])
    .unwrap();
    let result = svc
        .run_query(&Query::new("Office").filter("address.city", Operator::Equal, "Rome"))
        .unwrap();
    assert_eq!(names_of(&result), vec!["it"]);
}

#[test]
fn test_unindexed_and_structured_values_stay_out_of_sorts() {
    let svc = service();
    let mut nested = PropertyMap::new();
    nested.insert("rank".into(), Property::Single(Value::Int(0)));
    svc.put(&[
        Entity::new(Key::with_name("Card", "plain")).with("rank", 2i64),
        Entity::new(Key::with_name("Card", "hidden")).with_unindexed("rank", 1i64),
        Entity::new(Key::with_name("Card", "embedded")).with("rank", nested),
        Entity::new(Key::with_name("Card", "low")).with("rank", 1i64),
    ])
    .unwrap();
    for direction in [Direction::Ascending, Direction::Descending] {
        let result = svc
            .run_query(&Query::new("Card").order("rank", direction))
            .unwrap();
        let mut names = names_of(&result);
        names.sort_unstable();
        assert_eq!(names, vec!["low", "plain"]);
    }
    // the nested leaf is still reachable by its dotted path
    let result = svc
        .run_query(&Query::new("Card").order("rank.rank", Direction::Ascending))
        .unwrap();
    assert_eq!(names_of(&result), vec!["embedded"]);
}

// ============================================================================
// Operators, Projection, Ancestors
// ============================================================================

fn colors(svc: &DatastoreService) {
    svc.put(&[
        Entity::new(Key::with_name("Car", "c1")).with("color", "red"),
        Entity::new(Key::with_name("Car", "c2")).with("color", "blue"),
        Entity::new(Key::with_name("Car", "c3")).with("color", "green"),
    ])
    .unwrap();
}

#[test]
fn test_in_filter_is_union() {
    let svc = service();
    colors(&svc);
    let result = svc
        .run_query(&Query::new("Car").filter_in("color", vec![Value::from("red"), Value::from("blue")]))
        .unwrap();
    assert_eq!(names_of(&result), vec!["c1", "c2"]);
    let none = svc
        .run_query(&Query::new("Car").filter_in("color", vec![]))
        .unwrap();
    assert!(none.items.is_empty());
}

#[test]
fn test_not_equal_sorts_on_its_property() {
    let svc = service();
    colors(&svc);
    let result = svc
        .run_query(&Query::new("Car").filter("color", Operator::NotEqual, "red"))
        .unwrap();
    assert_eq!(names_of(&result), vec!["c2", "c3"]);
}

#[test]
fn test_projection_splits_repeated_values() {
    let svc = service();
    svc.put(&[
        Entity::new(Key::with_name("Post", "p1"))
            .with_repeated("tags", vec![Value::from("b"), Value::from("a"), Value::from("b")])
            .with("body", "long text"),
        Entity::new(Key::with_name("Post", "p2")).with_repeated("tags", vec![Value::from("c")]),
    ])
    .unwrap();
    let result = svc
        .run_query(
            &Query::new("Post")
                .project(vec!["tags"])
                .order("tags", Direction::Ascending),
        )
        .unwrap();
    assert_eq!(names_of(&result), vec!["p1", "p1", "p2"]);
    assert_eq!(
        values_of(&result, "tags"),
        vec![Value::from("a"), Value::from("b"), Value::from("c")]
    );
    assert!(result.items[0].entity.get("body").is_none());
}

#[test]
fn test_projection_cursor_resumes_between_split_rows() {
    let svc = service();
    svc.put(&[Entity::new(Key::with_name("Post", "p1"))
        .with_repeated("tags", vec![Value::from("a"), Value::from("b"), Value::from("c")])])
        .unwrap();
    let query = Query::new("Post").project(vec!["tags"]);
    let first = svc.run_query(&query.clone().limit(1)).unwrap();
    assert_eq!(values_of(&first, "tags"), vec![Value::from("a")]);
    assert!(first.more_results);
    let rest = svc
        .run_query(&query.start_cursor(first.end_cursor.clone().unwrap()))
        .unwrap();
    assert_eq!(values_of(&rest, "tags"), vec![Value::from("b"), Value::from("c")]);
}

#[test]
fn test_ancestor_scoping() {
    let svc = service();
    let red = Key::with_name("Team", "red");
    let blue = Key::with_name("Team", "blue");
    svc.put(&[
        Entity::new(red.child("Player", "x")),
        Entity::new(red.child("Player", "y")),
        Entity::new(blue.child("Player", "z")),
        Entity::new(red.child("Coach", "c")),
    ])
    .unwrap();
    let result = svc
        .run_query(&Query::new("Player").ancestor(red.clone()))
        .unwrap();
    assert_eq!(names_of(&result), vec!["x", "y"]);
    assert!(result.keys().iter().all(|k| k.has_ancestor(&red)));
}

#[test]
fn test_keys_only() {
    let svc = service();
    svc.put(&[person("a", 20), person("b", 25)]).unwrap();
    let result = svc.run_query(&Query::new("Person").keys_only()).unwrap();
    assert_eq!(names_of(&result), vec!["a", "b"]);
    assert!(result.items.iter().all(|i| i.entity.properties.is_empty()));
}

#[test]
fn test_key_filters_and_descending_key_order() {
    let svc = service();
    svc.put(&[
        person("a", 1),
        person("b", 2),
        person("c", 3),
        person("d", 4),
        person("e", 5),
    ])
    .unwrap();
    let query = Query::new("Person")
        .filter("__key__", Operator::GreaterThan, Key::with_name("Person", "b"))
        .order("__key__", Direction::Descending);
    let page = svc.run_query(&query.clone().limit(2)).unwrap();
    assert_eq!(names_of(&page), vec!["e", "d"]);
    assert!(page.more_results);
    let rest = svc
        .run_query(&query.start_cursor(page.end_cursor.clone().unwrap()))
        .unwrap();
    assert_eq!(names_of(&rest), vec!["c"]);
    assert!(!rest.more_results);
}

// ============================================================================
// Paging
// ============================================================================

#[test]
fn test_offset_limit_and_more_results() {
    let svc = service();
    numbered(&svc, 5);
    let query = Query::new("Num").order("n", Direction::Ascending);

    let page = svc.run_query(&query.clone().offset(1).limit(2)).unwrap();
    assert_eq!(values_of(&page, "n"), vec![Value::Int(2), Value::Int(3)]);
    assert_eq!(page.skipped_results, 1);
    assert!(page.more_results);

    let next = svc
        .run_query(&query.clone().limit(2).start_cursor(page.end_cursor.clone().unwrap()))
        .unwrap();
    assert_eq!(values_of(&next, "n"), vec![Value::Int(4), Value::Int(5)]);
    assert!(!next.more_results);
}

#[test]
fn test_offset_past_end_is_empty() {
    let svc = service();
    numbered(&svc, 5);
    let result = svc
        .run_query(&Query::new("Num").order("n", Direction::Ascending).offset(10))
        .unwrap();
    assert!(result.items.is_empty());
    assert_eq!(result.skipped_results, 5);
    assert!(!result.more_results);
    assert!(result.end_cursor.is_some());
}

#[test]
fn test_no_matches_returns_start_cursor() {
    let svc = service();
    let result = svc.run_query(&Query::new("Nothing")).unwrap();
    assert!(result.items.is_empty());
    assert!(result.end_cursor.is_none());
    assert!(!result.more_results);
}

#[test]
fn test_end_cursor_is_inclusive() {
    let svc = service();
    numbered(&svc, 5);
    let query = Query::new("Num").order("n", Direction::Ascending);
    let all = svc.run_query(&query).unwrap();
    let upto = svc
        .run_query(&query.end_cursor(all.items[2].cursor.clone()))
        .unwrap();
    assert_eq!(
        values_of(&upto, "n"),
        vec![Value::Int(1), Value::Int(2), Value::Int(3)]
    );
}

#[test]
fn test_count_ignores_limit() {
    let svc = service();
    numbered(&svc, 5);
    let query = Query::new("Num").limit(2);
    assert_eq!(svc.count(&query).unwrap(), 5);
    assert_eq!(svc.count(&query.offset(1)).unwrap(), 4);
}

#[test]
fn test_offset_is_clamped() {
    let store = Arc::new(MemoryDocumentStore::new());
    let mut config = AdapterConfig::for_app("clamp");
    config.max_query_offset = 2;
    config.max_query_results = 2;
    let svc = DatastoreService::new(store, config).unwrap();
    numbered(&svc, 5);
    let page = svc
        .run_query(&Query::new("Num").order("n", Direction::Ascending).offset(4))
        .unwrap();
    assert_eq!(page.skipped_results, 2);
    // no limit: capped by max_query_results
    assert_eq!(values_of(&page, "n"), vec![Value::Int(3), Value::Int(4)]);
    assert!(page.more_results);
}
