use serde_json::json;

use super::*;
use crate::metadata::ColumnType;
use crate::object;
use crate::testing::registry;

fn changed_properties(changes: &[ChangeEntry]) -> Vec<&str> {
    changes.iter().map(|c| c.target.property_path()).collect()
}

#[test]
fn test_values_equal_timestamps_by_instant() {
    assert!(values_equal(
        ColumnType::Timestamp,
        &json!("2024-01-02T10:00:00Z"),
        &json!("2024-01-02T12:00:00+02:00"),
    ));
    assert!(!values_equal(
        ColumnType::Timestamp,
        &json!("2024-01-02T10:00:00Z"),
        &json!("2024-01-02T10:00:01Z"),
    ));
}

#[test]
fn test_values_equal_dates_ignore_time_part() {
    assert!(values_equal(ColumnType::Date, &json!("2024-01-02"), &json!("2024-01-02T00:00:00Z")));
    assert!(!values_equal(ColumnType::Date, &json!("2024-01-02"), &json!("2024-01-03")));
}

#[test]
fn test_values_equal_json_deep() {
    assert!(values_equal(ColumnType::Json, &json!({"a": 1, "b": [1, 2]}), &json!(r#"{"b":[1,2],"a":1}"#)));
    assert!(!values_equal(ColumnType::Json, &json!({"a": 1}), &json!({"a": 2})));
}

#[test]
fn test_values_equal_numbers_and_nulls() {
    assert!(values_equal(ColumnType::Decimal, &json!("1.50"), &json!(1.5)));
    assert!(values_equal(ColumnType::Integer, &json!(3), &json!(3)));
    assert!(values_equal(ColumnType::Text, &json!(null), &json!(null)));
    assert!(!values_equal(ColumnType::Text, &json!(null), &json!("")));
}

#[test]
fn test_values_equal_simple_array() {
    assert!(values_equal(ColumnType::SimpleArray, &json!(["a", "b"]), &json!("a,b")));
}

#[test]
fn test_compute_diff_against_loaded_row() {
    let registry = registry();
    let user = registry.get("User").unwrap();

    let loaded = object(json!({"id": 1, "firstName": "Timber", "lastName": "Saw", "version": 3}));
    let entity = object(json!({"id": 1, "firstName": "Timber", "lastName": "Hammer", "version": 9}));
    let changes = compute_diff(&user, &entity, Some(&loaded));

    assert_eq!(changed_properties(&changes), vec!["lastName"]);
    assert_eq!(changes[0].value, json!("Hammer"));
}

#[test]
fn test_compute_diff_without_loaded_row() {
    let registry = registry();
    let user = registry.get("User").unwrap();

    let entity = object(json!({"firstName": "Timber", "updatedAt": "2024-01-01T00:00:00Z"}));
    let changes = compute_diff(&user, &entity, None);
    assert_eq!(changed_properties(&changes), vec!["firstName"]);
}

#[test]
fn test_compute_diff_owned_relation() {
    let registry = registry();
    let post = registry.get("Post").unwrap();

    let loaded = object(json!({"id": 1, "title": "a", "author": {"id": 1}}));
    let same = object(json!({"id": 1, "author": 1}));
    assert!(compute_diff(&post, &same, Some(&loaded)).is_empty());

    let moved = object(json!({"id": 1, "author": {"id": 2}}));
    let changes = compute_diff(&post, &moved, Some(&loaded));
    assert_eq!(changed_properties(&changes), vec!["author"]);
    assert!(matches!(changes[0].target, ChangeTarget::Relation(_)));
}

#[test]
fn test_subject_change_map() {
    let registry = registry();
    let user = registry.get("User").unwrap();

    let mut subject = Subject::new(
        user,
        SubjectAction::Update,
        object(json!({"id": 1, "firstName": "Timber"})),
    )
    .with_database_entity(object(json!({"id": 1, "firstName": "Timber"})));
    assert!(subject.recompute().is_empty());
    assert!(!subject.must_be_updated());

    subject.entity.insert("firstName".into(), json!("Saw"));
    subject.recompute();
    assert!(subject.must_be_updated());
    assert_eq!(subject.changed_values(), object(json!({"firstName": "Saw"})));
    assert_eq!(subject.identifier(), Some(object(json!({"id": 1}))));
}

#[test]
fn test_subject_identifier_falls_back_to_loaded_row() {
    let registry = registry();
    let membership = registry.get("Membership").unwrap();

    let subject = Subject::new(membership, SubjectAction::Remove, object(json!({"role": "admin"})))
        .with_database_entity(object(json!({"userId": 1, "groupId": 2, "role": "admin"})));
    assert_eq!(subject.identifier(), Some(object(json!({"userId": 1, "groupId": 2}))));
}

#[test]
fn test_key_match_condition_shapes() {
    let columns = vec!["userId".to_string(), "groupId".to_string()];

    let none = key_match_condition(Dialect::Postgres, None, &columns, Vec::new(), "k");
    assert_eq!(none.sql, "1=0");
    assert!(none.params.is_empty());

    let one = key_match_condition(
        Dialect::Postgres,
        Some("m"),
        &columns,
        vec![vec![Value::Int(1), Value::Int(2)]],
        "k",
    );
    assert_eq!(one.sql, r#""m"."userId" = :k_0_0 AND "m"."groupId" = :k_0_1"#);
    assert_eq!(one.params.get("k_0_1"), Some(&Value::Int(2)));

    let two = key_match_condition(
        Dialect::MySql,
        None,
        &columns,
        vec![vec![Value::Int(1), Value::Int(2)], vec![Value::Int(3), Value::Int(4)]],
        "k",
    );
    assert_eq!(
        two.sql,
        "((`userId` = :k_0_0 AND `groupId` = :k_0_1) OR (`userId` = :k_1_0 AND `groupId` = :k_1_1))"
    );
    assert_eq!(two.params.len(), 4);
}

#[test]
fn test_referenced_value_reads_id_map() {
    let registry = registry();
    let user = registry.get("User").unwrap();
    let post = registry.get("Post").unwrap();
    let author = post.find_relation("author").unwrap();

    let value = referenced_value(Dialect::Postgres, &user, &object(json!({"id": 5})), &author.join_columns[0]).unwrap();
    assert_eq!(value, Value::Int(5));

    let missing = referenced_value(Dialect::Postgres, &user, &object(json!({})), &author.join_columns[0]);
    assert!(matches!(missing, Err(OrmError::EntityIdMissing { .. })));
}
