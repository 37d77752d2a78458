use serde_json::json;

use super::*;
use crate::testing::registry;

fn object(value: serde_json::Value) -> EntityObject {
    value.as_object().cloned().unwrap()
}

#[test]
fn test_find_columns_plain_property() {
    let registry = registry();
    let user = registry.get("User").unwrap();
    let columns = user.find_columns_with_property_path("firstName");
    assert_eq!(columns.len(), 1);
    assert_eq!(columns[0].database_name, "first_name");
}

#[test]
fn test_find_columns_relation_yields_join_columns() {
    let registry = registry();
    let post = registry.get("Post").unwrap();

    let by_relation = post.find_columns_with_property_path("author");
    assert_eq!(by_relation.len(), 1);
    assert_eq!(by_relation[0].database_name, "authorId");

    let by_referenced = post.find_columns_with_property_path("author.id");
    assert_eq!(by_referenced[0].database_name, "authorId");
}

#[test]
fn test_find_columns_unknown_is_empty() {
    let registry = registry();
    let user = registry.get("User").unwrap();
    assert!(user.find_columns_with_property_path("nickname").is_empty());
    // inverse relations own no columns
    assert!(user.find_columns_with_property_path("posts").is_empty());
}

#[test]
fn test_find_columns_embedded_prefix() {
    let meta = EntityMetadataBuilder::new("Account", "accounts")
        .primary_generated("id")
        .column("address.city", ColumnType::Text)
        .column("address.zip", ColumnType::Text)
        .build();
    let columns = meta.find_columns_with_property_path("address");
    assert_eq!(columns.len(), 2);
    assert_eq!(columns[0].database_name, "address_city");
}

#[test]
fn test_get_entity_id_map() {
    let registry = registry();
    let membership = registry.get("Membership").unwrap();

    let ids = membership
        .get_entity_id_map(&object(json!({"userId": 1, "groupId": 2, "role": "admin"})))
        .unwrap();
    assert_eq!(ids.len(), 2);
    assert_eq!(ids["groupId"], json!(2));

    assert!(membership
        .get_entity_id_map(&object(json!({"userId": 1})))
        .is_none());
    assert!(membership
        .get_entity_id_map(&object(json!({"userId": 1, "groupId": null})))
        .is_none());
}

#[test]
fn test_ensure_entity_id_map_scalar() {
    let registry = registry();
    let user = registry.get("User").unwrap();
    let ids = user.ensure_entity_id_map(&json!(7)).unwrap();
    assert_eq!(ids["id"], json!(7));

    let membership = registry.get("Membership").unwrap();
    assert!(membership.ensure_entity_id_map(&json!(7)).is_none());
}

#[test]
fn test_join_column_value_from_nested_object() {
    let registry = registry();
    let post = registry.get("Post").unwrap();
    let fk = post.find_column_with_database_name("authorId").unwrap();

    let entity = object(json!({"title": "x", "author": {"id": 4, "firstName": "A"}}));
    assert_eq!(fk.get_entity_value(&entity), Some(&json!(4)));

    let bare = object(json!({"author": 9}));
    assert_eq!(fk.get_entity_value(&bare), Some(&json!(9)));

    let mut empty = EntityObject::new();
    fk.set_entity_value(&mut empty, json!(3));
    assert_eq!(empty["author"], json!({"id": 3}));
}

#[test]
fn test_registry_inheritance() {
    let registry = registry();
    let article = registry.get("Article").unwrap();
    assert_eq!(article.table_name, "content");
    assert!(article.find_column_with_property_path("title").is_some());
    assert!(article.find_column_with_property_path("body").is_some());

    assert!(registry.is_subtype_of("Article", "Content"));
    assert!(!registry.is_subtype_of("Content", "Article"));

    let content = registry.get("Content").unwrap();
    assert_eq!(content.children, vec!["Article".to_string()]);
    assert_eq!(registry.descendants("Content").len(), 1);
}

#[test]
fn test_registry_lookup_by_table_name() {
    let registry = registry();
    assert_eq!(registry.get("users").unwrap().name, "User");
    assert!(matches!(
        registry.get("nope"),
        Err(crate::error::OrmError::MetadataNotFound(_))
    ));
}

#[test]
fn test_inverse_junction_is_swapped() {
    let registry = registry();
    let category = registry.get("Category").unwrap();
    let posts = category.find_relation("posts").unwrap();
    let junction = registry.junction(posts).unwrap();
    assert_eq!(junction.table_name, "post_categories");
    assert_eq!(junction.owner_columns[0].database_name, "categoryId");
    assert_eq!(junction.inverse_columns[0].database_name, "postId");
}

#[test]
fn test_registry_table_prefix() {
    let registry = registry().with_table_prefix("app_");
    assert_eq!(registry.get("User").unwrap().table_name, "app_users");
    let post = registry.get("Post").unwrap();
    let categories = post.find_relation("categories").unwrap();
    assert_eq!(categories.junction.as_ref().unwrap().table_name, "app_post_categories");
    // inverse side reads the owner's prefixed junction
    let category = registry.get("Category").unwrap();
    let junction = registry.junction(category.find_relation("posts").unwrap()).unwrap();
    assert_eq!(junction.table_name, "app_post_categories");
}
