use serde_json::json;

use super::*;
use crate::driver::DriverResult;
use crate::object;
use crate::testing::source;

fn row(pairs: &[(&str, Value)]) -> Row {
    Row::from_pairs(pairs.iter().map(|(k, v)| (k.to_string(), v.clone())))
}

#[test]
fn test_row_key_skips_null_keys() {
    let r = row(&[("u_id", Value::Null), ("u_a", Value::Int(2))]);
    assert_eq!(row_key(Dialect::Postgres, &r, "u", &["id".to_string()]), None);
    assert_eq!(
        row_key(Dialect::Postgres, &r, "u", &["id".to_string(), "a".to_string()]),
        Some("\u{0}|2".to_string())
    );
}

#[test]
fn test_null_key_part_differs_from_null_text() {
    let null = Value::Null;
    let text = Value::from("null");
    let two = Value::Int(2);
    let with_null = key_of(&[Some(&null), Some(&two)]);
    let with_text = key_of(&[Some(&text), Some(&two)]);
    assert_eq!(with_text, Some("null|2".to_string()));
    assert_ne!(with_null, with_text);
    assert_eq!(with_null, key_of(&[None, Some(&two)]));
}

#[test]
fn test_collect_parents_distinct_in_order() {
    let rows = vec![
        row(&[("u_id", Value::Int(2))]),
        row(&[("u_id", Value::Int(1))]),
        row(&[("u_id", Value::Int(2))]),
        row(&[("u_id", Value::Null)]),
    ];
    let parents = collect_parents(Dialect::Postgres, &rows, "u", &["id".to_string()]);
    assert_eq!(parents, vec![vec![Value::Int(2)], vec![Value::Int(1)]]);
}

#[test]
fn test_related_keys_of_relations() {
    let registry = crate::testing::registry();
    let user = registry.get("User").unwrap();
    let post = registry.get("Post").unwrap();

    let posts = RelatedKeys::resolve(&registry, &user, user.find_relation("posts").unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(posts.target, "Post");
    assert_eq!(posts.parent_columns, vec![("authorId".to_string(), "id".to_string())]);

    let categories = RelatedKeys::resolve(&registry, &post, post.find_relation("categories").unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(categories.target, "post_categories");
    assert_eq!(categories.id_columns, vec![("categoryId".to_string(), "id".to_string())]);

    assert!(
        RelatedKeys::resolve(&registry, &post, post.find_relation("author").unwrap())
            .unwrap()
            .is_none()
    );
}

#[test]
fn test_transform_nests_joined_rows() {
    let (source, _) = source(Dialect::Postgres);
    let mut qb = source.query_builder("User", "u");
    qb.left_join_and_select("u.posts", "p");
    let map = qb.expression_map();

    let rows = vec![
        row(&[("u_id", Value::Int(1)), ("u_first_name", Value::from("Timber")), ("p_id", Value::Int(10)), ("p_title", Value::from("a"))]),
        row(&[("u_id", Value::Int(1)), ("u_first_name", Value::from("Timber")), ("p_id", Value::Int(11)), ("p_title", Value::from("b"))]),
        row(&[("u_id", Value::Int(2)), ("u_first_name", Value::from("Saw")), ("p_id", Value::Null), ("p_title", Value::Null)]),
    ];
    let entities = RawSqlResultsToEntityTransformer::new(map, source.registry(), &[], &[])
        .transform(&rows, map.main_alias().unwrap())
        .unwrap();

    assert_eq!(
        entities,
        vec![
            object(json!({
                "id": 1,
                "firstName": "Timber",
                "posts": [{"id": 10, "title": "a"}, {"id": 11, "title": "b"}]
            })),
            object(json!({"id": 2, "firstName": "Saw", "posts": []})),
        ]
    );
}

#[test]
fn test_transform_to_one_join_without_match_is_null() {
    let (source, _) = source(Dialect::Postgres);
    let mut qb = source.query_builder("Post", "p");
    qb.left_join_and_select("p.author", "a");
    let map = qb.expression_map();

    let rows = vec![row(&[("p_id", Value::Int(1)), ("a_id", Value::Null)])];
    let entities = RawSqlResultsToEntityTransformer::new(map, source.registry(), &[], &[])
        .transform(&rows, map.main_alias().unwrap())
        .unwrap();
    assert_eq!(entities, vec![object(json!({"id": 1, "author": null}))]);
}

#[test]
fn test_transform_resolves_single_table_subtype() {
    let (source, _) = source(Dialect::Postgres);
    let qb = source.query_builder("Content", "c");
    let map = qb.expression_map();

    let rows = vec![
        row(&[("c_id", Value::Int(1)), ("c_kind", Value::from("article")), ("c_body", Value::from("text"))]),
        row(&[("c_id", Value::Int(2)), ("c_kind", Value::from("content")), ("c_body", Value::from("ignored"))]),
    ];
    let entities = RawSqlResultsToEntityTransformer::new(map, source.registry(), &[], &[])
        .transform(&rows, map.main_alias().unwrap())
        .unwrap();
    assert_eq!(entities[0], object(json!({"id": 1, "kind": "article", "body": "text"})));
    assert_eq!(entities[1], object(json!({"id": 2, "kind": "content"})));
}

#[tokio::test]
async fn test_load_relation_ids_of_one_to_many() {
    let (source, driver) = source(Dialect::Postgres);
    driver.respond(DriverResult::from_rows(vec![
        row(&[("u_id", Value::Int(1))]),
        row(&[("u_id", Value::Int(2))]),
    ]));
    driver.respond(DriverResult::from_rows(vec![
        row(&[("parent_0", Value::Int(1)), ("id_0", Value::Int(10))]),
        row(&[("parent_0", Value::Int(1)), ("id_0", Value::Int(11))]),
    ]));

    let mut qb = source.query_builder("User", "u");
    qb.load_relation_id_and_map("u.postIds", "u.posts");
    let users = qb.get_many().await.unwrap();

    assert_eq!(
        users,
        vec![object(json!({"id": 1, "postIds": [10, 11]})), object(json!({"id": 2, "postIds": []}))]
    );
    assert_eq!(
        driver.statements()[1],
        r#"SELECT "rel"."authorId" AS "parent_0", "rel"."id" AS "id_0" FROM "posts" "rel" WHERE "rel"."authorId" IN ($1, $2)"#
    );
    assert_eq!(driver.params(1), vec![Value::Int(1), Value::Int(2)]);
}

#[tokio::test]
async fn test_load_relation_id_of_owner_reads_join_column() {
    let (source, driver) = source(Dialect::Postgres);
    driver.respond(DriverResult::from_rows(vec![
        row(&[("p_id", Value::Int(1)), ("p_authorId", Value::Int(7))]),
        row(&[("p_id", Value::Int(2)), ("p_authorId", Value::Null)]),
    ]));

    let mut qb = source.query_builder("Post", "p");
    qb.load_relation_id_and_map("authorId", "p.author");
    let posts = qb.get_many().await.unwrap();

    assert_eq!(
        posts,
        vec![object(json!({"id": 1, "authorId": 7})), object(json!({"id": 2, "authorId": null}))]
    );
    assert_eq!(driver.statements().len(), 1);
}

#[tokio::test]
async fn test_load_relation_ids_through_junction() {
    let (source, driver) = source(Dialect::Postgres);
    driver.respond(DriverResult::from_rows(vec![row(&[("p_id", Value::Int(1))])]));
    driver.respond(DriverResult::from_rows(vec![row(&[
        ("parent_0", Value::Int(1)),
        ("id_0", Value::Int(4)),
    ])]));

    let mut qb = source.query_builder("Post", "p");
    qb.load_relation_id_and_map("p.categoryIds", "p.categories");
    let posts = qb.get_many().await.unwrap();

    assert_eq!(posts, vec![object(json!({"id": 1, "categoryIds": [4]}))]);
    assert_eq!(
        driver.statements()[1],
        r#"SELECT "rel"."postId" AS "parent_0", "rel"."categoryId" AS "id_0" FROM "post_categories" "rel" WHERE "rel"."postId" IN ($1)"#
    );
}

#[tokio::test]
async fn test_load_relation_counts() {
    let (source, driver) = source(Dialect::Postgres);
    driver.respond(DriverResult::from_rows(vec![
        row(&[("u_id", Value::Int(1))]),
        row(&[("u_id", Value::Int(2))]),
    ]));
    driver.respond(DriverResult::from_rows(vec![row(&[
        ("parent_0", Value::Int(1)),
        ("cnt", Value::Int(2)),
    ])]));

    let mut qb = source.query_builder("User", "u");
    qb.load_relation_count_and_map("u.postCount", "u.posts");
    let users = qb.get_many().await.unwrap();

    assert_eq!(
        users,
        vec![object(json!({"id": 1, "postCount": 2})), object(json!({"id": 2, "postCount": 0}))]
    );
    assert_eq!(
        driver.statements()[1],
        r#"SELECT "rel"."authorId" AS "parent_0", COUNT(*) AS "cnt" FROM "posts" "rel" WHERE "rel"."authorId" IN ($1, $2) GROUP BY "rel"."authorId""#
    );
}

#[tokio::test]
async fn test_relation_count_of_owner_side_is_rejected() {
    let (source, driver) = source(Dialect::Postgres);
    driver.respond(DriverResult::from_rows(vec![row(&[("p_id", Value::Int(1))])]));
    let mut qb = source.query_builder("Post", "p");
    qb.load_relation_count_and_map("p.authorCount", "p.author");
    assert!(matches!(qb.get_many().await, Err(crate::error::OrmError::Usage(_))));
}

#[tokio::test]
async fn test_no_parents_skips_the_extra_query() {
    let (source, driver) = source(Dialect::Postgres);
    let mut qb = source.query_builder("User", "u");
    qb.load_relation_id_and_map("u.postIds", "u.posts");
    assert!(qb.get_many().await.unwrap().is_empty());
    assert_eq!(driver.statements().len(), 1);
}
