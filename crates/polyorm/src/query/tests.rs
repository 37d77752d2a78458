use serde_json::json;

use super::*;
use crate::connection::DataSource;
use crate::dialect::{Dialect, LockMode};
use crate::driver::DriverResult;
use crate::metadata::EntityObject;
use crate::object;
use crate::row::Row;
use crate::testing::source;

const CATEGORY_COLUMNS: &str = r#""c"."id" AS "c_id", "c"."name" AS "c_name""#;

// ==================== SELECT ====================

#[test]
fn test_select_entity_columns() {
    let (source, _) = source(Dialect::Postgres);
    let qb = source.query_builder("Category", "c");
    assert_eq!(
        qb.get_query().unwrap(),
        format!(r#"SELECT {CATEGORY_COLUMNS} FROM "categories" "c""#)
    );
}

#[test]
fn test_select_where_order_and_take() {
    let (source, _) = source(Dialect::Postgres);
    let mut qb = source.query_builder("Category", "c");
    qb.where_("c.name = :name")
        .set_parameter("name", "books")
        .order_by("c.id", Order::Desc)
        .take(5);

    assert_eq!(
        qb.get_query().unwrap(),
        format!(r#"SELECT {CATEGORY_COLUMNS} FROM "categories" "c" WHERE "c"."name" = :name ORDER BY "c"."id" DESC LIMIT 5"#)
    );
    let (sql, params) = qb.get_query_and_parameters().unwrap();
    assert!(sql.contains(r#"WHERE "c"."name" = $1 ORDER BY"#));
    assert_eq!(params, vec![Value::from("books")]);
}

#[test]
fn test_compiling_twice_is_identical() {
    let (source, _) = source(Dialect::Postgres);
    let mut qb = source.query_builder("Category", "c");
    qb.where_(FindWhere::new().eq("name", "books"))
        .or_where(FindWhere::new().op("id", Op::In(vec![Value::Int(1), Value::Int(2)])));

    let first = qb.get_query_and_parameters().unwrap();
    let second = qb.get_query_and_parameters().unwrap();
    assert_eq!(first, second);
    assert!(first.0.ends_with(r#"WHERE "c"."name" = $1 OR "c"."id" IN ($2, $3)"#));
}

#[test]
fn test_mysql_positional_placeholders_repeat() {
    let (source, _) = source(Dialect::MySql);
    let mut qb = source.query_builder("Category", "c");
    qb.where_("c.name = :name OR c.name = :name").set_parameter("name", "x");

    let (sql, params) = qb.get_query_and_parameters().unwrap();
    assert!(sql.ends_with("WHERE `c`.`name` = ? OR `c`.`name` = ?"));
    assert_eq!(params.len(), 2);
}

#[test]
fn test_select_partial_columns_keep_primary_key() {
    let (source, _) = source(Dialect::Postgres);
    let mut qb = source.query_builder("User", "u");
    qb.select(["u.firstName"]);
    assert_eq!(
        qb.get_query().unwrap(),
        r#"SELECT "u"."id" AS "u_id", "u"."first_name" AS "u_first_name" FROM "users" "u" WHERE "u"."deletedAt" IS NULL"#
    );

    qb.with_deleted();
    assert_eq!(
        qb.get_query().unwrap(),
        r#"SELECT "u"."id" AS "u_id", "u"."first_name" AS "u_first_name" FROM "users" "u""#
    );
}

#[test]
fn test_where_in_ids_inlines_numeric_keys() {
    let (source, _) = source(Dialect::Postgres);
    let mut qb = source.query_builder("Category", "c");
    qb.where_in_ids([json!(1), json!({"id": 2})]);
    assert!(qb.get_query().unwrap().ends_with(r#"WHERE "c"."id" IN (1, 2)"#));
}

#[test]
fn test_where_in_ids_without_ids_matches_nothing() {
    let (source, _) = source(Dialect::Postgres);
    let mut qb = source.query_builder("Category", "c");
    qb.where_in_ids(Vec::new());
    assert!(qb.get_query().unwrap().ends_with("WHERE 0=1"));
}

#[test]
fn test_where_in_ids_composite_key() {
    let (source, _) = source(Dialect::Postgres);
    let mut qb = source.query_builder("Membership", "m");
    qb.select(["m"]).where_in_ids([json!({"userId": 1, "groupId": 2})]);
    let (sql, params) = qb.get_query_and_parameters().unwrap();
    assert!(sql.ends_with(r#"WHERE "m"."userId" = $1 AND "m"."groupId" = $2"#));
    assert_eq!(params, vec![Value::Int(1), Value::Int(2)]);
}

#[test]
fn test_where_in_ids_missing_key_is_deferred() {
    let (source, _) = source(Dialect::Postgres);
    let mut qb = source.query_builder("Membership", "m");
    qb.where_in_ids([json!({"userId": 1})]).take(1);
    assert!(matches!(qb.get_query(), Err(OrmError::EntityIdMissing { .. })));
}

#[test]
fn test_unknown_property_in_find_where() {
    let (source, _) = source(Dialect::Postgres);
    let mut qb = source.query_builder("Category", "c");
    qb.where_(FindWhere::new().eq("missing", 1));
    assert!(matches!(qb.get_query(), Err(OrmError::ColumnNotFound { .. })));
}

#[test]
fn test_brackets_group_conditions() {
    let (source, _) = source(Dialect::Postgres);
    let mut qb = source.query_builder("Category", "c");
    qb.where_("c.id > 1").and_where(Brackets::new(|qb| {
        qb.where_("c.name = 'a'").or_where("c.name = 'b'");
    }));
    assert!(
        qb.get_query()
            .unwrap()
            .ends_with(r#"WHERE "c"."id" > 1 AND ("c"."name" = 'a' OR "c"."name" = 'b')"#)
    );
}

#[test]
fn test_single_table_child_filters_discriminator() {
    let (source, _) = source(Dialect::Postgres);
    let qb = source.query_builder("Article", "a");
    let sql = qb.get_query().unwrap();
    assert!(sql.contains(r#"FROM "content" "a""#));
    assert!(sql.ends_with(r#"WHERE "a"."kind" IN (:...discriminatorColumnValues)"#));

    let (sql, params) = qb.get_query_and_parameters().unwrap();
    assert!(sql.ends_with(r#"IN ($1)"#));
    assert_eq!(params, vec![Value::from("article")]);
}

#[test]
fn test_join_to_one_owner() {
    let (source, _) = source(Dialect::Postgres);
    let mut qb = source.query_builder("Post", "p");
    qb.left_join_and_select("p.author", "a");
    let sql = qb.get_query().unwrap();
    assert!(sql.contains(r#""a"."first_name" AS "a_first_name""#));
    assert!(sql.ends_with(r#"FROM "posts" "p" LEFT JOIN "users" "a" ON "a"."id"="p"."authorId" AND "a"."deletedAt" IS NULL"#));
}

#[test]
fn test_join_many_to_many_through_junction() {
    let (source, _) = source(Dialect::Postgres);
    let mut qb = source.query_builder("Post", "p");
    qb.inner_join("p.categories", "c");
    assert!(qb.get_query().unwrap().ends_with(
        r#"INNER JOIN "post_categories" "p_c" ON "p_c"."postId"="p"."id" INNER JOIN "categories" "c" ON "p_c"."categoryId"="c"."id""#
    ));
}

#[test]
fn test_join_one_to_many_with_extra_condition() {
    let (source, _) = source(Dialect::Postgres);
    let mut qb = source.query_builder("User", "u");
    qb.with_deleted().left_join_on("u.posts", "p", "p.title = :title").set_parameter("title", "t");
    assert!(
        qb.get_query()
            .unwrap()
            .ends_with(r#"LEFT JOIN "posts" "p" ON "p"."authorId"="u"."id" AND ("p"."title" = :title)"#)
    );
}

#[test]
fn test_unknown_relation_join_is_deferred() {
    let (source, _) = source(Dialect::Postgres);
    let mut qb = source.query_builder("Post", "p");
    qb.left_join("p.nothing", "n");
    assert!(matches!(qb.get_query(), Err(OrmError::Usage(_))));
}

#[test]
fn test_pagination_per_dialect() {
    for (dialect, tail) in [
        (Dialect::Postgres, " LIMIT 10 OFFSET 20"),
        (Dialect::MsSql, " ORDER BY (SELECT NULL) OFFSET 20 ROWS FETCH NEXT 10 ROWS ONLY"),
        (Dialect::Oracle, " OFFSET 20 ROWS FETCH NEXT 10 ROWS ONLY"),
    ] {
        let (source, _) = source(dialect);
        let mut qb = source.query_builder("Category", "c");
        qb.limit(10).offset(20);
        assert!(qb.get_query().unwrap().ends_with(tail), "{dialect:?}");
    }
}

#[test]
fn test_sub_query_parameters_do_not_collide() {
    let (source, _) = source(Dialect::Postgres);
    let mut qb = source.query_builder("Post", "p");
    qb.where_(FindWhere::new().eq("title", "a"));
    let mut sub = qb.sub_query();
    sub.select(["c.id"]).from("Category", "c").where_(FindWhere::new().eq("name", "b"));

    let outer: Vec<String> = qb.get_parameters().into_keys().collect();
    let inner: Vec<String> = sub.get_parameters().into_keys().collect();
    assert!(inner.iter().all(|name| !outer.contains(name)));
    assert!(sub.get_query().unwrap().starts_with("(SELECT"));
}

#[test]
fn test_optimistic_lock_needs_version_column() {
    let (source, _) = source(Dialect::Postgres);
    let mut qb = source.query_builder("Category", "c");
    qb.set_optimistic_lock(LockVersion::Version(1));
    assert!(matches!(qb.get_query(), Err(OrmError::OptimisticLockCannotBeUsed(_))));
}

#[test]
fn test_pessimistic_lock_suffix() {
    let (source, _) = source(Dialect::Postgres);
    let mut qb = source.query_builder("Category", "c");
    qb.set_lock(LockMode::PessimisticWrite);
    assert!(qb.get_query().unwrap().ends_with(" FOR UPDATE"));
}

#[tokio::test]
async fn test_get_many_hydrates_entities() {
    let (source, driver) = source(Dialect::Postgres);
    driver.respond(DriverResult::from_rows(vec![
        Row::from_pairs([("c_id", Value::Int(1)), ("c_name", Value::from("books"))]),
        Row::from_pairs([("c_id", Value::Int(2)), ("c_name", Value::from("music"))]),
    ]));

    let categories = source.query_builder("Category", "c").get_many().await.unwrap();
    assert_eq!(
        categories,
        vec![object(json!({"id": 1, "name": "books"})), object(json!({"id": 2, "name": "music"}))]
    );
    assert_eq!(driver.statements().len(), 1);
}

#[tokio::test]
async fn test_get_one_or_fail_without_rows() {
    let (source, _) = source(Dialect::Postgres);
    let result = source.query_builder("Category", "c").get_one_or_fail().await;
    assert!(matches!(result, Err(OrmError::NotFound(_))));
}

#[tokio::test]
async fn test_optimistic_version_mismatch_names_both_versions() {
    let (source, driver) = source(Dialect::Postgres);
    driver.respond(DriverResult::from_rows(vec![Row::from_pairs([
        ("u_id", Value::Int(1)),
        ("u_first_name", Value::from("Ada")),
        ("u_version", Value::Int(2)),
    ])]));

    let mut qb = source.query_builder("User", "u");
    qb.where_in_ids([json!(1)]).set_optimistic_lock(LockVersion::Version(1));
    match qb.get_one().await {
        Err(OrmError::OptimisticLockVersionMismatch { entity, expected, actual }) => {
            assert_eq!(entity, "User");
            assert_eq!(expected, "1");
            assert_eq!(actual, "2");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_count_ignores_limit_and_offset() {
    let (source, driver) = source(Dialect::Postgres);
    driver.respond(DriverResult::from_rows(vec![Row::from_pairs([("cnt", Value::Int(7))])]));

    let mut qb = source.query_builder("Category", "c");
    qb.order_by("c.name", Order::Asc).limit(1).offset(5);
    assert!(qb.get_query().unwrap().ends_with(r#" ORDER BY "c"."name" ASC LIMIT 1 OFFSET 5"#));

    assert_eq!(qb.get_count().await.unwrap(), 7);
    assert_eq!(
        driver.statements(),
        vec![r#"SELECT COUNT(DISTINCT("c"."id")) AS "cnt" FROM "categories" "c""#]
    );
}

#[tokio::test]
async fn test_count_strips_group_by() {
    let (source, driver) = source(Dialect::Postgres);
    driver.respond(DriverResult::from_rows(vec![Row::from_pairs([("cnt", Value::Int(4))])]));

    let mut qb = source.query_builder("Category", "c");
    qb.group_by("c.name").limit(1).offset(5);
    assert!(qb.get_query().unwrap().ends_with(r#" GROUP BY "c"."name" LIMIT 1 OFFSET 5"#));

    assert_eq!(qb.get_count().await.unwrap(), 4);
    assert_eq!(
        driver.statements(),
        vec![r#"SELECT COUNT(DISTINCT("c"."id")) AS "cnt" FROM "categories" "c""#]
    );
}

// ==================== ALIASES AND PARAMETERS ====================

#[test]
fn test_duplicate_alias_is_rejected() {
    let mut aliases = AliasRegistry::new();
    aliases.create_alias(AliasDescriptor::new(AliasType::From).named("p")).unwrap();
    assert!(matches!(
        aliases.create_alias(AliasDescriptor::new(AliasType::Join).named("p")),
        Err(OrmError::DuplicateAlias(name)) if name == "p"
    ));

    let first = aliases
        .create_alias(AliasDescriptor::new(AliasType::Other).table("app.posts"))
        .unwrap()
        .name
        .clone();
    let second = aliases
        .create_alias(AliasDescriptor::new(AliasType::Other).table("app.posts"))
        .unwrap()
        .name
        .clone();
    assert_eq!(first, "posts_1");
    assert_eq!(second, "posts_2");

    let (source, _) = source(Dialect::Postgres);
    let mut qb = source.query_builder("Post", "p");
    qb.left_join("p.categories", "p");
    assert!(matches!(qb.get_query(), Err(OrmError::DuplicateAlias(name)) if name == "p"));
}

#[test]
fn test_find_where_parameters() {
    let (source, _) = source(Dialect::Postgres);
    let mut delete = source.delete_builder("User");
    delete.where_(
        FindWhere::new()
            .eq("id", 1)
            .null("lastName")
            .op("version", Op::In(vec![Value::Int(2), Value::Int(3)])),
    );

    let (sql, params) = delete.get_query_and_parameters().unwrap();
    assert_eq!(
        sql,
        r#"DELETE FROM "users" WHERE "id" = $1 AND "lastName" IS NULL AND "version" IN ($2, $3)"#
    );
    assert_eq!(params, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
}

#[test]
fn test_raw_property_rewrite_skips_literals_and_quoted_identifiers() {
    let (source, _) = source(Dialect::Postgres);
    let mut qb = source.query_builder("User", "u");
    qb.with_deleted()
        .where_(r#"u.firstName = 'u.firstName' AND "u.firstName" IS NOT NULL AND u.firstNameX = 1"#);

    let sql = qb.get_query().unwrap();
    let (_, condition) = sql.split_once(" WHERE ").unwrap();
    assert_eq!(
        condition,
        r#""u"."first_name" = 'u.firstName' AND "u.firstName" IS NOT NULL AND u.firstNameX = 1"#
    );
}

// ==================== INSERT ====================

#[test]
fn test_insert_entity_postgres() {
    let (source, _) = source(Dialect::Postgres);
    let mut insert = source.insert_builder();
    insert
        .into_table("User")
        .value(object(json!({"firstName": "Timber", "lastName": "Saw"})));
    assert_eq!(
        insert.get_query().unwrap(),
        r#"INSERT INTO "users"("first_name", "lastName", "version") VALUES (:orm_insert_0_0, :orm_insert_0_1, :orm_insert_0_2) RETURNING "id", "version", "updatedAt", "deletedAt""#
    );
    let (_, params) = insert.get_query_and_parameters().unwrap();
    assert_eq!(params, vec![Value::from("Timber"), Value::from("Saw"), Value::Int(1)]);
}

#[test]
fn test_insert_missing_cells_sqlite() {
    let (source, _) = source(Dialect::Sqlite);
    let mut insert = source.insert_builder();
    insert.into_table("User").values(vec![
        object(json!({"firstName": "a"})),
        object(json!({"firstName": "b", "lastName": "c"})),
    ]);
    assert_eq!(
        insert.get_sql().unwrap(),
        r#"INSERT INTO "users"("first_name", "lastName", "version") VALUES (?, NULL, ?), (?, ?, ?) RETURNING "id", "version", "updatedAt", "deletedAt""#
    );
}

#[test]
fn test_insert_without_returning_on_mysql() {
    let (source, _) = source(Dialect::MySql);
    let mut insert = source.insert_builder();
    insert
        .into_table("Category")
        .value(object(json!({"name": "books"})))
        .or_update(["name"], ["id"], false);
    assert_eq!(
        insert.get_sql().unwrap(),
        "INSERT INTO `categories`(`name`) VALUES (?) ON DUPLICATE KEY UPDATE `name` = VALUES(`name`)"
    );
}

#[test]
fn test_insert_upsert_postgres() {
    let (source, _) = source(Dialect::Postgres);
    let mut insert = source.insert_builder();
    insert
        .into_table("Category")
        .value(object(json!({"id": 1, "name": "books"})))
        .or_update(["name"], ["id"], true)
        .update_entity(false);
    assert_eq!(
        insert.get_sql().unwrap(),
        r#"INSERT INTO "categories"("id", "name") VALUES ($1, $2) ON CONFLICT ( "id" ) DO UPDATE SET "name" = EXCLUDED."name" WHERE ("categories"."name" IS DISTINCT FROM EXCLUDED."name")"#
    );
}

#[test]
fn test_insert_or_ignore() {
    let (postgres, _) = source(Dialect::Postgres);
    let mut insert = postgres.insert_builder();
    insert.into_table("Category").value(object(json!({"name": "x"}))).or_ignore();
    assert!(insert.get_query().unwrap().ends_with(" ON CONFLICT DO NOTHING RETURNING \"id\""));

    let (source, _) = source(Dialect::MySql);
    let mut insert = source.insert_builder();
    insert.into_table("Category").value(object(json!({"name": "x"}))).or_ignore();
    assert!(insert.get_query().unwrap().starts_with("INSERT IGNORE INTO"));
}

#[test]
fn test_insert_plain_table() {
    let (source, _) = source(Dialect::Postgres);
    let mut insert = source.insert_builder();
    insert.into_table("audit_log").value(object(json!({"action": "login", "actor": 7})));
    assert_eq!(
        insert.get_sql().unwrap(),
        r#"INSERT INTO "audit_log"("action", "actor") VALUES ($1, $2)"#
    );
}

#[test]
fn test_insert_empty_row_uses_default_values() {
    let (source, _) = source(Dialect::Postgres);
    let mut insert = source.insert_builder();
    insert.into_table("Category").value(EntityObject::new()).update_entity(false);
    assert_eq!(insert.get_query().unwrap(), r#"INSERT INTO "categories" DEFAULT VALUES"#);
}

#[test]
fn test_insert_without_values() {
    let (source, _) = source(Dialect::Postgres);
    let mut insert = source.insert_builder();
    insert.into_table("Category");
    assert!(matches!(insert.get_query(), Err(OrmError::InsertValuesMissing)));
}

#[test]
fn test_insert_single_table_child_writes_discriminator() {
    let (source, _) = source(Dialect::Postgres);
    let mut insert = source.insert_builder();
    insert
        .into_table("Article")
        .value(object(json!({"title": "t", "body": "b"})))
        .update_entity(false);
    let (sql, params) = insert.get_query_and_parameters().unwrap();
    assert_eq!(sql, r#"INSERT INTO "content"("title", "kind", "body") VALUES ($1, $2, $3)"#);
    assert_eq!(params[1], Value::from("article"));
}

#[test]
fn test_returning_unsupported_on_mysql() {
    let (source, _) = source(Dialect::MySql);
    let mut insert = source.insert_builder();
    insert
        .into_table("Category")
        .value(object(json!({"name": "x"})))
        .returning(["id"]);
    assert!(matches!(insert.get_query(), Err(OrmError::ReturningNotSupported { .. })));
}

#[test]
fn test_mssql_output_clause() {
    let (source, _) = source(Dialect::MsSql);
    let mut insert = source.insert_builder();
    insert.into_table("Category").value(object(json!({"name": "x"})));
    assert_eq!(
        insert.get_sql().unwrap(),
        "INSERT INTO [categories]([name]) OUTPUT INSERTED.[id] VALUES (@0)"
    );
}

#[tokio::test]
async fn test_insert_generates_uuid_client_side() {
    let (source, driver) = source(Dialect::MySql);
    let result = source
        .insert_builder()
        .into_table("Photo")
        .value(object(json!({"url": "a.png"})))
        .execute()
        .await
        .unwrap();

    assert_eq!(driver.statements(), vec!["INSERT INTO `photos`(`id`, `url`) VALUES (?, ?)".to_string()]);
    let id = result.generated_maps[0]["id"].as_str().unwrap().to_string();
    assert_eq!(id.len(), 36);
    assert_eq!(result.identifiers[0], Some(object(json!({"id": id}))));
}

#[tokio::test]
async fn test_insert_id_from_driver_fills_batch() {
    let (source, driver) = source(Dialect::MySql);
    driver.respond(DriverResult::affected(2).with_insert_id(10));
    let result = source
        .insert_builder()
        .into_table("Category")
        .values(vec![object(json!({"name": "a"})), object(json!({"name": "b"}))])
        .execute()
        .await
        .unwrap();
    assert_eq!(result.identifiers, vec![Some(object(json!({"id": 10}))), Some(object(json!({"id": 11})))]);
}

// ==================== UPDATE ====================

#[test]
fn test_update_adds_version_and_update_date() {
    let (source, _) = source(Dialect::Postgres);
    let mut update = source.update_builder("User");
    update.set(object(json!({"lastName": "Saw"}))).where_in_ids([json!(1)]);
    assert_eq!(
        update.get_query().unwrap(),
        r#"UPDATE "users" SET "lastName" = :orm_update_0, "version" = "version" + 1, "updatedAt" = CURRENT_TIMESTAMP WHERE "id" IN (1) RETURNING "version", "updatedAt""#
    );
}

#[test]
fn test_update_explicit_version_is_kept() {
    let (source, _) = source(Dialect::Sqlite);
    let mut update = source.update_builder("User");
    update
        .set(object(json!({"version": 7})))
        .update_entity(false)
        .where_("id = :id")
        .set_parameter("id", 1);
    assert_eq!(
        update.get_sql().unwrap(),
        r#"UPDATE "users" SET "version" = ?, "updatedAt" = datetime('now') WHERE id = ?"#
    );
}

#[test]
fn test_update_relation_column() {
    let (source, _) = source(Dialect::Postgres);
    let mut update = source.update_builder("Post");
    update.set(object(json!({"author": {"id": 4}}))).where_in_ids([json!(1)]);
    let (sql, params) = update.get_query_and_parameters().unwrap();
    assert_eq!(sql, r#"UPDATE "posts" SET "authorId" = $1 WHERE "id" IN (1)"#);
    assert_eq!(params, vec![Value::Int(4)]);
}

#[test]
fn test_update_rejects_collection_relation() {
    let (source, _) = source(Dialect::Postgres);
    let mut update = source.update_builder("User");
    update.set(object(json!({"posts": [1]})));
    assert!(matches!(update.get_query(), Err(OrmError::Usage(_))));
}

#[test]
fn test_update_unknown_property() {
    let (source, _) = source(Dialect::Postgres);
    let mut update = source.update_builder("Category");
    update.set(object(json!({"nope": 1})));
    assert!(matches!(update.get_query(), Err(OrmError::ColumnNotFound { .. })));
}

#[test]
fn test_update_without_values() {
    let (source, _) = source(Dialect::Postgres);
    let update = source.update_builder("Category");
    assert!(matches!(update.get_query(), Err(OrmError::UpdateValuesMissing)));
}

#[test]
fn test_update_set_raw_expression() {
    let (source, _) = source(Dialect::Postgres);
    let mut update = source.update_builder("Category");
    update.set(object(json!({"name": "x"}))).set_raw("name", "UPPER(\"name\")");
    assert_eq!(update.get_query().unwrap(), r#"UPDATE "categories" SET "name" = UPPER("name")"#);
}

#[test]
fn test_update_order_and_limit_mysql_only() {
    let (mysql, _) = source(Dialect::MySql);
    let mut update = mysql.update_builder("Category");
    update
        .set(object(json!({"name": "x"})))
        .order_by("Category.id", Order::Asc)
        .limit(3);
    assert_eq!(
        update.get_sql().unwrap(),
        "UPDATE `categories` SET `name` = ? ORDER BY `id` ASC LIMIT 3"
    );

    let (source, _) = source(Dialect::Postgres);
    let mut update = source.update_builder("Category");
    update.set(object(json!({"name": "x"}))).limit(3);
    assert!(matches!(update.get_query(), Err(OrmError::DialectUnsupported { .. })));
}

#[test]
fn test_mariadb_update_has_no_returning() {
    let (source, _) = source(Dialect::MariaDb);
    let mut update = source.update_builder("User");
    update.set(object(json!({"lastName": "x"})));
    assert!(!update.get_query().unwrap().contains("RETURNING"));

    update.returning(["id"]);
    assert!(matches!(update.get_query(), Err(OrmError::ReturningNotSupported { .. })));
}

#[test]
fn test_update_where_entity() {
    let (source, _) = source(Dialect::Postgres);
    let mut update = source.update_builder("Membership");
    update
        .set(object(json!({"role": "admin"})))
        .where_entity(vec![object(json!({"userId": 1, "groupId": 2, "role": "member"}))]);
    assert_eq!(
        update.get_query().unwrap(),
        r#"UPDATE "memberships" SET "role" = :orm_update_0 WHERE "userId" = :orm_param_0 AND "groupId" = :orm_param_1"#
    );
}

#[tokio::test]
async fn test_update_listener_can_change_values() {
    let driver = crate::testing::RecordingDriver::new(Dialect::Postgres);
    let source = DataSource::builder(driver.clone())
        .registry(crate::testing::registry())
        .listen("Category", crate::runner::ListenerKind::BeforeUpdate, |entity| {
            entity.insert("name".to_string(), json!("from listener"));
            Ok(())
        })
        .build();

    source
        .update_builder("Category")
        .set(object(json!({"name": "original"})))
        .execute()
        .await
        .unwrap();
    assert_eq!(driver.params(0), vec![Value::from("from listener")]);
}

// ==================== DELETE / SOFT DELETE ====================

#[test]
fn test_delete_with_where() {
    let (source, _) = source(Dialect::Postgres);
    let mut delete = source.delete_builder("Category");
    delete.where_("Category.name = :name").set_parameter("name", "x");
    assert_eq!(delete.get_sql().unwrap(), r#"DELETE FROM "categories" WHERE "name" = $1"#);
}

#[test]
fn test_delete_returning_and_output() {
    let (postgres, _) = source(Dialect::Postgres);
    let mut delete = postgres.delete_builder("Category");
    delete.where_in_ids([json!(3)]).returning(["id", "name"]);
    assert_eq!(
        delete.get_query().unwrap(),
        r#"DELETE FROM "categories" WHERE "id" IN (3) RETURNING "id", "name""#
    );

    let (source, _) = source(Dialect::MsSql);
    let mut delete = source.delete_builder("Category");
    delete.where_in_ids([json!(3)]).returning(["id"]);
    assert_eq!(
        delete.get_query().unwrap(),
        "DELETE FROM [categories] OUTPUT DELETED.[id] WHERE [id] IN (3)"
    );
}

#[test]
fn test_delete_ignores_soft_delete_filter() {
    let (source, _) = source(Dialect::Postgres);
    let delete = source.delete_builder("User");
    assert_eq!(delete.get_query().unwrap(), r#"DELETE FROM "users""#);
}

#[test]
fn test_soft_delete_and_restore() {
    let (source, _) = source(Dialect::Postgres);
    let mut qb = source.query_builder("User", "u");
    qb.where_in_ids([json!(1)]);

    let mut soft = qb.soft_delete();
    soft.update_entity(false);
    assert!(!soft.is_restore());
    assert_eq!(
        soft.get_query().unwrap(),
        r#"UPDATE "users" SET "deletedAt" = CURRENT_TIMESTAMP, "version" = "version" + 1, "updatedAt" = CURRENT_TIMESTAMP WHERE "id" IN (1)"#
    );

    let mut restore = qb.restore();
    restore.update_entity(false);
    assert!(restore.is_restore());
    assert_eq!(
        restore.get_query().unwrap(),
        r#"UPDATE "users" SET "deletedAt" = NULL, "version" = "version" + 1, "updatedAt" = CURRENT_TIMESTAMP WHERE "id" IN (1)"#
    );
}

#[test]
fn test_soft_delete_requires_delete_date_column() {
    let (source, _) = source(Dialect::Postgres);
    let soft = source.query_builder("Category", "c").soft_delete();
    assert!(matches!(soft.get_query(), Err(OrmError::MissingDeleteDateColumn(_))));
}

#[tokio::test]
async fn test_delete_in_transaction() {
    let (source, driver) = source(Dialect::Postgres);
    driver.respond(DriverResult::default());
    driver.respond(DriverResult::affected(1));
    let result = source
        .delete_builder("Category")
        .where_in_ids([json!(1)])
        .use_transaction(true)
        .execute()
        .await
        .unwrap();
    assert_eq!(result.affected, Some(1));
    assert_eq!(
        driver.statements(),
        vec![
            "START TRANSACTION".to_string(),
            r#"DELETE FROM "categories" WHERE "id" IN (1)"#.to_string(),
            "COMMIT".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_caller_runner_is_not_released() {
    let (source, driver) = source(Dialect::Postgres);
    let runner = source.create_query_runner(crate::driver::ReplicationMode::Master);
    source
        .delete_builder("Category")
        .set_query_runner(runner.clone())
        .execute()
        .await
        .unwrap();
    assert!(!runner.is_released());
    assert_eq!(driver.statements(), vec![r#"DELETE FROM "categories""#.to_string()]);
    runner.release().await.unwrap();
}

// ==================== RELATIONS ====================

#[tokio::test]
async fn test_relation_set_many_to_one() {
    let (source, driver) = source(Dialect::Postgres);
    source.relation_builder("Post", "author").of(json!(1)).set(json!(2)).await.unwrap();
    assert_eq!(
        driver.statements(),
        vec![r#"UPDATE "posts" SET "authorId" = $1 WHERE "id" IN (1)"#.to_string()]
    );
    assert_eq!(driver.params(0), vec![Value::Int(2)]);
}

#[tokio::test]
async fn test_relation_add_one_to_many() {
    let (source, driver) = source(Dialect::Postgres);
    source.relation_builder("User", "posts").of(json!(1)).add(vec![json!(5)]).await.unwrap();
    assert_eq!(
        driver.statements(),
        vec![r#"UPDATE "posts" SET "authorId" = $1 WHERE "id" IN (5)"#.to_string()]
    );
    assert_eq!(driver.params(0), vec![Value::Int(1)]);
}

#[tokio::test]
async fn test_relation_remove_one_to_many() {
    let (source, driver) = source(Dialect::Postgres);
    source.relation_builder("User", "posts").of(json!(1)).remove(vec![json!(5)]).await.unwrap();
    assert_eq!(
        driver.statements(),
        vec![r#"UPDATE "posts" SET "authorId" = $1 WHERE "authorId" = $2 AND "id" IN (5)"#.to_string()]
    );
    assert_eq!(driver.params(0), vec![Value::Null, Value::Int(1)]);
}

#[tokio::test]
async fn test_relation_add_and_remove_many_to_many() {
    let (source, driver) = source(Dialect::Postgres);
    source
        .relation_builder("Post", "categories")
        .of(json!(1))
        .add_and_remove(vec![json!(3)], vec![json!(4)])
        .await
        .unwrap();
    assert_eq!(
        driver.statements(),
        vec![
            r#"DELETE FROM "post_categories" WHERE "postId" = $1 AND "categoryId" = $2"#.to_string(),
            r#"INSERT INTO "post_categories"("categoryId", "postId") VALUES ($1, $2)"#.to_string(),
        ]
    );
    assert_eq!(driver.params(0), vec![Value::Int(1), Value::Int(4)]);
    assert_eq!(driver.params(1), vec![Value::Int(3), Value::Int(1)]);
}

#[tokio::test]
async fn test_relation_set_inverse_one_to_one_detaches_first() {
    let (source, driver) = source(Dialect::Postgres);
    source.relation_builder("Profile", "user").of(json!(1)).set(json!(9)).await.unwrap();
    let statements = driver.statements();
    assert_eq!(statements.len(), 2);
    assert!(statements[0].starts_with(r#"UPDATE "users" SET "profileId" = $1"#));
    assert!(statements[0].contains(r#"WHERE "profileId" = $"#));
    assert!(statements[1].contains(r#"WHERE "id" IN (9)"#));
}

#[tokio::test]
async fn test_relation_cardinality_errors() {
    let (source, driver) = source(Dialect::Postgres);
    let err = source
        .relation_builder("Post", "author")
        .of(json!(1))
        .add(vec![json!(2)])
        .await
        .unwrap_err();
    assert!(matches!(err, OrmError::RelationCardinality { operation: "add", .. }));

    let err = source
        .relation_builder("Post", "categories")
        .of(json!(1))
        .set(json!(2))
        .await
        .unwrap_err();
    assert!(matches!(err, OrmError::RelationCardinality { operation: "set", .. }));
    assert!(driver.statements().is_empty());
}

#[tokio::test]
async fn test_relation_requires_of() {
    let (source, _) = source(Dialect::Postgres);
    let err = source.relation_builder("Post", "author").set(json!(2)).await.unwrap_err();
    assert!(matches!(err, OrmError::Usage(_)));
}

#[test]
fn test_relation_loader_many_to_many() {
    let (source, _) = source(Dialect::Postgres);
    let mut relation = source.relation_builder("Post", "categories");
    relation.of(json!(1));
    let loader = relation.loader().unwrap();
    assert_eq!(
        loader.get_query().unwrap(),
        r#"SELECT "relation_target"."id" AS "relation_target_id", "relation_target"."name" AS "relation_target_name" FROM "categories" "relation_target" INNER JOIN "post_categories" "relation_junction" ON "relation_junction"."categoryId" = "relation_target"."id" WHERE "relation_junction"."postId" = :orm_rel_of_0_0"#
    );
}

#[test]
fn test_relation_loader_one_to_many_several_owners() {
    let (source, _) = source(Dialect::Postgres);
    let mut relation = source.relation_builder("User", "photos");
    relation.of(json!([1, 2]));
    let loader = relation.loader().unwrap();
    assert!(loader.get_query().unwrap().ends_with(
        r#"WHERE (("relation_target"."userId" = :orm_rel_of_0_0) OR ("relation_target"."userId" = :orm_rel_of_1_0))"#
    ));
}
