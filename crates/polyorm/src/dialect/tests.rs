use std::collections::HashMap;

use serde_json::json;

use super::*;
use crate::metadata::{ColumnMetadata, ColumnType};
use crate::value::Value;

#[test]
fn test_escape_per_dialect() {
    assert_eq!(Dialect::Postgres.escape("user"), "\"user\"");
    assert_eq!(Dialect::MySql.escape("user"), "`user`");
    assert_eq!(Dialect::MsSql.escape("user"), "[user]");
    assert_eq!(Dialect::Postgres.escape("we\"ird"), "\"we\"\"ird\"");
    assert_eq!(Dialect::MsSql.escape("a]b"), "[a]]b]");
    assert_eq!(Dialect::Postgres.escape_path("public.users"), "\"public\".\"users\"");
}

#[test]
fn test_placeholders() {
    assert_eq!(Dialect::Postgres.create_parameter(0), "$1");
    assert_eq!(Dialect::DuckDb.create_parameter(2), "$3");
    assert_eq!(Dialect::MySql.create_parameter(5), "?");
    assert_eq!(Dialect::MsSql.create_parameter(0), "@0");
    assert_eq!(Dialect::Oracle.create_parameter(0), ":1");
    assert_eq!(Dialect::Spanner.create_parameter(1), "@param1");
}

#[test]
fn test_returning_support() {
    assert!(Dialect::Postgres.is_returning_supported(StatementKind::Update));
    assert!(Dialect::MariaDb.is_returning_supported(StatementKind::Insert));
    assert!(!Dialect::MariaDb.is_returning_supported(StatementKind::Update));
    assert!(!Dialect::MySql.is_returning_supported(StatementKind::Insert));
    assert_eq!(Dialect::MsSql.returning_style(), ReturningStyle::Output);
}

#[test]
fn test_pagination_limit_offset() {
    assert_eq!(
        Dialect::Postgres.pagination_clause(Some(10), Some(20), false).unwrap(),
        " LIMIT 10 OFFSET 20"
    );
    assert_eq!(Dialect::Postgres.pagination_clause(None, Some(5), false).unwrap(), " OFFSET 5");
    assert_eq!(
        Dialect::Sqlite.pagination_clause(None, Some(5), false).unwrap(),
        " LIMIT -1 OFFSET 5"
    );
    assert!(matches!(
        Dialect::MySql.pagination_clause(None, Some(5), false),
        Err(OrmError::DialectUnsupported { .. })
    ));
    assert_eq!(Dialect::MySql.pagination_clause(None, None, false).unwrap(), "");
}

#[test]
fn test_pagination_offset_fetch() {
    assert_eq!(
        Dialect::MsSql.pagination_clause(Some(10), None, false).unwrap(),
        " ORDER BY (SELECT NULL) OFFSET 0 ROWS FETCH NEXT 10 ROWS ONLY"
    );
    assert_eq!(
        Dialect::MsSql.pagination_clause(Some(10), Some(5), true).unwrap(),
        " OFFSET 5 ROWS FETCH NEXT 10 ROWS ONLY"
    );
    assert_eq!(
        Dialect::Oracle.pagination_clause(Some(3), None, false).unwrap(),
        " FETCH NEXT 3 ROWS ONLY"
    );
}

#[test]
fn test_lock_clause_postgres() {
    let tables = vec!["\"user\"".to_string()];
    assert_eq!(
        Dialect::Postgres
            .lock_clause(LockMode::PessimisticWrite, &tables, Some(OnLocked::SkipLocked))
            .unwrap(),
        LockClause::Suffix(" FOR UPDATE OF \"user\" SKIP LOCKED".into())
    );
    assert_eq!(
        Dialect::Postgres.lock_clause(LockMode::ForKeyShare, &[], None).unwrap(),
        LockClause::Suffix(" FOR KEY SHARE".into())
    );
    assert_eq!(
        Dialect::Postgres.lock_clause(LockMode::Optimistic, &[], None).unwrap(),
        LockClause::None
    );
}

#[test]
fn test_lock_clause_other_dialects() {
    assert_eq!(
        Dialect::MariaDb.lock_clause(LockMode::PessimisticRead, &[], None).unwrap(),
        LockClause::Suffix(" LOCK IN SHARE MODE".into())
    );
    assert_eq!(
        Dialect::MsSql.lock_clause(LockMode::PessimisticWrite, &[], None).unwrap(),
        LockClause::TableHint("WITH (UPDLOCK, ROWLOCK)".into())
    );
    assert_eq!(
        Dialect::MsSql.lock_clause(LockMode::DirtyRead, &[], None).unwrap(),
        LockClause::TableHint("WITH (NOLOCK)".into())
    );
    assert_eq!(
        Dialect::Oracle.lock_clause(LockMode::PessimisticWriteOrFail, &[], None).unwrap(),
        LockClause::Suffix(" FOR UPDATE NOWAIT".into())
    );
    assert!(matches!(
        Dialect::Sqlite.lock_clause(LockMode::PessimisticWrite, &[], None),
        Err(OrmError::LockNotSupported { .. })
    ));
    assert!(matches!(
        Dialect::Oracle.lock_clause(LockMode::PessimisticRead, &[], None),
        Err(OrmError::LockNotSupported { .. })
    ));
    assert!(matches!(
        Dialect::MySql.lock_clause(LockMode::ForNoKeyUpdate, &[], None),
        Err(OrmError::LockNotSupported { .. })
    ));
}

#[test]
fn test_savepoint_sql() {
    assert_eq!(Dialect::Postgres.create_savepoint_sql("sp_1"), "SAVEPOINT sp_1");
    assert_eq!(
        Dialect::Postgres.release_savepoint_sql("sp_1").as_deref(),
        Some("RELEASE SAVEPOINT sp_1")
    );
    assert_eq!(Dialect::MsSql.create_savepoint_sql("sp_1"), "SAVE TRANSACTION sp_1");
    assert_eq!(Dialect::MsSql.rollback_to_savepoint_sql("sp_1"), "ROLLBACK TRANSACTION sp_1");
    assert_eq!(Dialect::Oracle.release_savepoint_sql("sp_1"), None);
    assert!(!Dialect::Spanner.supports_savepoints());
}

#[test]
fn test_start_transaction_with_isolation() {
    assert_eq!(
        Dialect::Postgres.start_transaction_sql(Some(TransactionIsolation::Serializable)),
        vec![
            "START TRANSACTION".to_string(),
            "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE".to_string()
        ]
    );
    assert_eq!(
        Dialect::MySql.start_transaction_sql(Some(TransactionIsolation::ReadCommitted)),
        vec![
            "SET TRANSACTION ISOLATION LEVEL READ COMMITTED".to_string(),
            "START TRANSACTION".to_string()
        ]
    );
    assert_eq!(Dialect::Sqlite.start_transaction_sql(None), vec!["BEGIN TRANSACTION".to_string()]);
}

#[test]
fn test_shorten_alias() {
    let long = "a".repeat(40) + "_" + &"b".repeat(40);
    let short = Dialect::Postgres.shorten_alias(&long);
    assert_eq!(short.len(), 63);
    assert_eq!(short, Dialect::Postgres.shorten_alias(&long));
    assert_ne!(short, Dialect::Postgres.shorten_alias(&(long.clone() + "c")));
    assert_eq!(Dialect::Sqlite.shorten_alias(&long), long);
    assert_eq!(Dialect::Postgres.shorten_alias("user_id"), "user_id");
}

#[test]
fn test_escape_query_with_parameters_postgres() {
    let mut named = HashMap::new();
    named.insert("name".to_string(), Value::Text("Timber".into()));
    named.insert("ids".to_string(), Value::Array(vec![Value::Int(1), Value::Int(2)]));

    let (sql, values) = escape_query_with_parameters(
        Dialect::Postgres,
        "SELECT * FROM u WHERE name = :name OR alias = :name OR id IN (:...ids)",
        &named,
        &[],
    )
    .unwrap();

    assert_eq!(sql, "SELECT * FROM u WHERE name = $1 OR alias = $1 OR id IN ($2, $3)");
    assert_eq!(
        values,
        vec![Value::Text("Timber".into()), Value::Int(1), Value::Int(2)]
    );
}

#[test]
fn test_escape_query_repeats_positional_values() {
    let mut named = HashMap::new();
    named.insert("name".to_string(), Value::Text("x".into()));

    let (sql, values) =
        escape_query_with_parameters(Dialect::MySql, "a = :name OR b = :name", &named, &[]).unwrap();
    assert_eq!(sql, "a = ? OR b = ?");
    assert_eq!(values.len(), 2);
}

#[test]
fn test_escape_query_skips_literals_casts_and_identifiers() {
    let mut named = HashMap::new();
    named.insert("id".to_string(), Value::Int(1));

    let (sql, values) = escape_query_with_parameters(
        Dialect::Postgres,
        "SELECT ':id', \"a:id\", x::text FROM t WHERE id = :id AND t = '12:30'",
        &named,
        &[],
    )
    .unwrap();
    assert_eq!(
        sql,
        "SELECT ':id', \"a:id\", x::text FROM t WHERE id = $1 AND t = '12:30'"
    );
    assert_eq!(values, vec![Value::Int(1)]);
}

#[test]
fn test_escape_query_native_parameters_first() {
    let mut named = HashMap::new();
    named.insert("b".to_string(), Value::Int(2));
    let (sql, values) =
        escape_query_with_parameters(Dialect::Postgres, "x = $1 AND y = :b", &named, &[Value::Int(1)]).unwrap();
    assert_eq!(sql, "x = $1 AND y = $2");
    assert_eq!(values, vec![Value::Int(1), Value::Int(2)]);
}

#[test]
fn test_escape_query_missing_parameter() {
    let err = escape_query_with_parameters(Dialect::Postgres, "id = :missing", &HashMap::new(), &[]).unwrap_err();
    assert!(matches!(err, OrmError::ParameterNotFound { name } if name == "missing"));
}

#[test]
fn test_prepare_persistent_value() {
    let flag = ColumnMetadata::new("active", ColumnType::Boolean);
    assert_eq!(Dialect::Postgres.prepare_persistent_value(&flag, &json!(true)), Value::Bool(true));
    assert_eq!(Dialect::Sqlite.prepare_persistent_value(&flag, &json!(true)), Value::Int(1));

    let tags = ColumnMetadata::new("tags", ColumnType::SimpleArray);
    assert_eq!(
        Dialect::Postgres.prepare_persistent_value(&tags, &json!(["a", "b"])),
        Value::Text("a,b".into())
    );

    let at = ColumnMetadata::new("at", ColumnType::Timestamp);
    assert_eq!(
        Dialect::Sqlite.prepare_persistent_value(&at, &json!("2024-01-02T03:04:05Z")),
        Value::Text("2024-01-02 03:04:05.000".into())
    );
    assert!(matches!(
        Dialect::Postgres.prepare_persistent_value(&at, &json!("2024-01-02T03:04:05Z")),
        Value::Timestamp(_)
    ));
}

#[test]
fn test_prepare_hydrated_value() {
    let flag = ColumnMetadata::new("active", ColumnType::Boolean);
    assert_eq!(Dialect::Sqlite.prepare_hydrated_value(&flag, &Value::Int(0)), json!(false));

    let tags = ColumnMetadata::new("tags", ColumnType::SimpleArray);
    assert_eq!(
        Dialect::Sqlite.prepare_hydrated_value(&tags, &Value::Text("a,b".into())),
        json!(["a", "b"])
    );

    let doc = ColumnMetadata::new("doc", ColumnType::Json);
    assert_eq!(
        Dialect::Sqlite.prepare_hydrated_value(&doc, &Value::Text("{\"k\":1}".into())),
        json!({"k": 1})
    );
}

#[test]
fn test_full_type() {
    let id = ColumnMetadata::new("id", ColumnType::Uuid);
    assert_eq!(Dialect::Postgres.create_full_type(&id), "uuid");
    assert_eq!(Dialect::MySql.create_full_type(&id), "varchar(36)");
    let name = ColumnMetadata::new("name", ColumnType::Text);
    assert_eq!(Dialect::MsSql.create_full_type(&name), "nvarchar(255)");
}

#[test]
fn test_dialect_from_str() {
    assert_eq!("postgresql".parse::<Dialect>().unwrap(), Dialect::Postgres);
    assert_eq!("mssql".parse::<Dialect>().unwrap(), Dialect::MsSql);
    assert!("db2".parse::<Dialect>().is_err());
}

#[test]
fn test_uuid_type_per_dialect() {
    for (dialect, expected) in [
        (Dialect::Postgres, "uuid"),
        (Dialect::CockroachDb, "uuid"),
        (Dialect::DuckDb, "uuid"),
        (Dialect::MySql, "varchar"),
        (Dialect::MariaDb, "varchar"),
        (Dialect::Sqlite, "text"),
        (Dialect::LibSql, "text"),
        (Dialect::MsSql, "uniqueidentifier"),
        (Dialect::Oracle, "varchar2"),
        (Dialect::SapHana, "nvarchar"),
        (Dialect::Spanner, "string"),
    ] {
        assert_eq!(dialect.normalize_type(ColumnType::Uuid), expected, "{dialect:?}");
    }
}
