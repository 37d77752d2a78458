use super::*;
use crate::dialect::Dialect;
use crate::driver::DriverResult;
use crate::error::OrmError;
use std::sync::Arc;
use std::time::Duration;

fn ctx(sql: &str) -> QueryContext {
    QueryContext::new(Dialect::Postgres, sql, 0)
}

#[test]
fn test_query_type_by_leading_keyword() {
    assert_eq!(QueryType::from_sql("SELECT * FROM users"), QueryType::Select);
    assert_eq!(QueryType::from_sql("  select 1"), QueryType::Select);
    assert_eq!(QueryType::from_sql("(SELECT 1) UNION (SELECT 2)"), QueryType::Select);
    assert_eq!(QueryType::from_sql(r#"INSERT INTO "users"("name") VALUES ($1)"#), QueryType::Insert);
    assert_eq!(QueryType::from_sql("REPLACE INTO `users` (`id`) VALUES (?)"), QueryType::Insert);
    assert_eq!(QueryType::from_sql("MERGE INTO \"users\" USING (SELECT 1) s ON 1=1"), QueryType::Insert);
    assert_eq!(QueryType::from_sql("UPDATE users SET name = $1"), QueryType::Update);
    assert_eq!(QueryType::from_sql("-- purge\nDELETE FROM users"), QueryType::Delete);
    assert_eq!(QueryType::from_sql("/* tag */ DELETE FROM users"), QueryType::Delete);
    assert_eq!(QueryType::from_sql("SELECTED"), QueryType::Other);
    assert_eq!(QueryType::from_sql(""), QueryType::Other);
}

#[test]
fn test_query_type_of_transaction_and_schema_statements() {
    for sql in [
        "START TRANSACTION",
        "BEGIN TRANSACTION",
        "SAVEPOINT polyorm_1",
        "RELEASE SAVEPOINT polyorm_1",
        "ROLLBACK TO SAVEPOINT polyorm_1",
        "SAVE TRANSACTION polyorm_1",
        "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE",
        "COMMIT",
    ] {
        assert_eq!(QueryType::from_sql(sql), QueryType::Transaction, "{sql}");
    }
    assert_eq!(QueryType::from_sql("SET search_path TO app"), QueryType::Other);
    assert_eq!(QueryType::from_sql("CREATE TABLE users (id INT)"), QueryType::Schema);
    assert_eq!(QueryType::from_sql("truncate users"), QueryType::Schema);
    assert_eq!(QueryType::from_sql("PRAGMA foreign_keys = ON"), QueryType::Other);
}

#[test]
fn test_query_type_of_common_table_expressions() {
    assert_eq!(
        QueryType::from_sql("WITH cte AS (SELECT 1) SELECT * FROM cte"),
        QueryType::Select
    );
    assert_eq!(
        QueryType::from_sql("WITH moved AS (DELETE FROM a RETURNING *) INSERT INTO b SELECT * FROM moved"),
        QueryType::Insert
    );
    assert_eq!(
        QueryType::from_sql("WITH \"delete\" AS (SELECT ')') UPDATE t SET x = 1"),
        QueryType::Update
    );
}

#[test]
fn test_clip() {
    assert_eq!(clip("SELECT * FROM users", Some(10)), "SELECT * F...");
    assert_eq!(clip("SELECT 1", Some(10)), "SELECT 1");
    assert_eq!(clip("SELECT 'é'", Some(9)), "SELECT '...");
    assert_eq!(clip("SELECT 1", None), "SELECT 1");
}

#[test]
fn test_outcome_of_driver_result() {
    assert_eq!(QueryOutcome::of(&Ok(DriverResult::affected(3))), QueryOutcome::Affected(3));
    assert_eq!(QueryOutcome::of(&Ok(DriverResult::default())), QueryOutcome::Rows(0));
    assert_eq!(
        QueryOutcome::of(&Err(OrmError::Timeout(Duration::from_secs(2)))),
        QueryOutcome::Error("timeout after 2s".to_string())
    );

    match QueryOutcome::error("x".repeat(600)) {
        QueryOutcome::Error(msg) => {
            assert_eq!(msg.len(), 515);
            assert!(msg.ends_with("..."));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_stats_monitor() {
    let monitor = StatsMonitor::new();
    let select = ctx("SELECT * FROM users");

    monitor.on_query_complete(&select, Duration::from_millis(10), &QueryOutcome::Rows(5));
    monitor.on_query_complete(&select, Duration::from_millis(20), &QueryOutcome::Rows(3));
    monitor.on_query_complete(&ctx("COMMIT"), Duration::from_millis(1), &QueryOutcome::Affected(0));
    monitor.on_query_complete(
        &ctx("DELETE FROM users"),
        Duration::from_millis(2),
        &QueryOutcome::error("boom".into()),
    );
    monitor.on_slow_query(&select, Duration::from_millis(20));

    let stats = monitor.stats();
    assert_eq!(stats.total_queries, 4);
    assert_eq!(stats.select_count, 2);
    assert_eq!(stats.delete_count, 1);
    assert_eq!(stats.transaction_count, 1);
    assert_eq!(monitor.count(QueryType::Insert), 0);
    assert_eq!(stats.failed_queries, 1);
    assert_eq!(stats.slow_queries, 1);
    assert_eq!(stats.total_duration, Duration::from_millis(33));
    assert_eq!(stats.max_duration, Duration::from_millis(20));
    assert_eq!(stats.slowest_query.as_deref(), Some("SELECT * FROM users"));

    monitor.reset();
    assert_eq!(monitor.stats(), QueryStats::default());
}

struct Comment;

impl QueryHook for Comment {
    fn before_query(&self, ctx: &QueryContext) -> HookAction {
        HookAction::Rewrite(format!("/* app */ {}", ctx.sql))
    }
}

#[test]
fn test_composite_hook_chains_rewrites() {
    let hook = CompositeHook::new().add(Comment).add(Comment);
    assert_eq!(
        hook.before_query(&ctx("SELECT 1")),
        HookAction::Rewrite("/* app */ /* app */ SELECT 1".to_string())
    );

    let mut rewritten = ctx("SELECT 1");
    rewritten.rewrite("/* app */ DELETE FROM users".to_string());
    assert!(rewritten.is_rewritten());
    assert_eq!(rewritten.query_type, QueryType::Delete);
    assert_eq!(rewritten.original_sql, "SELECT 1");
}

#[test]
fn test_composite_hook_abort() {
    struct ReadOnly;
    impl QueryHook for ReadOnly {
        fn before_query(&self, ctx: &QueryContext) -> HookAction {
            match ctx.query_type {
                QueryType::Select | QueryType::Transaction => HookAction::Continue,
                other => HookAction::Abort(format!("{other} refused")),
            }
        }
    }

    let hook = CompositeHook::new().add(TracingSqlHook::new()).add(ReadOnly);
    assert_eq!(
        hook.before_query(&ctx("DELETE FROM users")),
        HookAction::Abort("delete refused".to_string())
    );
    assert_eq!(hook.before_query(&ctx("SELECT 1")), HookAction::Continue);
}

#[test]
fn test_composite_monitor_fans_out() {
    let first = Arc::new(StatsMonitor::new());
    let second = Arc::new(StatsMonitor::new());
    let composite = CompositeMonitor::new()
        .add_arc(first.clone())
        .add_arc(second.clone())
        .add(NoopMonitor)
        .add(LoggingMonitor::new().only_slower_than(Duration::from_secs(1)));

    composite.on_query_complete(&ctx("SELECT 1"), Duration::from_millis(1), &QueryOutcome::Rows(1));

    assert_eq!(first.stats().total_queries, 1);
    assert_eq!(second.stats().total_queries, 1);
}

#[test]
fn test_slow_threshold() {
    let config = MonitorConfig {
        max_query_execution_time: Some(Duration::from_millis(50)),
        ..MonitorConfig::default()
    };
    assert!(config.is_slow(Duration::from_millis(51)));
    assert!(!config.is_slow(Duration::from_millis(50)));
    assert!(!MonitorConfig::default().is_slow(Duration::from_secs(60)));
}
