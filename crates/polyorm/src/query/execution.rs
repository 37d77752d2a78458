//! Runner ownership and transaction wrapping shared by every executing builder.

use std::future::Future;

use super::expression_map::ExpressionMap;
use super::generated_map;
use crate::connection::DataSource;
use crate::dialect::escape_query_with_parameters;
use crate::driver::ReplicationMode;
use crate::error::OrmResult;
use crate::metadata::{EntityObject, set_path};
use crate::runner::{ListenerKind, QueryResult, QueryRunner};

/// Run `work` on the given runner, or on a fresh one this call owns.
///
/// With `use_transaction` and no transaction already active, the work runs
/// inside a transaction this call opens and finishes: committed on success,
/// rolled back on error. A failed rollback is attached to the original error
/// and logged; it never replaces it. An owned runner is always released and a
/// release failure is only logged.
pub(crate) async fn run_in_runner<T, F, Fut>(
    source: &DataSource,
    runner: Option<QueryRunner>,
    mode: ReplicationMode,
    use_transaction: bool,
    work: F,
) -> OrmResult<T>
where
    F: FnOnce(QueryRunner) -> Fut,
    Fut: Future<Output = OrmResult<T>>,
{
    let owned = runner.is_none();
    let runner = runner.unwrap_or_else(|| source.create_query_runner(mode));

    let handle = if use_transaction && !runner.is_transaction_active() {
        match runner.start_transaction(None).await {
            Ok(handle) => Some(handle),
            Err(err) => {
                if owned {
                    release_quietly(&runner).await;
                }
                return Err(err);
            }
        }
    } else {
        None
    };

    let outcome = work(runner.clone()).await;

    let outcome = match (outcome, handle) {
        (Ok(value), Some(handle)) => runner.commit_transaction(handle).await.map(|()| value),
        (Err(err), Some(handle)) => match runner.rollback_transaction(handle).await {
            Ok(()) => Err(err),
            Err(rollback) => {
                tracing::warn!(
                    target: "polyorm.runner",
                    runner = runner.id(),
                    error = %err,
                    rollback_error = %rollback,
                    "rollback after failed operation also failed"
                );
                Err(err.with_rollback_failure(rollback))
            }
        },
        (outcome, None) => outcome,
    };

    if owned {
        release_quietly(&runner).await;
    }
    outcome
}

async fn release_quietly(runner: &QueryRunner) {
    if let Err(err) = runner.release().await {
        tracing::warn!(
            target: "polyorm.runner",
            runner = runner.id(),
            error = %err,
            "releasing query runner failed"
        );
    }
}

/// How a mutating builder compiles, and which listeners surround it.
pub(crate) struct WriteStatement {
    /// Before and after listener kinds
    pub listeners: Option<(ListenerKind, ListenerKind)>,
    pub compile: fn(&ExpressionMap) -> OrmResult<String>,
    /// Re-derive bound parameters after before-listeners changed the values
    pub rebind: Option<fn(&mut ExpressionMap) -> OrmResult<()>>,
}

/// Run an UPDATE, DELETE, soft delete or restore through the shared wrapper.
///
/// Listeners receive the values being written, or the entities given to
/// `where_entity` (an empty object when there are none).
pub(crate) async fn execute_write(
    source: &DataSource,
    runner: Option<QueryRunner>,
    mut map: ExpressionMap,
    statement: WriteStatement,
) -> OrmResult<QueryResult> {
    map.check()?;
    let metadata = map.main_alias()?.metadata.clone();
    let listen = match (statement.listeners, metadata) {
        (Some(kinds), Some(metadata)) if map.call_listeners => Some((kinds, metadata)),
        _ => None,
    };

    run_in_runner(
        source,
        runner,
        ReplicationMode::Master,
        map.use_transaction,
        |runner| async move {
            let mut subjects = if !map.values_set.is_empty() {
                map.values_set.clone()
            } else if !map.where_entities.is_empty() {
                map.where_entities.clone()
            } else {
                vec![EntityObject::new()]
            };

            if let Some(((before, _), metadata)) = &listen {
                source
                    .broadcaster()
                    .broadcast_all(*before, runner.id(), metadata, &mut subjects)
                    .await?;
                if let Some(rebind) = statement.rebind.filter(|_| !map.values_set.is_empty()) {
                    map.values_set = subjects.clone();
                    rebind(&mut map)?;
                }
            }

            let sql = (statement.compile)(&map)?;
            let (sql, params) = escape_query_with_parameters(map.dialect, &sql, &map.parameters, &map.native_parameters)?;
            let result = runner.query(&sql, &params).await?;

            if let Some(((_, after), metadata)) = &listen {
                if let Some(first) = subjects.first_mut() {
                    if let Some(row) = result.records.first() {
                        for (path, value) in generated_map(&map, row) {
                            set_path(first, &path, value);
                        }
                    }
                }
                source
                    .broadcaster()
                    .broadcast_all(*after, runner.id(), metadata, &mut subjects)
                    .await?;
            }
            Ok(result)
        },
    )
    .await
}
