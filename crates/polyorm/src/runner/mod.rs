//! Query runner and transaction state machine.
//!
//! A [`QueryRunner`] owns at most one driver connection. Statements on one
//! runner run in program order; different runners are independent.
//!
//! ```text
//! Idle --connect--> Connected --start--> TransactionActive(1) --start--> TransactionActive(2) ...
//!   \                   \                        |  commit / rollback (depth - 1)
//!    `------------------ `--------release------> Released (terminal)
//! ```

mod broadcaster;
mod retry;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, watch};

use crate::dialect::{Dialect, TransactionIsolation};
use crate::driver::{Driver, DriverConnection, DriverResult, ReplicationMode, RowStream};
use crate::error::{OrmError, OrmResult};
use crate::monitor::{HookAction, MonitorConfig, QueryContext, QueryHook, QueryMonitor, QueryOutcome};
use crate::row::Row;
use crate::value::Value;

pub use broadcaster::{
    Broadcaster, EntityEvent, EntityListener, EntitySubscriber, ListenerKind, QueryEvent, TransactionEvent,
};
pub use retry::RetryPolicy;

static NEXT_RUNNER_ID: AtomicU64 = AtomicU64::new(1);

/// Settings shared by every runner of one data source.
#[derive(Clone)]
pub struct RunnerContext {
    pub dialect: Dialect,
    pub driver: Arc<dyn Driver>,
    pub broadcaster: Arc<Broadcaster>,
    pub monitor: Option<Arc<dyn QueryMonitor>>,
    pub hook: Option<Arc<dyn QueryHook>>,
    pub config: MonitorConfig,
    pub retry: RetryPolicy,
}

impl RunnerContext {
    pub fn new(driver: Arc<dyn Driver>, broadcaster: Arc<Broadcaster>) -> Self {
        Self {
            dialect: driver.dialect(),
            driver,
            broadcaster,
            monitor: None,
            hook: None,
            config: MonitorConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl std::fmt::Debug for RunnerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerContext")
            .field("dialect", &self.dialect)
            .field("monitor", &self.monitor.is_some())
            .field("hook", &self.hook.is_some())
            .field("config", &self.config)
            .field("retry", &self.retry)
            .finish()
    }
}

/// Uniform result of one statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub records: Vec<Row>,
    /// `None` when the driver cannot report it
    pub affected: Option<u64>,
    pub insert_id: Option<Value>,
    /// Driver-native shape
    pub raw: serde_json::Value,
}

impl From<DriverResult> for QueryResult {
    fn from(result: DriverResult) -> Self {
        Self {
            records: result.rows,
            affected: result.affected,
            insert_id: result.insert_id,
            raw: result.raw,
        }
    }
}

/// Observable runner state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerPhase {
    Idle,
    Connected,
    TransactionActive(usize),
    Released,
}

/// Proof of one open transaction level.
///
/// Consumed by [`QueryRunner::commit_transaction`] or
/// [`QueryRunner::rollback_transaction`], so a level is finished at most once.
#[must_use = "a transaction handle must be committed or rolled back"]
#[derive(Debug)]
pub struct TransactionHandle {
    runner_id: u64,
    depth: usize,
    finished: bool,
}

impl TransactionHandle {
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn runner_id(&self) -> u64 {
        self.runner_id
    }
}

impl Drop for TransactionHandle {
    fn drop(&mut self) {
        if !self.finished && !std::thread::panicking() {
            tracing::warn!(
                target: "polyorm.runner",
                runner = self.runner_id,
                depth = self.depth,
                "transaction handle dropped without commit or rollback"
            );
        }
    }
}

struct RunnerState {
    connection: Option<Box<dyn DriverConnection>>,
    depth: usize,
}

struct RunnerInner {
    id: u64,
    mode: ReplicationMode,
    context: Arc<RunnerContext>,
    state: Mutex<RunnerState>,
    depth: AtomicUsize,
    connected: AtomicBool,
    released: AtomicBool,
    abort: watch::Sender<bool>,
}

/// Executes SQL on one driver connection.
///
/// Cheap to clone; clones share the connection and transaction state.
#[derive(Clone)]
pub struct QueryRunner {
    inner: Arc<RunnerInner>,
}

fn savepoint_name(depth: usize) -> String {
    format!("polyorm_{depth}")
}

impl QueryRunner {
    pub fn new(context: Arc<RunnerContext>, mode: ReplicationMode) -> Self {
        let (abort, _) = watch::channel(false);
        Self {
            inner: Arc::new(RunnerInner {
                id: NEXT_RUNNER_ID.fetch_add(1, Ordering::Relaxed),
                mode,
                context,
                state: Mutex::new(RunnerState {
                    connection: None,
                    depth: 0,
                }),
                depth: AtomicUsize::new(0),
                connected: AtomicBool::new(false),
                released: AtomicBool::new(false),
                abort,
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn mode(&self) -> ReplicationMode {
        self.inner.mode
    }

    pub fn dialect(&self) -> Dialect {
        self.inner.context.dialect
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.inner.context.broadcaster
    }

    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::SeqCst)
    }

    pub fn is_transaction_active(&self) -> bool {
        self.transaction_depth() > 0
    }

    pub fn transaction_depth(&self) -> usize {
        self.inner.depth.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> RunnerPhase {
        if self.is_released() {
            RunnerPhase::Released
        } else if self.is_transaction_active() {
            RunnerPhase::TransactionActive(self.transaction_depth())
        } else if self.inner.connected.load(Ordering::SeqCst) {
            RunnerPhase::Connected
        } else {
            RunnerPhase::Idle
        }
    }

    /// Lease a connection from the driver. Idempotent.
    pub async fn connect(&self) -> OrmResult<()> {
        let mut state = self.inner.state.lock().await;
        self.ensure_connected(&mut state).await
    }

    async fn ensure_connected(&self, state: &mut RunnerState) -> OrmResult<()> {
        if self.is_released() {
            return Err(OrmError::QueryRunnerAlreadyReleased);
        }
        if state.connection.is_none() {
            let connection = self.inner.context.driver.connect(self.inner.mode).await?;
            state.connection = Some(connection);
            self.inner.connected.store(true, Ordering::SeqCst);
            tracing::debug!(
                target: "polyorm.runner",
                runner = self.inner.id,
                mode = ?self.inner.mode,
                "connection acquired"
            );
        }
        Ok(())
    }

    /// Run one statement.
    ///
    /// Outside a transaction, transient failures are retried per the
    /// configured [`RetryPolicy`].
    pub async fn query(&self, sql: &str, params: &[Value]) -> OrmResult<QueryResult> {
        let mut state = self.inner.state.lock().await;
        self.ensure_connected(&mut state).await?;
        let allow_retry = state.depth == 0;
        self.run(&mut state, sql, params, allow_retry).await
    }

    /// Stream rows incrementally, if the driver supports it.
    pub async fn stream(&self, sql: &str, params: &[Value]) -> OrmResult<RowStream> {
        let mut state = self.inner.state.lock().await;
        self.ensure_connected(&mut state).await?;

        let context = &self.inner.context;
        let mut ctx = QueryContext::new(context.dialect, sql, params.len()).on_runner(self.inner.id, state.depth);
        self.apply_hook(&mut ctx)?;

        let event = QueryEvent {
            runner_id: self.inner.id,
            sql: ctx.sql.clone(),
            parameters: params.to_vec(),
            duration: None,
            error: None,
        };
        context.broadcaster.before_query(&event).await?;

        let connection = state
            .connection
            .as_mut()
            .ok_or(OrmError::QueryRunnerAlreadyReleased)?;
        match connection.stream(&ctx.sql, params).await {
            Ok(stream) => Ok(stream),
            Err(OrmError::DialectUnsupported { feature, .. }) => {
                Err(OrmError::unsupported(context.dialect.name(), feature))
            }
            Err(e) => Err(e.with_statement(&ctx.sql, params)),
        }
    }

    // ==================== Transactions ====================

    /// Open a transaction, or a savepoint when one is already active.
    pub async fn start_transaction(&self, isolation: Option<TransactionIsolation>) -> OrmResult<TransactionHandle> {
        let mut state = self.inner.state.lock().await;
        self.ensure_connected(&mut state).await?;

        let dialect = self.inner.context.dialect;
        let depth = state.depth;
        if depth > 0 && !dialect.supports_savepoints() {
            return Err(OrmError::TransactionAlreadyStarted);
        }

        let event = TransactionEvent {
            runner_id: self.inner.id,
            depth: depth + 1,
        };
        let broadcaster = self.inner.context.broadcaster.clone();
        broadcaster.before_transaction_start(&event).await?;

        if depth == 0 {
            let statements = dialect.start_transaction_sql(isolation);
            for (index, sql) in statements.iter().enumerate() {
                if let Err(err) = self.run(&mut state, sql, &[], false).await {
                    if index == 0 {
                        return Err(err);
                    }
                    // The first statement opened the transaction; close it again.
                    let cleanup = self.run(&mut state, dialect.rollback_sql(), &[], false).await;
                    return Err(match cleanup {
                        Ok(_) => err,
                        Err(rollback) => err.with_rollback_failure(rollback),
                    });
                }
            }
        } else {
            let sql = dialect.create_savepoint_sql(&savepoint_name(depth));
            self.run(&mut state, &sql, &[], false).await?;
        }

        self.set_depth(&mut state, depth + 1);
        self.log_after_hook("start", broadcaster.after_transaction_start(&event).await);

        Ok(TransactionHandle {
            runner_id: self.inner.id,
            depth: depth + 1,
            finished: false,
        })
    }

    /// Commit the level `handle` stands for.
    ///
    /// If the commit fails the runner rolls that level back itself and
    /// returns the commit error, so the level is always closed afterwards.
    pub async fn commit_transaction(&self, mut handle: TransactionHandle) -> OrmResult<()> {
        handle.finished = true;
        let mut state = self.inner.state.lock().await;
        self.check_handle(&state, &handle)?;

        let dialect = self.inner.context.dialect;
        let depth = state.depth;
        let event = TransactionEvent {
            runner_id: self.inner.id,
            depth,
        };
        let broadcaster = self.inner.context.broadcaster.clone();
        if let Err(err) = broadcaster.before_transaction_commit(&event).await {
            return Err(self.close_level_after_failure(&mut state, err).await);
        }

        let sql = if depth > 1 {
            dialect.release_savepoint_sql(&savepoint_name(depth - 1))
        } else {
            Some(dialect.commit_sql().to_string())
        };
        if let Some(sql) = sql {
            if let Err(err) = self.run(&mut state, &sql, &[], false).await {
                return Err(self.close_level_after_failure(&mut state, err).await);
            }
        }

        self.set_depth(&mut state, depth - 1);
        self.log_after_hook("commit", broadcaster.after_transaction_commit(&event).await);
        Ok(())
    }

    /// Roll back the level `handle` stands for.
    ///
    /// A failing before-rollback subscriber leaves the level open; releasing
    /// the runner still rolls it back.
    pub async fn rollback_transaction(&self, mut handle: TransactionHandle) -> OrmResult<()> {
        handle.finished = true;
        let mut state = self.inner.state.lock().await;
        self.check_handle(&state, &handle)?;
        self.rollback_level(&mut state).await
    }

    fn check_handle(&self, state: &RunnerState, handle: &TransactionHandle) -> OrmResult<()> {
        if handle.runner_id != self.inner.id {
            return Err(OrmError::usage(format!(
                "transaction handle of runner {} used on runner {}",
                handle.runner_id, self.inner.id
            )));
        }
        if self.is_released() {
            return Err(OrmError::QueryRunnerAlreadyReleased);
        }
        if state.depth == 0 {
            return Err(OrmError::TransactionNotStarted);
        }
        if handle.depth != state.depth {
            return Err(OrmError::usage(format!(
                "transaction handle for level {} used while level {} is active",
                handle.depth, state.depth
            )));
        }
        Ok(())
    }

    async fn rollback_level(&self, state: &mut RunnerState) -> OrmResult<()> {
        let dialect = self.inner.context.dialect;
        let depth = state.depth;
        let event = TransactionEvent {
            runner_id: self.inner.id,
            depth,
        };
        let broadcaster = self.inner.context.broadcaster.clone();
        broadcaster.before_transaction_rollback(&event).await?;

        let sql = if depth > 1 {
            dialect.rollback_to_savepoint_sql(&savepoint_name(depth - 1))
        } else {
            dialect.rollback_sql().to_string()
        };
        self.run(state, &sql, &[], false).await?;

        self.set_depth(state, depth - 1);
        self.log_after_hook("rollback", broadcaster.after_transaction_rollback(&event).await);
        Ok(())
    }

    async fn close_level_after_failure(&self, state: &mut RunnerState, err: OrmError) -> OrmError {
        match self.rollback_level(state).await {
            Ok(()) => err,
            Err(rollback) => {
                tracing::warn!(
                    target: "polyorm.runner",
                    runner = self.inner.id,
                    error = %rollback,
                    "rollback after failed commit also failed"
                );
                err.with_rollback_failure(rollback)
            }
        }
    }

    fn set_depth(&self, state: &mut RunnerState, depth: usize) {
        state.depth = depth;
        self.inner.depth.store(depth, Ordering::SeqCst);
    }

    /// Subscriber failures after the state changed cannot undo the transition.
    fn log_after_hook(&self, transition: &'static str, result: OrmResult<()>) {
        if let Err(err) = result {
            tracing::warn!(
                target: "polyorm.runner",
                runner = self.inner.id,
                transition,
                error = %err,
                "transaction subscriber failed"
            );
        }
    }

    // ==================== Release ====================

    /// Roll back any open transaction and give the connection back.
    ///
    /// Idempotent: the connection is closed exactly once. An in-flight retry
    /// backoff is aborted.
    pub async fn release(&self) -> OrmResult<()> {
        if self.inner.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.abort.send_replace(true);

        let mut state = self.inner.state.lock().await;
        let mut outcome = Ok(());

        if state.depth > 0 && state.connection.is_some() {
            let event = TransactionEvent {
                runner_id: self.inner.id,
                depth: state.depth,
            };
            let broadcaster = self.inner.context.broadcaster.clone();
            self.log_after_hook("rollback", broadcaster.before_transaction_rollback(&event).await);
            let rollback_sql = self.inner.context.dialect.rollback_sql();
            match self.run(&mut state, rollback_sql, &[], false).await {
                Ok(_) => {
                    self.log_after_hook("rollback", broadcaster.after_transaction_rollback(&event).await);
                }
                Err(err) => {
                    tracing::warn!(
                        target: "polyorm.runner",
                        runner = self.inner.id,
                        error = %err,
                        "rollback on release failed"
                    );
                    outcome = Err(err);
                }
            }
        }
        self.set_depth(&mut state, 0);

        if let Some(mut connection) = state.connection.take() {
            if let Err(err) = connection.close().await {
                if outcome.is_ok() {
                    outcome = Err(err);
                }
            }
        }
        self.inner.connected.store(false, Ordering::SeqCst);
        tracing::debug!(target: "polyorm.runner", runner = self.inner.id, "released");
        outcome
    }

    // ==================== Execution ====================

    async fn run(&self, state: &mut RunnerState, sql: &str, params: &[Value], allow_retry: bool) -> OrmResult<QueryResult> {
        let context = &self.inner.context;
        let mut ctx = QueryContext::new(context.dialect, sql, params.len()).on_runner(self.inner.id, state.depth);
        self.apply_hook(&mut ctx)?;

        let mut event = QueryEvent {
            runner_id: self.inner.id,
            sql: ctx.sql.clone(),
            parameters: params.to_vec(),
            duration: None,
            error: None,
        };
        context.broadcaster.before_query(&event).await?;

        if context.config.monitoring_enabled {
            if let Some(monitor) = &context.monitor {
                monitor.on_query_start(&ctx);
            }
        }

        let connection = state
            .connection
            .as_mut()
            .ok_or(OrmError::QueryRunnerAlreadyReleased)?;

        let start = Instant::now();
        let result = self
            .execute_with_retry(connection.as_mut(), &ctx.sql, params, allow_retry)
            .await
            .map_err(|e| e.with_statement(&ctx.sql, params));
        let elapsed = start.elapsed();

        self.report_result(&ctx, elapsed, &result);

        event.duration = Some(elapsed);
        event.error = result.as_ref().err().map(ToString::to_string);
        let after = context.broadcaster.after_query(&event).await;

        let result = result?;
        after?;
        Ok(QueryResult::from(result))
    }

    fn apply_hook(&self, ctx: &mut QueryContext) -> OrmResult<()> {
        let Some(hook) = &self.inner.context.hook else {
            return Ok(());
        };

        match hook.before_query(ctx) {
            HookAction::Continue => Ok(()),
            HookAction::Rewrite(sql) => {
                ctx.rewrite(sql);
                Ok(())
            }
            HookAction::Abort(reason) => Err(OrmError::Aborted(format!("query aborted by hook: {reason}"))),
        }
    }

    fn report_result(&self, ctx: &QueryContext, elapsed: Duration, result: &OrmResult<DriverResult>) {
        let context = &self.inner.context;
        let outcome = QueryOutcome::of(result);

        if let Some(hook) = &context.hook {
            hook.after_query(ctx, elapsed, &outcome);
        }

        let monitor = context.monitor.as_ref().filter(|_| context.config.monitoring_enabled);
        if let Some(monitor) = monitor {
            monitor.on_query_complete(ctx, elapsed, &outcome);
        }

        if context.config.is_slow(elapsed) {
            tracing::warn!(
                target: "polyorm.runner",
                runner = self.inner.id,
                elapsed_ms = elapsed.as_millis() as u64,
                sql = %crate::monitor::clip(&ctx.sql, Some(1024)),
                "query is slow"
            );
            if let Some(monitor) = monitor {
                monitor.on_slow_query(ctx, elapsed);
            }
        }
    }

    async fn execute_with_retry(
        &self,
        connection: &mut dyn DriverConnection,
        sql: &str,
        params: &[Value],
        allow_retry: bool,
    ) -> OrmResult<DriverResult> {
        let policy = &self.inner.context.retry;
        let mut abort = self.inner.abort.subscribe();
        let mut attempt = 0;

        loop {
            let err = match self.execute_with_timeout(connection.query(sql, params)).await {
                Ok(result) => return Ok(result),
                Err(err) => err,
            };
            if !allow_retry || !err.is_transient() {
                return Err(err);
            }
            let Some(delay) = policy.delay_for_attempt(attempt) else {
                return Err(err);
            };
            attempt += 1;
            tracing::debug!(
                target: "polyorm.runner",
                runner = self.inner.id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying transient failure"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = abort.wait_for(|aborted| *aborted) => {
                    return Err(OrmError::Aborted("runner released during retry backoff".to_string()));
                }
            }
        }
    }

    async fn execute_with_timeout<T, F>(&self, future: F) -> OrmResult<T>
    where
        F: std::future::Future<Output = OrmResult<T>> + Send,
    {
        match self.inner.context.config.query_timeout {
            Some(timeout) => {
                tokio::pin!(future);
                tokio::select! {
                    result = &mut future => result,
                    _ = tokio::time::sleep(timeout) => Err(OrmError::Timeout(timeout)),
                }
            }
            None => future.await,
        }
    }
}

impl std::fmt::Debug for QueryRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryRunner")
            .field("id", &self.inner.id)
            .field("mode", &self.inner.mode)
            .field("phase", &self.phase())
            .finish()
    }
}
