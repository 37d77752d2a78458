use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::clip;
use super::types::{HookAction, QueryContext, QueryHook, QueryMonitor, QueryOutcome, QueryType};

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMonitor;

impl QueryMonitor for NoopMonitor {
    fn on_query_complete(&self, _ctx: &QueryContext, _duration: Duration, _outcome: &QueryOutcome) {}
}

/// One `tracing` event per completed statement, on target `polyorm.query`.
///
/// Successes log at INFO, failures and slow statements at WARN.
#[derive(Debug, Clone)]
pub struct LoggingMonitor {
    min_duration: Option<Duration>,
    max_sql_length: Option<usize>,
}

impl Default for LoggingMonitor {
    fn default() -> Self {
        Self {
            min_duration: None,
            max_sql_length: Some(200),
        }
    }
}

impl LoggingMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip statements faster than `duration`.
    pub fn only_slower_than(mut self, duration: Duration) -> Self {
        self.min_duration = Some(duration);
        self
    }

    pub fn max_sql_length(mut self, bytes: usize) -> Self {
        self.max_sql_length = Some(bytes);
        self
    }

    pub fn full_sql(mut self) -> Self {
        self.max_sql_length = None;
        self
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl QueryMonitor for LoggingMonitor {
    fn on_query_complete(&self, ctx: &QueryContext, duration: Duration, outcome: &QueryOutcome) {
        if self.min_duration.is_some_and(|min| duration < min) {
            return;
        }

        let sql = clip(&ctx.sql, self.max_sql_length);
        match outcome {
            QueryOutcome::Error(error) => tracing::warn!(
                target: "polyorm.query",
                dialect = %ctx.dialect,
                runner = ctx.runner_id,
                depth = ctx.transaction_depth,
                kind = %ctx.query_type,
                elapsed_ms = millis(duration),
                error = %error,
                sql = %sql,
                "query failed"
            ),
            _ => tracing::info!(
                target: "polyorm.query",
                dialect = %ctx.dialect,
                runner = ctx.runner_id,
                depth = ctx.transaction_depth,
                kind = %ctx.query_type,
                elapsed_ms = millis(duration),
                outcome = %outcome,
                sql = %sql,
                "query"
            ),
        }
    }

    fn on_slow_query(&self, ctx: &QueryContext, duration: Duration) {
        tracing::warn!(
            target: "polyorm.query",
            dialect = %ctx.dialect,
            runner = ctx.runner_id,
            kind = %ctx.query_type,
            elapsed_ms = millis(duration),
            sql = %clip(&ctx.sql, self.max_sql_length),
            "slow query"
        );
    }
}

/// Counts statements per [`QueryType`] and tracks the slowest one.
#[derive(Debug, Default)]
pub struct StatsMonitor {
    by_type: [AtomicU64; QueryType::COUNT],
    failed: AtomicU64,
    slow: AtomicU64,
    total_nanos: AtomicU64,
    max_nanos: AtomicU64,
    slowest: Mutex<Option<String>>,
}

/// Snapshot of [`StatsMonitor`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryStats {
    pub total_queries: u64,
    pub failed_queries: u64,
    pub slow_queries: u64,
    pub total_duration: Duration,
    pub max_duration: Duration,
    pub select_count: u64,
    pub insert_count: u64,
    pub update_count: u64,
    pub delete_count: u64,
    pub transaction_count: u64,
    pub schema_count: u64,
    pub other_count: u64,
    pub slowest_query: Option<String>,
}

impl StatsMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, query_type: QueryType) -> u64 {
        self.by_type[query_type.index()].load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> QueryStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        QueryStats {
            total_queries: self.by_type.iter().map(load).sum(),
            failed_queries: load(&self.failed),
            slow_queries: load(&self.slow),
            total_duration: Duration::from_nanos(load(&self.total_nanos)),
            max_duration: Duration::from_nanos(load(&self.max_nanos)),
            select_count: self.count(QueryType::Select),
            insert_count: self.count(QueryType::Insert),
            update_count: self.count(QueryType::Update),
            delete_count: self.count(QueryType::Delete),
            transaction_count: self.count(QueryType::Transaction),
            schema_count: self.count(QueryType::Schema),
            other_count: self.count(QueryType::Other),
            slowest_query: self.slowest.lock().ok().and_then(|slowest| slowest.clone()),
        }
    }

    pub fn reset(&self) {
        let scalars = [&self.failed, &self.slow, &self.total_nanos, &self.max_nanos];
        for counter in self.by_type.iter().chain(scalars) {
            counter.store(0, Ordering::Relaxed);
        }
        if let Ok(mut slowest) = self.slowest.lock() {
            *slowest = None;
        }
    }
}

impl QueryMonitor for StatsMonitor {
    fn on_query_complete(&self, ctx: &QueryContext, duration: Duration, outcome: &QueryOutcome) {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);

        self.by_type[ctx.query_type.index()].fetch_add(1, Ordering::Relaxed);
        if outcome.is_error() {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        let _ = self
            .total_nanos
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |total| Some(total.saturating_add(nanos)));

        if self.max_nanos.fetch_max(nanos, Ordering::Relaxed) < nanos {
            if let Ok(mut slowest) = self.slowest.lock() {
                *slowest = Some(ctx.sql.clone());
            }
        }
    }

    fn on_slow_query(&self, _ctx: &QueryContext, _duration: Duration) {
        self.slow.fetch_add(1, Ordering::Relaxed);
    }
}

/// Forwards every event to each monitor in turn.
#[derive(Default)]
pub struct CompositeMonitor {
    monitors: Vec<Arc<dyn QueryMonitor>>,
}

impl CompositeMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(clippy::should_implement_trait)]
    pub fn add<M: QueryMonitor + 'static>(self, monitor: M) -> Self {
        self.add_arc(Arc::new(monitor))
    }

    pub fn add_arc(mut self, monitor: Arc<dyn QueryMonitor>) -> Self {
        self.monitors.push(monitor);
        self
    }
}

impl QueryMonitor for CompositeMonitor {
    fn on_query_start(&self, ctx: &QueryContext) {
        self.monitors.iter().for_each(|m| m.on_query_start(ctx));
    }

    fn on_query_complete(&self, ctx: &QueryContext, duration: Duration, outcome: &QueryOutcome) {
        self.monitors.iter().for_each(|m| m.on_query_complete(ctx, duration, outcome));
    }

    fn on_slow_query(&self, ctx: &QueryContext, duration: Duration) {
        self.monitors.iter().for_each(|m| m.on_slow_query(ctx, duration));
    }
}

/// Chains hooks. Each sees the SQL the previous one produced; the first abort wins.
#[derive(Default)]
pub struct CompositeHook {
    hooks: Vec<Arc<dyn QueryHook>>,
}

impl CompositeHook {
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(clippy::should_implement_trait)]
    pub fn add<H: QueryHook + 'static>(self, hook: H) -> Self {
        self.add_arc(Arc::new(hook))
    }

    pub fn add_arc(mut self, hook: Arc<dyn QueryHook>) -> Self {
        self.hooks.push(hook);
        self
    }
}

impl QueryHook for CompositeHook {
    fn before_query(&self, ctx: &QueryContext) -> HookAction {
        let mut current = ctx.clone();
        for hook in &self.hooks {
            match hook.before_query(&current) {
                HookAction::Continue => {}
                HookAction::Rewrite(sql) => current.rewrite(sql),
                abort @ HookAction::Abort(_) => return abort,
            }
        }
        if current.sql == ctx.sql {
            HookAction::Continue
        } else {
            HookAction::Rewrite(current.sql)
        }
    }

    fn after_query(&self, ctx: &QueryContext, duration: Duration, outcome: &QueryOutcome) {
        self.hooks.iter().for_each(|h| h.after_query(ctx, duration, outcome));
    }
}
