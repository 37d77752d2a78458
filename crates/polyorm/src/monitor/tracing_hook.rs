use std::time::Duration;

use tracing::Level;

use super::clip;
use super::types::{HookAction, QueryContext, QueryHook, QueryOutcome};

/// Logs every statement on target `polyorm.sql` before it is sent.
///
/// With [`with_outcome`](Self::with_outcome) a second event carries the
/// elapsed time and result. Works without monitoring enabled.
#[derive(Debug, Clone)]
pub struct TracingSqlHook {
    level: Level,
    max_sql_length: Option<usize>,
    outcome: bool,
}

impl Default for TracingSqlHook {
    fn default() -> Self {
        Self {
            level: Level::DEBUG,
            max_sql_length: Some(200),
            outcome: false,
        }
    }
}

macro_rules! event_at {
    ($level:expr, $($field:tt)*) => {
        match $level {
            Level::ERROR => tracing::error!($($field)*),
            Level::WARN => tracing::warn!($($field)*),
            Level::INFO => tracing::info!($($field)*),
            Level::DEBUG => tracing::debug!($($field)*),
            Level::TRACE => tracing::trace!($($field)*),
        }
    };
}

impl TracingSqlHook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn max_sql_length(mut self, bytes: usize) -> Self {
        self.max_sql_length = Some(bytes);
        self
    }

    pub fn no_truncate(mut self) -> Self {
        self.max_sql_length = None;
        self
    }

    pub fn with_outcome(mut self) -> Self {
        self.outcome = true;
        self
    }
}

impl QueryHook for TracingSqlHook {
    fn before_query(&self, ctx: &QueryContext) -> HookAction {
        event_at!(
            self.level,
            target: "polyorm.sql",
            dialect = %ctx.dialect,
            runner = ctx.runner_id,
            depth = ctx.transaction_depth,
            kind = %ctx.query_type,
            params = ctx.param_count,
            rewritten = ctx.is_rewritten(),
            sql = %clip(&ctx.sql, self.max_sql_length),
        );
        HookAction::Continue
    }

    fn after_query(&self, ctx: &QueryContext, duration: Duration, outcome: &QueryOutcome) {
        if !self.outcome {
            return;
        }
        event_at!(
            self.level,
            target: "polyorm.sql",
            runner = ctx.runner_id,
            kind = %ctx.query_type,
            elapsed_us = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX),
            outcome = %outcome,
        );
    }
}
