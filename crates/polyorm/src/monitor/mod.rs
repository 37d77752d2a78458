//! Query monitoring and hooks.
//!
//! Every statement a [`QueryRunner`](crate::runner::QueryRunner) executes
//! passes through the configured [`QueryHook`] (which may rewrite or veto it)
//! and is then reported to the configured [`QueryMonitor`].
//!
//! ```rust,ignore
//! use polyorm::monitor::{CompositeMonitor, LoggingMonitor, StatsMonitor};
//! use std::time::Duration;
//!
//! let stats = std::sync::Arc::new(StatsMonitor::new());
//! let source = DataSource::builder(driver)
//!     .monitor(CompositeMonitor::new().add(LoggingMonitor::new()).add_arc(stats.clone()))
//!     .options(
//!         ConnectionOptions::new()
//!             .with_monitoring(true)
//!             .with_max_query_execution_time(Duration::from_secs(1)),
//!     )
//!     .build();
//! ```

use std::borrow::Cow;

mod config;
mod monitors;
mod tracing_hook;
mod types;

#[cfg(test)]
mod tests;

pub use config::MonitorConfig;
pub use monitors::{CompositeHook, CompositeMonitor, LoggingMonitor, NoopMonitor, QueryStats, StatsMonitor};
pub use tracing_hook::TracingSqlHook;
pub use types::{HookAction, QueryContext, QueryHook, QueryMonitor, QueryOutcome, QueryType};

/// Cut `sql` to at most `max` bytes on a char boundary, marking the cut with `...`.
pub(crate) fn clip(sql: &str, max: Option<usize>) -> Cow<'_, str> {
    match max {
        Some(max) if sql.len() > max => {
            let mut end = max;
            while !sql.is_char_boundary(end) {
                end -= 1;
            }
            Cow::Owned(format!("{}...", &sql[..end]))
        }
        _ => Cow::Borrowed(sql),
    }
}
