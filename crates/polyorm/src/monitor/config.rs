use std::time::Duration;

/// Timing settings every runner of a data source applies.
///
/// Derived from [`ConnectionOptions`](crate::ConnectionOptions). The slow-query
/// warning and the timeout apply even while monitoring is disabled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorConfig {
    pub max_query_execution_time: Option<Duration>,
    pub query_timeout: Option<Duration>,
    pub monitoring_enabled: bool,
}

impl MonitorConfig {
    pub fn is_slow(&self, elapsed: Duration) -> bool {
        self.max_query_execution_time.is_some_and(|limit| elapsed > limit)
    }
}
