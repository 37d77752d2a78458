use std::time::Duration;

use rand::Rng;

/// Backoff schedule for transient single-statement failures.
///
/// A statement runs at most `max_attempts` times. Only errors classified by
/// [`OrmError::is_transient`](crate::OrmError::is_transient) are retried, and
/// only outside an explicit transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Random spread applied to each delay, as a fraction (`0.25` = ±25%)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl RetryPolicy {
    /// Run every statement exactly once.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(2),
            jitter: 0.0,
        }
    }

    /// Retry up to `max_attempts` total executions with 50ms doubling backoff and ±25% jitter.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            jitter: 0.25,
            ..Self::none()
        }
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max.max(initial);
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.max_attempts > 1
    }

    /// Delay before retry number `attempt` (0 for the first retry).
    ///
    /// Returns `None` once the attempt budget is spent.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        if attempt.saturating_add(1) >= self.max_attempts {
            return None;
        }

        let mut delay = self.initial_backoff;
        for _ in 0..attempt {
            delay = delay.saturating_mul(2);
            if delay >= self.max_backoff {
                break;
            }
        }
        let delay = delay.min(self.max_backoff);

        if self.jitter > 0.0 {
            let factor = rand::thread_rng().gen_range((1.0 - self.jitter)..=(1.0 + self.jitter));
            Some(delay.mul_f64(factor))
        } else {
            Some(delay)
        }
    }
}
