// src/sched/backoff.rs

//! Retry policy for transient stage failures.

use std::time::Duration;

/// Bounded exponential backoff.
///
/// The delay is a pure function of the attempt number and the configured
/// base/ceiling, with no wall-clock side effects, so retry timing is
/// deterministic under test.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base: Duration,
    /// Cap for the exponential growth.
    pub max: Duration,
    /// Total execution attempts allowed (first run included).
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(base: Duration, max: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Delay before retry number `attempt` (1-indexed: the delay after the
    /// first failed attempt is `delay(1) == base`).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(30);
        let factor = 1u64 << exp;
        let delay = self.base.saturating_mul(factor as u32);
        delay.min(self.max)
    }

    /// Whether a stage that has completed `attempts` executions may retry.
    pub fn may_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}
