// src/retry.rs

//! Retry budgets and exponential backoff.

use std::time::Duration;

/// Doubling delay, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before the `n`-th retry (1-based). `n == 0` yields zero.
    pub fn delay(&self, n: u32) -> Duration {
        if n == 0 || self.base.is_zero() {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(n - 1).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.max, |d| d.min(self.max))
    }
}

/// Kernel-wide retry settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries for apps that do not set their own budget.
    pub default_retries: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            default_retries: 0,
            backoff: Backoff::new(Duration::ZERO, Duration::from_secs(60)),
        }
    }
}

impl RetryPolicy {
    pub fn with_retries(default_retries: u32) -> Self {
        Self {
            default_retries,
            ..Self::default()
        }
    }

    /// Effective budget for an app.
    pub fn budget(&self, app_retries: Option<u32>) -> u32 {
        app_retries.unwrap_or(self.default_retries)
    }

    /// Delay before re-dispatching after `failed_attempts` failures.
    pub fn delay_after(&self, failed_attempts: u32) -> Duration {
        self.backoff.delay(failed_attempts)
    }
}
