//! Reconnect delay policy.
//!
//! Pure computation: no clocks, no timers. The session driver asks this
//! policy how long to wait before a given attempt and whether the attempt
//! budget is spent; arming the actual timer stays in the driver.
//!
//! Delay schedule: `min(base_delay * 2^(attempt - 1), max_delay)`, attempts
//! counted from 1. Optional symmetric ±10% jitter, clamped so the result
//! never exceeds `max_delay`.
//!
//! Rust guideline compliant 2026-02

use std::time::Duration;

use crate::config::SessionConfig;

/// Jitter width as a divisor of the nominal delay (10 = ±10%).
const JITTER_DIVISOR: u64 = 10;

/// Capped exponential backoff schedule for reconnect attempts.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    base_delay: Duration,
    max_delay: Duration,
    max_attempts: u32,
    jitter: bool,
}

impl BackoffPolicy {
    /// Builds a policy from session configuration.
    #[must_use]
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            base_delay: config.base_delay,
            max_delay: config.max_delay,
            max_attempts: config.max_attempts,
            jitter: config.jitter,
        }
    }

    /// Returns the delay to wait before the given attempt (counted from 1).
    ///
    /// Attempt 1 waits `base_delay`, each further attempt doubles, capped at
    /// `max_delay`. With jitter enabled the nominal delay is perturbed by a
    /// uniform ±10% and re-clamped to `max_delay`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let max_ms = self.max_delay.as_millis() as u64;

        // 2^exp saturates well past any sane max_delay; clamp the exponent
        // so the shift itself cannot overflow.
        let exp = attempt.saturating_sub(1).min(31);
        let nominal_ms = base_ms.saturating_mul(1_u64 << exp).min(max_ms);

        let delay_ms = if self.jitter {
            Self::apply_jitter(nominal_ms).min(max_ms)
        } else {
            nominal_ms
        };

        Duration::from_millis(delay_ms)
    }

    /// Whether the given attempt number exceeds the configured budget.
    #[must_use]
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        attempt > self.max_attempts
    }

    /// Configured attempt budget.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Perturbs a delay by a uniform value in `[-10%, +10%]`.
    fn apply_jitter(nominal_ms: u64) -> u64 {
        let tenth = nominal_ms / JITTER_DIVISOR;
        if tenth == 0 {
            return nominal_ms;
        }
        let span = tenth * 2 + 1;
        let offset = rand::random::<u64>() % span;
        // offset in [0, 2*tenth]; shifting down by tenth centers it on zero.
        nominal_ms - tenth + offset
    }
}
