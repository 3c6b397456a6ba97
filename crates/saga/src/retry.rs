//! Exponential backoff for retried calls.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff with optional jitter and an optional attempt cap.
///
/// ```text
/// retry   delay (base = 100ms, max = 2s)
///   0       100ms
///   1       200ms
///   2       400ms
///   5       2s (capped)
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first; `None` retries forever.
    pub max_attempts: Option<u32>,

    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Upper bound on any single delay.
    pub max_delay: Duration,

    /// Fraction of the delay added or removed at random (0.0 - 1.0).
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Some(3),
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Bounded policy with the default delays.
    pub fn bounded(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts.max(1)),
            ..Self::default()
        }
    }

    /// Policy that never gives up.
    pub fn unbounded(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: None,
            base_delay,
            max_delay,
            jitter_factor: 0.1,
        }
    }

    /// Bounded policy without delays, for tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts.max(1)),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter_factor: 0.0,
        }
    }

    /// Returns true if another attempt is allowed after `attempts_made`.
    pub fn can_retry(&self, attempts_made: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempts_made < max)
    }

    /// Delay before retry number `retry` (0-based), capped at `max_delay`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.min(31));
        let delay = self.base_delay.saturating_mul(factor).min(self.max_delay);

        if self.jitter_factor <= 0.0 || delay.is_zero() {
            return delay;
        }
        let jitter = rand::thread_rng().gen_range(-self.jitter_factor..=self.jitter_factor);
        delay.mul_f64(1.0 + jitter).min(self.max_delay)
    }
}
