//! Exponential backoff between transfer attempts

use rand::Rng;
use std::time::Duration;

use crate::core::config::RetryConfig;

/// Backoff schedule for retryable transfer failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter: bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration, jitter: bool) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
            jitter,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.jitter,
        )
    }

    /// Total attempts, including the first
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether another attempt is allowed after `attempt` failed ones
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay to sleep after failed attempt number `attempt` (1-based).
    ///
    /// `base_delay * 2^(attempt-1)`, capped at `max_delay`. With jitter the
    /// result is drawn uniformly from `[delay/2, delay]`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.nominal_delay(attempt);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let nanos = delay.as_nanos().min(u64::MAX as u128) as u64;
        let jittered = rand::thread_rng().gen_range(nanos / 2..=nanos);
        Duration::from_nanos(jittered)
    }

    fn nominal_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
