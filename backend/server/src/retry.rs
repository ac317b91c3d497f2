//! # Reconnect Policy
//!
//! One policy for every deployment instead of a retry loop per entry point.
//!
//! - `delay(n)` doubles from `initial_delay` and is capped at `max_delay`
//! - Equal initial and max delays give a fixed backoff, which is the default (10s)
//! - `jitter` spreads each delay by up to that fraction in either direction
//! - `max_attempts: None` retries until the process exits
use std::time::Duration;

use rand::Rng;

pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub jitter: f64,
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_RETRY_DELAY)
    }
}

impl RetryPolicy {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            jitter: 0.0,
            max_attempts: None,
        }
    }

    /// Delay before the retry that follows failed attempt number `attempt` (zero based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let cap = self.max_delay.max(self.initial_delay);
        let base = self
            .initial_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(cap);

        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || base.is_zero() {
            return base;
        }

        let spread = base.as_secs_f64() * jitter;
        let offset = rand::thread_rng().gen_range(-spread..=spread);

        Duration::from_secs_f64((base.as_secs_f64() + offset).max(0.0))
    }

    pub fn should_retry(&self, failed_attempts: u32) -> bool {
        self.max_attempts
            .is_none_or(|max_attempts| failed_attempts < max_attempts)
    }
}
