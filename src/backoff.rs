//! Exponential backoff with jitter.
//!
//! Used by the cache to decide how long a failed key stays failed before the
//! next caller is allowed to recompute it. The delay follows:
//!
//! ```text
//! delay = min(base * 2^(attempt-1), max) + random_jitter(0..=jitter)
//! ```
//!
//! A zero `base` disables backoff entirely: failures are never remembered.

use rand::{Rng, rng};
use std::time::Duration;

/// Default upper bound on the random jitter added to each delay.
const DEFAULT_JITTER_MS: u64 = 250;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Delay after the first failure (doubles with each consecutive failure).
    base: Duration,
    /// Cap applied before jitter.
    max: Duration,
    /// Upper bound of the random jitter, in milliseconds.
    jitter_ms: u64,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            jitter_ms: DEFAULT_JITTER_MS,
        }
    }

    /// Backoff that never delays; failed keys are retried on the next call.
    pub fn disabled() -> Self {
        Self {
            base: Duration::ZERO,
            max: Duration::ZERO,
            jitter_ms: 0,
        }
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter_ms = 0;
        self
    }

    pub fn is_disabled(&self) -> bool {
        self.base.is_zero()
    }

    /// Delay to apply after `attempt` consecutive failures (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        if self.is_disabled() || attempt == 0 {
            return Duration::ZERO;
        }
        let shift = (attempt - 1).min(31);
        let mut delay = self.base.saturating_mul(1u32 << shift);
        if delay > self.max {
            delay = self.max;
        }
        if self.jitter_ms > 0 {
            let jitter_ms: u64 = rng().random_range(0..=self.jitter_ms);
            delay += Duration::from_millis(jitter_ms);
        }
        delay
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::disabled()
    }
}
