//! Retry / reconnect policies shared by the adapters.

use serde::Deserialize;
use std::time::Duration;

pub const PULL_RETRY_MS: u64 = 500;
pub const PUSH_RECONNECT_MS: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    Fixed,
    Exponential,
}

/// How long to wait after the n-th consecutive failure, and how many of them
/// to tolerate. `max_attempts = None` means keep trying forever.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub delay: Duration,
    pub max_delay: Duration,
    pub backoff: Backoff,
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    /// fixed delay, unbounded attempts
    pub fn fixed(delay: Duration) -> Self {
        Self {
            delay,
            max_delay: delay,
            backoff: Backoff::Fixed,
            max_attempts: None,
        }
    }

    /// pull adapter default: 500ms, forever
    pub fn pull_default() -> Self {
        Self::fixed(Duration::from_millis(PULL_RETRY_MS))
    }

    /// push adapter default: 1000ms, forever
    pub fn push_default() -> Self {
        Self::fixed(Duration::from_millis(PUSH_RECONNECT_MS))
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff, max_delay: Duration) -> Self {
        self.backoff = backoff;
        self.max_delay = max_delay.max(self.delay);
        self
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1).min(16));
                self.delay.saturating_mul(factor).min(self.max_delay)
            }
        }
    }

    /// True once `attempt` consecutive failures exceed the cap.
    pub fn exhausted(&self, attempt: u32) -> bool {
        matches!(self.max_attempts, Some(max) if attempt > max)
    }
}
