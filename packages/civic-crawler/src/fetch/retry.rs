//! Retry policy for transient fetch failures.

use std::time::Duration;

use crate::error::FetchError;

/// Explicit retry policy: attempts, backoff, jitter, and what counts as
/// transient. 404 and access-denied are never retried.
#[derive(Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub jitter_cap: Duration,
    transient: fn(&FetchError) -> bool,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("jitter_cap", &self.jitter_cap)
            .finish()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            jitter_cap: Duration::from_secs(1),
            transient: FetchError::is_transient,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            ..Default::default()
        }
    }

    /// Policy with no backoff wait, for tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            jitter_cap: Duration::ZERO,
            transient: FetchError::is_transient,
        }
    }

    pub fn with_transient(mut self, transient: fn(&FetchError) -> bool) -> Self {
        self.transient = transient;
        self
    }

    /// Whether `error` on 1-based `attempt` warrants another try.
    pub fn should_retry(&self, error: &FetchError, attempt: u32) -> bool {
        attempt < self.max_attempts && (self.transient)(error)
    }

    /// Backoff before retrying after 1-based `attempt` failed:
    /// `base · 2^(attempt−1)`, jitter added by the caller's sleep.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    /// Jitter bound for one backoff sleep.
    pub fn jitter_cap(&self) -> Duration {
        self.jitter_cap
    }
}
