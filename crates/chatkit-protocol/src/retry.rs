//! Half-jitter exponential backoff for stream reconnects.
//!
//! The delay for attempt `n` is drawn from `[cap / 2, cap)` where
//! `cap = min(max_delay, base_delay * 2^n)`. Only the stream relay retries,
//! and only on failures it has classified as retryable.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Base delay before doubling.
pub const BASE_RETRY_DELAY: Duration = Duration::from_millis(1000);
/// Hard ceiling for a single delay.
pub const MAX_RETRY_DELAY: Duration = Duration::from_millis(10_000);
/// Retries allowed before the last failure is rethrown.
pub const MAX_RETRY_ATTEMPTS: u32 = 5;

/// Retry policy configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Base delay for exponential backoff
    #[serde(rename = "base_delay_ms", with = "duration_ms", default = "default_base_delay")]
    pub base_delay: Duration,
    /// Ceiling for any single delay
    #[serde(rename = "max_delay_ms", with = "duration_ms", default = "default_max_delay")]
    pub max_delay: Duration,
    /// Maximum number of retry attempts
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

const fn default_base_delay() -> Duration {
    BASE_RETRY_DELAY
}

const fn default_max_delay() -> Duration {
    MAX_RETRY_DELAY
}

const fn default_max_attempts() -> u32 {
    MAX_RETRY_ATTEMPTS
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: BASE_RETRY_DELAY,
            max_delay: MAX_RETRY_DELAY,
            max_attempts: MAX_RETRY_ATTEMPTS,
        }
    }
}

impl RetryPolicy {
    /// Create a retry policy with custom settings.
    #[must_use]
    pub const fn new(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_attempts,
        }
    }

    /// Upper bound of the delay for `attempt`: `min(max_delay, base_delay * 2^attempt)`.
    #[must_use]
    pub fn delay_cap(&self, attempt: u32) -> Duration {
        let base = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        let max = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX);
        let exponential = 1_u64
            .checked_shl(attempt)
            .and_then(|factor| base.checked_mul(factor))
            .unwrap_or(u64::MAX);
        Duration::from_millis(exponential.min(max))
    }

    /// Half-jitter delay for `attempt`, in `[cap / 2, cap)`.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let cap_ms = u64::try_from(self.delay_cap(attempt).as_millis()).unwrap_or(u64::MAX);
        let factor: f64 = rand::thread_rng().gen_range(0.5..1.0);
        let millis = (cap_ms as f64 * factor).floor() as u64;
        Duration::from_millis(millis.min(cap_ms))
    }

    /// Create a retry state for tracking attempts.
    #[must_use]
    pub const fn state(&self) -> RetryState {
        RetryState::new(*self)
    }
}

/// Attempt counter for one stream.
#[derive(Debug, Clone)]
pub struct RetryState {
    policy: RetryPolicy,
    attempt: u32,
}

impl RetryState {
    #[must_use]
    pub const fn new(policy: RetryPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Retries consumed since the last successful open.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Record a retry and get the delay before it.
    ///
    /// Returns `None` once `max_attempts` retries have been used; the caller
    /// should then give up with the original failure.
    pub fn next_retry(&mut self) -> Option<Duration> {
        if self.attempt >= self.policy.max_attempts {
            return None;
        }
        self.attempt = self.attempt.saturating_add(1);
        Some(self.policy.next_delay(self.attempt))
    }

    /// Forget earlier failures after a successful open.
    pub const fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Serde helpers for [`Duration`] fields stored as whole milliseconds.
pub mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize a duration as milliseconds.
    ///
    /// # Errors
    /// Propagates serializer errors.
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    /// Deserialize milliseconds into a duration.
    ///
    /// # Errors
    /// Fails when the value is not an unsigned integer.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
