//! Retry policy configuration for effect execution.

use std::time::Duration;

/// Configuration for effect retry behavior with exponential backoff.
///
/// When an effect handler returns an error, the effect is retried according
/// to this policy. After `max_attempts` failures the effect is dead-lettered
/// and the handler's exhaustion hook fires.
///
/// # Backoff Calculation
///
/// The delay before retry N is: `min(base_delay * 2^(N-1), max_delay)`
///
/// With defaults (base=1s, max=60s):
/// - Attempt 2: 1s delay
/// - Attempt 3: 2s delay (then dead letter)
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts before dead-lettering.
    ///
    /// Includes the initial attempt. Default: 3 (1 initial + 2 retries).
    pub max_attempts: u32,

    /// Base delay for exponential backoff.
    ///
    /// The delay doubles with each retry. Default: 1 second.
    pub base_delay: Duration,

    /// Maximum delay between retries.
    ///
    /// Caps the exponential growth. Default: 60 seconds.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Returns `true` if another retry should be attempted.
    ///
    /// `attempt` is the attempt number that just failed (1-based).
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Calculate the backoff duration after a failed attempt.
    ///
    /// `attempt` is the attempt number that just failed (1-based).
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        // base * 2^(attempt-1), capped at max
        let multiplier = 2u32.saturating_pow(attempt.saturating_sub(1));
        let delay = self.base_delay.saturating_mul(multiplier);
        delay.min(self.max_delay)
    }
}
