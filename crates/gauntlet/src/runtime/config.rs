//! Runtime configuration.

use std::time::Duration;

use crate::effect::RetryPolicy;
use crate::projection::ProjectionConfig;

/// Configuration for the effect and projection runtime.
///
/// Controls polling intervals, timeouts, retry behavior, and worker
/// concurrency.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use gauntlet::runtime::RuntimeConfig;
///
/// let config = RuntimeConfig {
///     effect_poll_interval: Duration::from_millis(50),
///     effect_workers: 4,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// How often to poll for outbox effects.
    ///
    /// Lower values reduce latency but increase store load.
    /// Default: 100ms.
    pub effect_poll_interval: Duration,

    /// How long to hold a lock on an effect while processing.
    ///
    /// Should be longer than the longest expected effect execution.
    /// If a worker crashes, the effect becomes available again after this
    /// duration. Default: 5 minutes.
    pub effect_lock_duration: Duration,

    /// Maximum time to wait for in-flight work during shutdown.
    ///
    /// After this timeout the runtime forces a stop.
    /// Default: 30 seconds.
    pub shutdown_timeout: Duration,

    /// Retry policy for effect failures.
    ///
    /// Controls exponential backoff and max attempts before dead letter.
    pub retry_policy: RetryPolicy,

    /// Worker identifier for distributed coordination.
    ///
    /// Used in lock ownership to identify which worker holds a lease.
    /// If `None`, a UUID is generated at runtime startup.
    pub worker_id: Option<String>,

    /// Number of effect workers to spawn.
    ///
    /// Each worker polls the outbox independently; the claim lease prevents
    /// two workers from processing the same effect. Increase this when
    /// effect handlers are slow (external validator calls). Default: 1.
    pub effect_workers: usize,

    /// Configuration shared by the projection workers.
    pub projection: ProjectionConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            effect_poll_interval: Duration::from_millis(100),
            effect_lock_duration: Duration::from_secs(300),
            shutdown_timeout: Duration::from_secs(30),
            retry_policy: RetryPolicy::default(),
            worker_id: None,
            effect_workers: 1,
            projection: ProjectionConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = RuntimeConfig::default();

        assert_eq!(config.effect_poll_interval, Duration::from_millis(100));
        assert_eq!(config.effect_lock_duration, Duration::from_secs(300));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(30));
        assert!(config.worker_id.is_none());
        assert_eq!(config.effect_workers, 1);
        assert_eq!(config.retry_policy.max_attempts, 3);
    }
}
