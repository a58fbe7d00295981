//! Outbox storage operations for effect processing.

use std::future::Future;
use std::time::Duration;

use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::workflow::{WorkflowId, WorkflowRef};

/// A claimed effect from the outbox, ready for processing.
///
/// Contains all metadata needed to execute the effect and route results.
#[derive(Debug, Clone)]
pub struct OutboxEffect {
    /// Unique identifier for this effect (UUID v7).
    pub id: Uuid,
    /// The workflow this effect belongs to.
    pub workflow: WorkflowRef,
    /// The effect payload as JSON.
    pub payload: Value,
    /// Number of previous attempts (0 for first try).
    pub attempts: u32,
    /// When the effect was created.
    pub created_at: OffsetDateTime,
}

/// A dead-lettered effect that has exceeded maximum retry attempts.
///
/// Dead letters remain in the outbox for inspection and manual retry. For
/// this pipeline they are the ops-side record of a stage that exhausted its
/// retries; the user-visible outcome is the instance's FAILED status.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    /// Unique identifier for this effect (UUID v7).
    pub id: Uuid,
    /// The workflow this effect belongs to.
    pub workflow: WorkflowRef,
    /// The effect payload as JSON.
    pub payload: Value,
    /// Number of failed attempts.
    pub attempts: u32,
    /// The last error message from the most recent failure.
    pub last_error: Option<String>,
    /// When the effect was created.
    pub created_at: OffsetDateTime,
}

/// Query parameters for fetching dead letters.
#[derive(Debug, Clone, Default)]
pub struct DeadLetterQuery {
    /// Filter by workflow type.
    pub workflow_type: Option<String>,
    /// Filter by workflow ID.
    pub workflow_id: Option<WorkflowId>,
    /// Maximum number of results to return.
    pub limit: Option<u32>,
}

impl DeadLetterQuery {
    /// Create a new empty query (matches all dead letters).
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter by workflow type.
    pub fn workflow_type(mut self, workflow_type: impl Into<String>) -> Self {
        self.workflow_type = Some(workflow_type.into());
        self
    }

    /// Filter by workflow ID.
    pub fn workflow_id(mut self, workflow_id: impl Into<WorkflowId>) -> Self {
        self.workflow_id = Some(workflow_id.into());
        self
    }

    /// Limit the number of results.
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Storage operations for effect processing.
///
/// # Locking protocol
///
/// Effects are claimed under a lock lease:
/// 1. `claim_effect` atomically selects and locks an available effect
/// 2. The effect stays locked for `lock_duration`
/// 3. `mark_processed` or `record_failure` must be called before the lease expires
/// 4. If a worker crashes, the lease expires and another worker can claim it
///
/// Lease expiry is the crash-recovery path: a stage whose transition was
/// never committed is re-claimed and re-invoked (at-least-once delivery).
pub trait OutboxStore: Send + Sync + Clone + 'static {
    /// Claim the next available effect for processing.
    ///
    /// Returns `None` if no effects are available. The effect is locked for
    /// `lock_duration` to prevent double-processing. Effects where
    /// `attempts >= max_attempts` are excluded (dead letters).
    fn claim_effect(
        &self,
        worker_id: &str,
        lock_duration: Duration,
        max_attempts: u32,
    ) -> impl Future<Output = crate::Result<Option<OutboxEffect>>> + Send;

    /// Mark an effect as successfully processed, removing it from the queue.
    fn mark_processed(&self, effect_id: Uuid) -> impl Future<Output = crate::Result<()>> + Send;

    /// Record a failure and schedule retry with backoff.
    ///
    /// Increments `attempts`, records the error message, and delays the next
    /// claim by `backoff_duration`.
    fn record_failure(
        &self,
        effect_id: Uuid,
        error: &str,
        backoff_duration: Duration,
    ) -> impl Future<Output = crate::Result<()>> + Send;

    /// Record a permanent failure, immediately dead-lettering the effect.
    ///
    /// Sets `attempts` to `max_attempts` to exclude the effect from claims.
    fn record_permanent_failure(
        &self,
        effect_id: Uuid,
        error: &str,
        max_attempts: u32,
    ) -> impl Future<Output = crate::Result<()>> + Send;

    /// Fetch dead-lettered effects matching the query.
    ///
    /// Dead letters are unprocessed effects where `attempts >= max_attempts`.
    fn fetch_dead_letters(
        &self,
        query: &DeadLetterQuery,
        max_attempts: u32,
    ) -> impl Future<Output = crate::Result<Vec<DeadLetter>>> + Send;

    /// Count dead-lettered effects matching the query.
    fn count_dead_letters(
        &self,
        query: &DeadLetterQuery,
        max_attempts: u32,
    ) -> impl Future<Output = crate::Result<u64>> + Send;

    /// Retry a dead-lettered effect.
    ///
    /// Resets the effect's `attempts` to 0 and clears its lock, making it
    /// available for processing again.
    ///
    /// Returns `Ok(true)` if the effect was found and reset, `Ok(false)` if
    /// it was not found or already processed.
    fn retry_dead_letter(
        &self,
        effect_id: Uuid,
    ) -> impl Future<Output = crate::Result<bool>> + Send;
}
