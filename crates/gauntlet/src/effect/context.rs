//! Effect execution context with correlation and idempotency metadata.

use time::OffsetDateTime;
use uuid::Uuid;

use crate::workflow::WorkflowRef;

/// Context provided to effect handlers during execution.
///
/// Contains metadata for correlation (routing results back to the workflow)
/// and idempotency (safe retries with external services).
///
/// # Idempotency
///
/// Effects have at-least-once delivery, so handlers may run more than once
/// for the same effect. [`idempotency_key()`](Self::idempotency_key) is
/// stable across retries but unique per effect instance; pass it to external
/// services that support idempotency keys.
#[derive(Debug, Clone)]
pub struct EffectContext {
    /// Unique identifier for this effect instance (UUID v7).
    pub effect_id: Uuid,

    /// The workflow this effect belongs to.
    pub workflow: WorkflowRef,

    /// Current attempt number (1-based).
    ///
    /// First execution is attempt 1, first retry is attempt 2, etc.
    pub attempt: u32,

    /// When this effect was first enqueued.
    pub created_at: OffsetDateTime,
}

impl EffectContext {
    /// Create a new effect context.
    pub fn new(
        effect_id: Uuid,
        workflow: WorkflowRef,
        attempt: u32,
        created_at: OffsetDateTime,
    ) -> Self {
        Self {
            effect_id,
            workflow,
            attempt,
            created_at,
        }
    }

    /// Get the idempotency key for external service calls.
    ///
    /// Format: `{workflow_type}:{workflow_id}:{effect_id}`. Stable across
    /// retries of the same effect, unique across effects.
    pub fn idempotency_key(&self) -> String {
        format!("{}:{}", self.workflow, self.effect_id)
    }

    /// Returns `true` if this is a retry (attempt > 1).
    pub fn is_retry(&self) -> bool {
        self.attempt > 1
    }
}
