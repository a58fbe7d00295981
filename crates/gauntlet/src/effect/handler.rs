//! Effect handler trait for executing workflow side effects.

use async_trait::async_trait;

use super::context::EffectContext;
use crate::workflow::Workflow;

/// Handler for executing workflow effects.
///
/// Implement this trait for each workflow type that produces effects.
/// The handler receives effects and optionally returns inputs to route
/// back to the workflow.
///
/// # Results
///
/// | Result | Meaning |
/// |--------|---------|
/// | `Ok(Some(input))` | Effect succeeded, route input back to workflow |
/// | `Ok(None)` | Effect succeeded, no follow-up needed (fire-and-forget) |
/// | `Err(_)` | Failure, will retry with backoff until max attempts |
///
/// # Error Handling
///
/// All errors are treated as retryable. The worker retries with exponential
/// backoff until `max_attempts` is reached, then dead-letters the effect and
/// calls [`on_exhausted`](Self::on_exhausted) for a final failover input.
///
/// For **expected failures** (e.g., a validator returning "not passed"),
/// model them as workflow inputs rather than errors so they are recorded in
/// the event history and handled by the workflow logic.
///
/// # Idempotency
///
/// Effects have **at-least-once** delivery semantics. Handlers may be called
/// multiple times for the same effect due to retries or worker failures.
/// Use [`EffectContext::idempotency_key()`] when calling external services
/// that support idempotency keys.
#[async_trait]
pub trait EffectHandler: Send + Sync + 'static {
    /// The workflow this handler is associated with.
    type Workflow: Workflow;

    /// The error type returned by this handler.
    ///
    /// Must implement `Display` for dead letter serialization. Common
    /// choices: `anyhow::Error` or custom error types.
    type Error: std::fmt::Display + Send + 'static;

    /// Execute an effect and optionally return an input to route back.
    async fn handle(
        &self,
        effect: &<Self::Workflow as Workflow>::Effect,
        ctx: &EffectContext,
    ) -> Result<Option<<Self::Workflow as Workflow>::Input>, Self::Error>;

    /// Produce a failover input after the final attempt failed.
    ///
    /// Called once, when the retry budget is exhausted and the effect is
    /// about to be dead-lettered. Returning `Some(input)` routes a failure
    /// signal into the workflow so the instance can transition instead of
    /// hanging in its current status forever. Returning `None` (the default)
    /// leaves only the dead letter.
    async fn on_exhausted(
        &self,
        _effect: &<Self::Workflow as Workflow>::Effect,
        _ctx: &EffectContext,
        _last_error: &str,
    ) -> Option<<Self::Workflow as Workflow>::Input> {
        None
    }
}
