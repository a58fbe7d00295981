//! Workflow decision execution.

use time::OffsetDateTime;

use crate::error::Result;
use crate::service::Execution;
use crate::store::{BeginResult, Store, UnitOfWork};
use crate::workflow::{HasWorkflowId, Workflow, replay_state};

/// Execute a workflow decision.
///
/// This function:
/// 1. Extracts the workflow ID from the input
/// 2. Begins a unit of work (acquires the per-stream lock, loads events)
/// 3. Replays events to reconstruct current state
/// 4. Calls `Workflow::decide` with the current state and input
/// 5. Appends resulting events to the event store
/// 6. Enqueues resulting effects to the outbox
/// 7. Marks the workflow as completed if a terminal state was reached
/// 8. Commits the transaction
///
/// If the workflow is already completed, this function returns
/// [`Execution::SkippedTerminal`] without running `decide` (routed inputs are
/// idempotent against terminal instances). If `decide` rejects the input or
/// any step fails, the unit of work is dropped and nothing is persisted.
///
/// # Concurrency
///
/// Executions for different workflow instances run concurrently. Executions
/// for the same instance are serialized by the store's per-stream lock, so no
/// two mutations of one instance are ever concurrent.
pub(crate) async fn execute<W, S>(store: &S, input: &W::Input) -> Result<Execution>
where
    W: Workflow,
    S: Store,
{
    let workflow_id = input.workflow_id();

    let (event_payloads, mut uow) = match store.begin(W::TYPE, &workflow_id).await? {
        BeginResult::Active { events, uow } => (events, uow),
        BeginResult::Completed => {
            // Terminal instance - redelivered stage results are no-ops.
            return Ok(Execution::SkippedTerminal);
        }
    };

    let state = replay_state::<W>(&workflow_id, event_payloads)?;

    let now = OffsetDateTime::now_utc();
    let decision = W::decide(now, &state, input)?;
    let (events, effects) = decision.into_parts();

    // Compute final state by applying new events
    let final_state = events.iter().cloned().fold(state, W::evolve);

    uow.append_events(events).await?;
    uow.enqueue_effects(effects).await?;

    if W::is_terminal(&final_state) {
        uow.mark_completed();
    }

    uow.commit().await?;
    Ok(Execution::Applied)
}
