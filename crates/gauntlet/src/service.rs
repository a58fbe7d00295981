//! Workflow service entrypoint.

use std::marker::PhantomData;

use crate::decider;
use crate::error::Result;
use crate::store::{EventStore, Store};
use crate::workflow::{Workflow, WorkflowId, replay_state};

/// Outcome of executing a workflow input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Execution {
    /// The decision was committed.
    Applied,
    /// The instance is terminal; the input was ignored and nothing was
    /// persisted.
    SkippedTerminal,
}

/// Typed entrypoint for executing workflow inputs and reading state.
///
/// Commands and routed stage results both go through [`execute`], which runs
/// the decide cycle under the instance's exclusive lock. [`load_state`]
/// replays the committed event stream outside any lock; it reads the
/// authoritative log, not a projection, so a status check right after a
/// commit sees the new state.
///
/// [`execute`]: Self::execute
/// [`load_state`]: Self::load_state
pub struct WorkflowService<W, S> {
    store: S,
    _marker: PhantomData<fn() -> W>,
}

impl<W, S: Clone> Clone for WorkflowService<W, S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            _marker: PhantomData,
        }
    }
}

impl<W, S> WorkflowService<W, S>
where
    W: Workflow,
    S: Store + EventStore,
{
    /// Create a new workflow service over a store.
    pub fn new(store: S) -> Self {
        Self {
            store,
            _marker: PhantomData,
        }
    }

    /// Execute a workflow input as a decision.
    ///
    /// Rejections from `decide` are returned verbatim; nothing is persisted
    /// for a rejected input. Inputs routed to an already-completed instance
    /// return [`Execution::SkippedTerminal`] so that effect workers can
    /// acknowledge redeliveries while command facades reject them.
    pub async fn execute(&self, input: &W::Input) -> Result<Execution> {
        decider::execute::<W, _>(&self.store, input).await
    }

    /// Replay the committed event stream into the instance's current state.
    ///
    /// Returns `None` if no events exist for the instance.
    pub async fn load_state(&self, workflow_id: &WorkflowId) -> Result<Option<W::State>> {
        let events = self.store.fetch_stream_events(W::TYPE, workflow_id).await?;
        if events.is_empty() {
            return Ok(None);
        }

        let payloads = events.into_iter().map(|e| e.payload).collect();
        replay_state::<W>(workflow_id, payloads).map(Some)
    }

    /// Borrow the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }
}
