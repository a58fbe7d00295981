//! Core workflow traits and types.

use nonempty::NonEmpty;
use serde::{Serialize, de::DeserializeOwned};
use time::OffsetDateTime;

use crate::error::{Error, Result};

/// Pure workflow logic: state reconstruction via `evolve`, decisions via `decide`.
///
/// Both functions must be deterministic with no side effects. Side effects are
/// expressed as [`Self::Effect`] values that the decider enqueues to the
/// outbox; the effect runtime executes them and routes their results back as
/// new inputs.
///
/// # Correlation
///
/// Inputs are matched to workflow instances via a correlation key:
///
/// ```text
/// correlation_key = (Workflow::TYPE, input.workflow_id())
/// ```
///
/// # Rejections
///
/// `decide` returns `Err` for command-precondition failures (already started,
/// not started, wrong status). A rejection persists nothing: the unit of work
/// is dropped and the error is surfaced verbatim to the caller. Accepted
/// inputs must produce at least one event (enforced by [`NonEmpty`]).
pub trait Workflow {
    /// The workflow state, reconstructed by replaying events.
    ///
    /// Held across await points inside spawned workers, hence `Send`.
    type State: Default + Send;

    /// Input commands/signals that trigger decisions.
    type Input: HasWorkflowId + Serialize + DeserializeOwned;

    /// Facts recorded to the event store. Must be serializable for persistence.
    type Event: Serialize + DeserializeOwned + Clone + Send;

    /// Side effects queued to the outbox for external processing.
    ///
    /// Effect workers borrow a decoded effect across await points while
    /// handling it, hence `Send + Sync`.
    type Effect: Serialize + Send + Sync;

    /// Workflow type identifier. Combined with [`HasWorkflowId::workflow_id`]
    /// to form a [`WorkflowRef`] correlation key. Must be stable across
    /// deployments.
    const TYPE: &'static str;

    /// Reconstruct state from an event.
    ///
    /// Called during replay to rebuild the current state from historical
    /// events. Must be deterministic: same events must produce same state.
    fn evolve(state: Self::State, event: Self::Event) -> Self::State;

    /// Decide what actions to take given the current state and input.
    ///
    /// Must be deterministic and side-effect free. The `now` parameter
    /// provides the current time for decisions that depend on it.
    ///
    /// Returns a [`Decision`] containing events to persist and effects to
    /// enqueue, or a rejection [`enum@Error`] that leaves the instance untouched.
    fn decide(
        now: OffsetDateTime,
        state: &Self::State,
        input: &Self::Input,
    ) -> Result<Decision<Self::Event, Self::Effect>>;

    /// Check if the state represents a terminal workflow.
    ///
    /// Terminal workflows are marked as completed in the store; further
    /// routed inputs are silently ignored and commands are rejected at the
    /// facade.
    ///
    /// Default implementation returns `false` (workflow never terminates).
    fn is_terminal(_state: &Self::State) -> bool {
        false
    }
}

/// Extracts the workflow instance ID (business key) from an input.
///
/// Combined with [`Workflow::TYPE`] to form the correlation key.
pub trait HasWorkflowId {
    /// Returns the workflow instance ID for this input.
    ///
    /// Must return the same ID for all inputs targeting the same instance.
    fn workflow_id(&self) -> WorkflowId;
}

/// A workflow instance identifier (business key).
///
/// Use natural business keys (content id) rather than synthetic UUIDs. This
/// makes correlation intuitive and idempotency natural.
///
/// # Example
///
/// ```
/// use gauntlet::WorkflowId;
///
/// let id = WorkflowId::new("content-123");
/// assert_eq!(id.as_str(), "content-123");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkflowId(String);

impl WorkflowId {
    /// Create a new workflow ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Consume the wrapper and return the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }

    /// Borrow the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl From<String> for WorkflowId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for WorkflowId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Reference to a specific workflow instance.
///
/// Combines workflow type and instance ID into a single correlation key.
///
/// # Example
///
/// ```
/// use gauntlet::{WorkflowRef, WorkflowId};
///
/// let workflow = WorkflowRef::new("content-validation", "content-123");
/// assert_eq!(workflow.workflow_type(), "content-validation");
/// assert_eq!(format!("{}", workflow), "content-validation:content-123");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkflowRef {
    workflow_type: String,
    workflow_id: WorkflowId,
}

impl WorkflowRef {
    /// Create a new workflow reference.
    pub fn new(workflow_type: impl Into<String>, workflow_id: impl Into<WorkflowId>) -> Self {
        Self {
            workflow_type: workflow_type.into(),
            workflow_id: workflow_id.into(),
        }
    }

    /// The workflow type (e.g., "content-validation").
    pub fn workflow_type(&self) -> &str {
        &self.workflow_type
    }

    /// The workflow instance ID (business key).
    pub fn workflow_id(&self) -> &WorkflowId {
        &self.workflow_id
    }

    /// Consume and return the inner workflow ID.
    pub fn into_workflow_id(self) -> WorkflowId {
        self.workflow_id
    }
}

impl std::fmt::Display for WorkflowRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.workflow_type, self.workflow_id)
    }
}

/// Actions to execute as a result of an accepted workflow decision.
///
/// Every accepted decision produces at least one event (enforced by
/// [`NonEmpty`]), keeping the audit trail complete. Rejections are errors
/// from [`Workflow::decide`], not decisions.
///
/// # Structure
///
/// - **Events**: facts about what happened (at least one required)
/// - **Effects**: side effects enqueued to the outbox (optional)
#[derive(Debug, Clone)]
pub struct Decision<E, F> {
    events: NonEmpty<E>,
    effects: Vec<F>,
}

impl<E, F> Decision<E, F> {
    /// Create a decision with a single event.
    pub fn event(event: E) -> Self {
        Self {
            events: NonEmpty::new(event),
            effects: vec![],
        }
    }

    /// Create a decision from a non-empty collection of events.
    pub fn from_events(events: NonEmpty<E>) -> Self {
        Self {
            events,
            effects: vec![],
        }
    }

    /// Append another event to this decision.
    pub fn with_event(mut self, event: E) -> Self {
        self.events.push(event);
        self
    }

    /// Add an effect to this decision.
    ///
    /// Effects are executed by the effect worker (e.g., invoke a validator)
    /// after the decision commits.
    pub fn with_effect(mut self, effect: F) -> Self {
        self.effects.push(effect);
        self
    }

    /// Add multiple effects to this decision.
    pub fn with_effects(mut self, effects: impl IntoIterator<Item = F>) -> Self {
        self.effects.extend(effects);
        self
    }

    /// Borrow the events produced by this decision.
    pub fn events(&self) -> &NonEmpty<E> {
        &self.events
    }

    /// Borrow the effects produced by this decision.
    pub fn effects(&self) -> &[F] {
        &self.effects
    }

    /// Consume the decision into its parts.
    pub(crate) fn into_parts(self) -> (NonEmpty<E>, Vec<F>) {
        (self.events, self.effects)
    }
}

/// Replay a stream of JSON event payloads into a workflow state.
///
/// Shared by the decider (inside a unit of work) and the service's read path.
pub(crate) fn replay_state<W: Workflow>(
    workflow_id: &WorkflowId,
    events: Vec<serde_json::Value>,
) -> Result<W::State> {
    let mut state = W::State::default();

    for (sequence, payload) in events.into_iter().enumerate() {
        let event: W::Event = serde_json::from_value(payload).map_err(|e| {
            Error::event_deserialization(W::TYPE, workflow_id.as_str(), sequence, e)
        })?;
        state = W::evolve(state, event);
    }

    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_single_event() {
        let decision = Decision::<&str, i32>::event("submitted")
            .with_effect(1)
            .with_effect(2);

        assert_eq!(decision.events().len(), 1);
        assert_eq!(decision.events().first(), &"submitted");
        assert_eq!(decision.effects(), &[1, 2]);
    }

    #[test]
    fn decision_with_event_appends_in_order() {
        let decision = Decision::<&str, ()>::event("submitted").with_event("detection-started");

        let collected: Vec<_> = decision.events().iter().copied().collect();
        assert_eq!(collected, vec!["submitted", "detection-started"]);
    }

    #[test]
    fn decision_from_events() {
        let events = NonEmpty::collect(["a", "b", "c"]).unwrap();
        let decision = Decision::<&str, ()>::from_events(events);

        let collected: Vec<_> = decision.events().iter().copied().collect();
        assert_eq!(collected, vec!["a", "b", "c"]);
        assert!(decision.effects().is_empty());
    }

    #[test]
    fn decision_with_effects_batch() {
        let decision = Decision::<&str, i32>::event("submitted").with_effects([1, 2, 3]);

        assert_eq!(decision.effects(), &[1, 2, 3]);
    }

    #[test]
    fn decision_into_parts() {
        let decision = Decision::<&str, i32>::event("submitted").with_effect(42);
        let (events, effects) = decision.into_parts();

        assert_eq!(events.first(), &"submitted");
        assert_eq!(effects, vec![42]);
    }

    #[test]
    fn workflow_id_new() {
        let id = WorkflowId::new("content-123");
        assert_eq!(id.as_str(), "content-123");
        assert_eq!(format!("{}", id), "content-123");
    }

    #[test]
    fn workflow_id_from_string() {
        let id: WorkflowId = String::from("content-456").into();
        assert_eq!(id.as_str(), "content-456");
        assert_eq!(id.into_inner(), "content-456");
    }

    #[test]
    fn workflow_ref_display() {
        let wf = WorkflowRef::new("content-validation", "content-123");
        assert_eq!(format!("{}", wf), "content-validation:content-123");
        assert_eq!(wf.workflow_id().as_str(), "content-123");
    }

    #[test]
    fn workflow_ref_equality() {
        let wf1 = WorkflowRef::new("content-validation", "c-1");
        let wf2 = WorkflowRef::new("content-validation", "c-1");
        let wf3 = WorkflowRef::new("content-validation", "c-2");

        assert_eq!(wf1, wf2);
        assert_ne!(wf1, wf3);
    }
}
