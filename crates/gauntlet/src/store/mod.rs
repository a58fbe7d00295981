//! Storage abstraction for workflow events and effects.
//!
//! This module provides the [`Store`] and [`UnitOfWork`] traits that abstract
//! over durable keyed storage backends, plus the read-side seams used by
//! projections ([`EventStore`], [`ProjectionStore`]) and the effect runtime
//! ([`OutboxStore`]). [`MemoryStore`] is the reference implementation.

mod memory;
mod outbox;

use std::future::Future;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

pub use memory::MemoryStore;
pub use outbox::{DeadLetter, DeadLetterQuery, OutboxEffect, OutboxStore};

use crate::error::Result;
use crate::workflow::WorkflowId;

/// Stored event with global ordering metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEvent {
    /// Position in the store-wide event feed, strictly increasing.
    pub global_sequence: i64,
    /// Workflow type of the owning stream.
    pub workflow_type: String,
    /// Workflow instance ID of the owning stream.
    pub workflow_id: String,
    /// Position within the stream (0-indexed).
    pub sequence: i64,
    /// Event payload as JSON.
    pub payload: Value,
    /// When the event was committed.
    pub created_at: OffsetDateTime,
}

/// Result of beginning a unit of work.
///
/// Indicates whether the workflow is active (can process inputs) or already
/// completed (terminal state reached, should skip processing).
pub enum BeginResult<U> {
    /// Workflow is active and ready to process inputs.
    Active {
        /// Existing events for replay.
        events: Vec<Value>,
        /// Unit of work for appending new events/effects.
        uow: U,
    },
    /// Workflow has already completed (terminal state).
    ///
    /// No events loaded, no lock held. Caller should skip processing.
    Completed,
}

/// Storage backend for workflow events and effects.
///
/// Implementations must provide transactional semantics with per-stream
/// locking. The [`Store::begin`] method acquires an exclusive lock on the
/// workflow instance, preventing concurrent modifications to the same stream.
/// This is what makes each content id a single-writer sequential process.
pub trait Store: Send + Sync + Clone + 'static {
    /// The unit of work type returned by this store.
    type UnitOfWork<'a>: UnitOfWork + Send
    where
        Self: 'a;

    /// Begin a unit of work for a workflow instance.
    ///
    /// This method:
    /// 1. Checks if the workflow is already completed (returns `Completed`)
    /// 2. Acquires an exclusive lock on the workflow instance
    /// 3. Loads all existing events for replay
    /// 4. Returns a unit of work for appending new events/effects
    ///
    /// The lock is held until the unit of work is committed or dropped.
    fn begin<'a>(
        &'a self,
        workflow_type: &'static str,
        workflow_id: &WorkflowId,
    ) -> impl Future<Output = Result<BeginResult<Self::UnitOfWork<'a>>>> + Send;
}

/// A transactional unit of work for a single workflow instance.
///
/// All operations run under an exclusive lock on the workflow instance.
/// Changes are only persisted when [`commit`](Self::commit) is called;
/// dropping the unit of work without committing rolls back all changes.
pub trait UnitOfWork: Send {
    /// Append events to the event store.
    ///
    /// Events are serialized to JSON and stored with monotonically increasing
    /// sequence numbers within the stream.
    fn append_events<E, I>(&mut self, events: I) -> impl Future<Output = Result<()>> + Send
    where
        E: Serialize + Send,
        I: IntoIterator<Item = E> + Send;

    /// Enqueue effects to the outbox.
    ///
    /// Effects are serialized to JSON and stored for later processing by the
    /// effect workers. Enqueueing in the same transaction as the events is
    /// what makes stage progress crash-recoverable: the pending stage is
    /// persisted together with the status that implies it.
    fn enqueue_effects<F, I>(&mut self, effects: I) -> impl Future<Output = Result<()>> + Send
    where
        F: Serialize + Send,
        I: IntoIterator<Item = F> + Send;

    /// Mark the workflow as completed (terminal state reached).
    ///
    /// When committed, further `begin` calls return [`BeginResult::Completed`].
    fn mark_completed(&mut self);

    /// Commit the unit of work, persisting all changes and releasing the lock.
    ///
    /// After commit, the events are visible to the global feed and the
    /// effects are claimable by workers.
    fn commit(self) -> impl Future<Output = Result<()>> + Send;
}

/// Event store read operations for projections and state replay.
pub trait EventStore: Send + Sync + Clone + 'static {
    /// Fetch committed events after the provided global sequence (exclusive).
    ///
    /// Returns events ordered by `global_sequence` ascending.
    fn fetch_events_since(
        &self,
        after: i64,
        limit: u32,
    ) -> impl Future<Output = Result<Vec<StoredEvent>>> + Send;

    /// Fetch all events for one workflow instance ordered by sequence.
    ///
    /// Returns an empty vec for an unknown instance.
    fn fetch_stream_events(
        &self,
        workflow_type: &str,
        workflow_id: &WorkflowId,
    ) -> impl Future<Output = Result<Vec<StoredEvent>>> + Send;
}

/// Projection position storage for projection workers.
pub trait ProjectionStore: Send + Sync + Clone + 'static {
    /// Load the last processed global sequence for a projection.
    fn load_projection_position(
        &self,
        projection_name: &str,
    ) -> impl Future<Output = Result<i64>> + Send;

    /// Persist the last processed global sequence for a projection.
    fn store_projection_position(
        &self,
        projection_name: &str,
        global_sequence: i64,
    ) -> impl Future<Output = Result<()>> + Send;
}
