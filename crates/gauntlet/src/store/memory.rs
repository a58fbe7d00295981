//! In-memory store implementation.
//!
//! `MemoryStore` implements every storage seam against process-local state:
//! a globally ordered event log, per-stream exclusive locks, projection
//! checkpoints, and a lock-leased outbox. It is the reference backend for a
//! durable keyed store; the trait surface is identical to what a database
//! implementation would provide, including lease-expiry reclaim of effects
//! whose worker died mid-processing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::outbox::{DeadLetter, DeadLetterQuery, OutboxEffect, OutboxStore};
use super::{BeginResult, EventStore, ProjectionStore, Store, StoredEvent, UnitOfWork};
use crate::error::Result;
use crate::workflow::{WorkflowId, WorkflowRef};

type StreamKey = (String, String);

#[derive(Debug)]
struct EffectRow {
    id: Uuid,
    workflow: WorkflowRef,
    payload: serde_json::Value,
    attempts: u32,
    last_error: Option<String>,
    created_at: OffsetDateTime,
    locked_until: Option<OffsetDateTime>,
    locked_by: Option<String>,
    processed_at: Option<OffsetDateTime>,
}

impl EffectRow {
    fn is_dead_letter(&self, max_attempts: u32) -> bool {
        self.processed_at.is_none() && self.attempts >= max_attempts
    }

    fn matches(&self, query: &DeadLetterQuery) -> bool {
        if let Some(workflow_type) = &query.workflow_type {
            if self.workflow.workflow_type() != workflow_type {
                return false;
            }
        }
        if let Some(workflow_id) = &query.workflow_id {
            if self.workflow.workflow_id() != workflow_id {
                return false;
            }
        }
        true
    }
}

#[derive(Default)]
struct StoreState {
    next_global: i64,
    events: Vec<StoredEvent>,
    stream_lengths: HashMap<StreamKey, i64>,
    completed: HashMap<StreamKey, OffsetDateTime>,
    outbox: Vec<EffectRow>,
    positions: HashMap<String, i64>,
}

struct Inner {
    state: Mutex<StoreState>,
    /// One lock per stream; held across a unit of work to serialize writers.
    stream_locks: Mutex<HashMap<StreamKey, Arc<Mutex<()>>>>,
}

/// In-memory storage backend implementing all store traits.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(StoreState::default()),
                stream_locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    async fn stream_lock(&self, key: &StreamKey) -> Arc<Mutex<()>> {
        let mut locks = self.inner.stream_locks.lock().await;
        Arc::clone(locks.entry(key.clone()).or_default())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Buffered unit of work for [`MemoryStore`].
///
/// Holds the stream's exclusive lock; dropping without [`commit`] discards
/// all buffered changes (rollback).
///
/// [`commit`]: UnitOfWork::commit
pub struct MemoryUnitOfWork {
    inner: Arc<Inner>,
    key: StreamKey,
    events: Vec<serde_json::Value>,
    effects: Vec<serde_json::Value>,
    completed: bool,
    _guard: OwnedMutexGuard<()>,
}

impl Store for MemoryStore {
    type UnitOfWork<'a>
        = MemoryUnitOfWork
    where
        Self: 'a;

    async fn begin<'a>(
        &'a self,
        workflow_type: &'static str,
        workflow_id: &WorkflowId,
    ) -> Result<BeginResult<Self::UnitOfWork<'a>>> {
        let key: StreamKey = (workflow_type.to_string(), workflow_id.as_str().to_string());

        let lock = self.stream_lock(&key).await;
        let guard = lock.lock_owned().await;

        // Check completion after acquiring the lock; the instance may have
        // reached a terminal state while this caller was waiting.
        let events = {
            let state = self.inner.state.lock().await;
            if state.completed.contains_key(&key) {
                return Ok(BeginResult::Completed);
            }
            state
                .events
                .iter()
                .filter(|e| e.workflow_type == key.0 && e.workflow_id == key.1)
                .map(|e| e.payload.clone())
                .collect()
        };

        Ok(BeginResult::Active {
            events,
            uow: MemoryUnitOfWork {
                inner: Arc::clone(&self.inner),
                key,
                events: Vec::new(),
                effects: Vec::new(),
                completed: false,
                _guard: guard,
            },
        })
    }
}

impl UnitOfWork for MemoryUnitOfWork {
    async fn append_events<E, I>(&mut self, events: I) -> Result<()>
    where
        E: serde::Serialize + Send,
        I: IntoIterator<Item = E> + Send,
    {
        for event in events {
            self.events.push(serde_json::to_value(event)?);
        }
        Ok(())
    }

    async fn enqueue_effects<F, I>(&mut self, effects: I) -> Result<()>
    where
        F: serde::Serialize + Send,
        I: IntoIterator<Item = F> + Send,
    {
        for effect in effects {
            self.effects.push(serde_json::to_value(effect)?);
        }
        Ok(())
    }

    fn mark_completed(&mut self) {
        self.completed = true;
    }

    async fn commit(self) -> Result<()> {
        let now = OffsetDateTime::now_utc();
        let mut state = self.inner.state.lock().await;

        let next_sequence = state.stream_lengths.entry(self.key.clone()).or_insert(0);
        let mut sequence = *next_sequence;
        *next_sequence += self.events.len() as i64;

        for payload in self.events {
            state.next_global += 1;
            let global_sequence = state.next_global;
            state.events.push(StoredEvent {
                global_sequence,
                workflow_type: self.key.0.clone(),
                workflow_id: self.key.1.clone(),
                sequence,
                payload,
                created_at: now,
            });
            sequence += 1;
        }

        for payload in self.effects {
            state.outbox.push(EffectRow {
                id: Uuid::now_v7(),
                workflow: WorkflowRef::new(self.key.0.clone(), self.key.1.clone()),
                payload,
                attempts: 0,
                last_error: None,
                created_at: now,
                locked_until: None,
                locked_by: None,
                processed_at: None,
            });
        }

        if self.completed {
            state.completed.insert(self.key, now);
        }

        Ok(())
    }
}

impl EventStore for MemoryStore {
    async fn fetch_events_since(&self, after: i64, limit: u32) -> Result<Vec<StoredEvent>> {
        let state = self.inner.state.lock().await;
        let mut events: Vec<_> = state
            .events
            .iter()
            .filter(|e| e.global_sequence > after)
            .cloned()
            .collect();
        events.truncate(limit as usize);
        Ok(events)
    }

    async fn fetch_stream_events(
        &self,
        workflow_type: &str,
        workflow_id: &WorkflowId,
    ) -> Result<Vec<StoredEvent>> {
        let state = self.inner.state.lock().await;
        Ok(state
            .events
            .iter()
            .filter(|e| e.workflow_type == workflow_type && e.workflow_id == workflow_id.as_str())
            .cloned()
            .collect())
    }
}

impl ProjectionStore for MemoryStore {
    async fn load_projection_position(&self, projection_name: &str) -> Result<i64> {
        let state = self.inner.state.lock().await;
        Ok(state.positions.get(projection_name).copied().unwrap_or(0))
    }

    async fn store_projection_position(
        &self,
        projection_name: &str,
        global_sequence: i64,
    ) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        state
            .positions
            .insert(projection_name.to_string(), global_sequence);
        Ok(())
    }
}

impl OutboxStore for MemoryStore {
    async fn claim_effect(
        &self,
        worker_id: &str,
        lock_duration: Duration,
        max_attempts: u32,
    ) -> Result<Option<OutboxEffect>> {
        let now = OffsetDateTime::now_utc();
        let mut state = self.inner.state.lock().await;

        let row = state.outbox.iter_mut().find(|row| {
            row.processed_at.is_none()
                && row.attempts < max_attempts
                && row.locked_until.map_or(true, |until| until <= now)
        });

        let Some(row) = row else {
            return Ok(None);
        };

        row.locked_until = Some(now + lock_duration);
        row.locked_by = Some(worker_id.to_string());

        Ok(Some(OutboxEffect {
            id: row.id,
            workflow: row.workflow.clone(),
            payload: row.payload.clone(),
            attempts: row.attempts,
            created_at: row.created_at,
        }))
    }

    async fn mark_processed(&self, effect_id: Uuid) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        if let Some(row) = state.outbox.iter_mut().find(|row| row.id == effect_id) {
            row.processed_at = Some(OffsetDateTime::now_utc());
        }
        Ok(())
    }

    async fn record_failure(
        &self,
        effect_id: Uuid,
        error: &str,
        backoff_duration: Duration,
    ) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        if let Some(row) = state.outbox.iter_mut().find(|row| row.id == effect_id) {
            row.attempts += 1;
            row.last_error = Some(error.to_string());
            row.locked_until = Some(OffsetDateTime::now_utc() + backoff_duration);
            row.locked_by = None;
        }
        Ok(())
    }

    async fn record_permanent_failure(
        &self,
        effect_id: Uuid,
        error: &str,
        max_attempts: u32,
    ) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        if let Some(row) = state.outbox.iter_mut().find(|row| row.id == effect_id) {
            row.attempts = max_attempts;
            row.last_error = Some(error.to_string());
            row.locked_until = None;
            row.locked_by = None;
        }
        Ok(())
    }

    async fn fetch_dead_letters(
        &self,
        query: &DeadLetterQuery,
        max_attempts: u32,
    ) -> Result<Vec<DeadLetter>> {
        let state = self.inner.state.lock().await;
        let mut dead_letters: Vec<_> = state
            .outbox
            .iter()
            .filter(|row| row.is_dead_letter(max_attempts) && row.matches(query))
            .map(|row| DeadLetter {
                id: row.id,
                workflow: row.workflow.clone(),
                payload: row.payload.clone(),
                attempts: row.attempts,
                last_error: row.last_error.clone(),
                created_at: row.created_at,
            })
            .collect();
        if let Some(limit) = query.limit {
            dead_letters.truncate(limit as usize);
        }
        Ok(dead_letters)
    }

    async fn count_dead_letters(&self, query: &DeadLetterQuery, max_attempts: u32) -> Result<u64> {
        let state = self.inner.state.lock().await;
        Ok(state
            .outbox
            .iter()
            .filter(|row| row.is_dead_letter(max_attempts) && row.matches(query))
            .count() as u64)
    }

    async fn retry_dead_letter(&self, effect_id: Uuid) -> Result<bool> {
        let mut state = self.inner.state.lock().await;
        match state
            .outbox
            .iter_mut()
            .find(|row| row.id == effect_id && row.processed_at.is_none())
        {
            Some(row) => {
                row.attempts = 0;
                row.locked_until = None;
                row.locked_by = None;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wf_id(id: &str) -> WorkflowId {
        WorkflowId::new(id)
    }

    async fn begin_active(store: &MemoryStore, id: &str) -> (Vec<serde_json::Value>, MemoryUnitOfWork) {
        match store.begin("test", &wf_id(id)).await.unwrap() {
            BeginResult::Active { events, uow } => (events, uow),
            BeginResult::Completed => panic!("stream unexpectedly completed"),
        }
    }

    #[tokio::test]
    async fn commit_makes_events_visible_in_order() {
        let store = MemoryStore::new();

        let (events, mut uow) = begin_active(&store, "c-1").await;
        assert!(events.is_empty());
        uow.append_events(["a", "b"]).await.unwrap();
        uow.commit().await.unwrap();

        let (events, mut uow) = begin_active(&store, "c-1").await;
        assert_eq!(events.len(), 2);
        uow.append_events(["c"]).await.unwrap();
        uow.commit().await.unwrap();

        let stream = store.fetch_stream_events("test", &wf_id("c-1")).await.unwrap();
        let sequences: Vec<_> = stream.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);

        let feed = store.fetch_events_since(0, 100).await.unwrap();
        assert_eq!(feed.len(), 3);
        assert!(feed.windows(2).all(|w| w[0].global_sequence < w[1].global_sequence));
    }

    #[tokio::test]
    async fn dropped_unit_of_work_rolls_back() {
        let store = MemoryStore::new();

        let (_, mut uow) = begin_active(&store, "c-1").await;
        uow.append_events(["a"]).await.unwrap();
        uow.enqueue_effects(["e"]).await.unwrap();
        drop(uow);

        let (events, _uow) = begin_active(&store, "c-1").await;
        assert!(events.is_empty());
        let claimed = store
            .claim_effect("w-1", Duration::from_secs(60), 3)
            .await
            .unwrap();
        assert!(claimed.is_none());
    }

    #[tokio::test]
    async fn completed_stream_short_circuits_begin() {
        let store = MemoryStore::new();

        let (_, mut uow) = begin_active(&store, "c-1").await;
        uow.append_events(["done"]).await.unwrap();
        uow.mark_completed();
        uow.commit().await.unwrap();

        match store.begin("test", &wf_id("c-1")).await.unwrap() {
            BeginResult::Completed => {}
            BeginResult::Active { .. } => panic!("expected completed stream"),
        }
    }

    #[tokio::test]
    async fn stream_lock_serializes_writers() {
        let store = MemoryStore::new();

        let (_, uow) = begin_active(&store, "c-1").await;

        // A second begin for the same stream must block until the first unit
        // of work releases the lock.
        let contended = tokio::time::timeout(
            Duration::from_millis(50),
            store.begin("test", &wf_id("c-1")),
        )
        .await;
        assert!(contended.is_err(), "second writer acquired a held lock");

        // A different stream is unaffected.
        let other = tokio::time::timeout(
            Duration::from_millis(50),
            store.begin("test", &wf_id("c-2")),
        )
        .await;
        assert!(other.is_ok());

        drop(uow);
        let released = tokio::time::timeout(
            Duration::from_millis(200),
            store.begin("test", &wf_id("c-1")),
        )
        .await;
        assert!(released.is_ok());
    }

    #[tokio::test]
    async fn claimed_effect_is_locked_until_lease_expires() {
        let store = MemoryStore::new();

        let (_, mut uow) = begin_active(&store, "c-1").await;
        uow.append_events(["a"]).await.unwrap();
        uow.enqueue_effects(["e"]).await.unwrap();
        uow.commit().await.unwrap();

        let first = store
            .claim_effect("w-1", Duration::from_millis(50), 3)
            .await
            .unwrap()
            .expect("effect available");
        assert_eq!(first.attempts, 0);

        // Locked: a second claim sees nothing.
        let second = store
            .claim_effect("w-2", Duration::from_millis(50), 3)
            .await
            .unwrap();
        assert!(second.is_none());

        // After the lease expires the effect is claimable again (crash recovery).
        tokio::time::sleep(Duration::from_millis(70)).await;
        let reclaimed = store
            .claim_effect("w-2", Duration::from_millis(50), 3)
            .await
            .unwrap();
        assert_eq!(reclaimed.map(|e| e.id), Some(first.id));
    }

    #[tokio::test]
    async fn failures_accumulate_into_dead_letter() {
        let store = MemoryStore::new();

        let (_, mut uow) = begin_active(&store, "c-1").await;
        uow.append_events(["a"]).await.unwrap();
        uow.enqueue_effects(["e"]).await.unwrap();
        uow.commit().await.unwrap();

        let max_attempts = 3;
        for attempt in 1..=max_attempts {
            let effect = store
                .claim_effect("w-1", Duration::from_secs(60), max_attempts)
                .await
                .unwrap()
                .expect("effect available");
            assert_eq!(effect.attempts, attempt - 1);
            store
                .record_failure(effect.id, "boom", Duration::ZERO)
                .await
                .unwrap();
        }

        // Exhausted: no longer claimable, visible as a dead letter.
        let claimed = store
            .claim_effect("w-1", Duration::from_secs(60), max_attempts)
            .await
            .unwrap();
        assert!(claimed.is_none());

        let dead = store
            .fetch_dead_letters(&DeadLetterQuery::new(), max_attempts)
            .await
            .unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].attempts, max_attempts);
        assert_eq!(dead[0].last_error.as_deref(), Some("boom"));
        assert_eq!(
            store
                .count_dead_letters(&DeadLetterQuery::new().workflow_type("test"), max_attempts)
                .await
                .unwrap(),
            1
        );

        // Manual retry resets the attempt counter.
        assert!(store.retry_dead_letter(dead[0].id).await.unwrap());
        let reclaimed = store
            .claim_effect("w-1", Duration::from_secs(60), max_attempts)
            .await
            .unwrap();
        assert!(reclaimed.is_some());
    }

    #[tokio::test]
    async fn projection_positions_round_trip() {
        let store = MemoryStore::new();

        assert_eq!(store.load_projection_position("view").await.unwrap(), 0);
        store.store_projection_position("view", 42).await.unwrap();
        assert_eq!(store.load_projection_position("view").await.unwrap(), 42);
        assert_eq!(store.load_projection_position("feed").await.unwrap(), 0);
    }
}
