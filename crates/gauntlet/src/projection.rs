//! Projection infrastructure.
//!
//! Projections consume the globally ordered event feed to maintain derived
//! read models (the status view, the status notification feed, the
//! completion publisher). Each projection checkpoints the last global
//! sequence it processed, so restarts resume where they left off and the
//! read models lag the event store but never run ahead of it.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, error, info};

use crate::error::Result;
use crate::store::{EventStore, ProjectionStore, StoredEvent};
use crate::workflow::WorkflowId;

/// Type alias for boxed futures (object-safe async).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Projection event delivered to projection handlers.
#[derive(Debug, Clone)]
pub struct ProjectionEvent {
    pub global_sequence: i64,
    pub workflow_type: String,
    pub workflow_id: WorkflowId,
    pub sequence: i64,
    pub payload: Value,
    pub created_at: time::OffsetDateTime,
}

impl From<StoredEvent> for ProjectionEvent {
    fn from(event: StoredEvent) -> Self {
        Self {
            global_sequence: event.global_sequence,
            workflow_type: event.workflow_type,
            workflow_id: WorkflowId::new(event.workflow_id),
            sequence: event.sequence,
            payload: event.payload,
            created_at: event.created_at,
        }
    }
}

/// Projection handler trait.
///
/// Handlers receive every committed event in global order, exactly once per
/// checkpoint advance. A returned error halts the feed at the failed event;
/// the worker retries it with backoff, so handlers must tolerate re-seeing
/// the event they failed on.
pub trait Projection: Send + Sync + 'static {
    /// Projection identifier used for checkpointing.
    fn name(&self) -> &'static str;

    /// Apply an event to the projection.
    fn handle<'a>(&'a self, event: ProjectionEvent) -> BoxFuture<'a, Result<()>>;
}

/// Configuration for projection workers.
#[derive(Debug, Clone)]
pub struct ProjectionConfig {
    /// How often to poll for new events.
    pub poll_interval: Duration,
    /// Maximum number of events to fetch per batch.
    pub batch_size: u32,
    /// Base delay for retry backoff after projection failures.
    pub error_backoff_base: Duration,
    /// Maximum delay for retry backoff after projection failures.
    pub error_backoff_max: Duration,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(200),
            batch_size: 100,
            error_backoff_base: Duration::from_millis(200),
            error_backoff_max: Duration::from_secs(5),
        }
    }
}

impl ProjectionConfig {
    fn error_backoff_duration(&self, failures: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(failures.saturating_sub(1));
        let delay = self.error_backoff_base.saturating_mul(multiplier);
        delay.min(self.error_backoff_max)
    }
}

/// Worker that applies a projection using global event ordering.
pub struct ProjectionWorker<S, P>
where
    S: EventStore + ProjectionStore,
    P: Projection + ?Sized,
{
    store: S,
    projection: Arc<P>,
    config: ProjectionConfig,
    worker_id: String,
}

impl<S, P> ProjectionWorker<S, P>
where
    S: EventStore + ProjectionStore,
    P: Projection + ?Sized,
{
    pub fn new(store: S, projection: Arc<P>, config: ProjectionConfig, worker_id: String) -> Self {
        Self {
            store,
            projection,
            config,
            worker_id,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut poll_interval = interval(self.config.poll_interval);
        poll_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut failures: u32 = 0;

        info!(
            worker_id = %self.worker_id,
            projection = self.projection.name(),
            "Projection worker started"
        );

        loop {
            tokio::select! {
                _ = poll_interval.tick() => {
                    match self.process_batch().await {
                        Ok(()) => {
                            failures = 0;
                        }
                        Err(err) => {
                            failures = failures.saturating_add(1);
                            let backoff = self.config.error_backoff_duration(failures);
                            error!(
                                worker_id = %self.worker_id,
                                projection = self.projection.name(),
                                failures,
                                backoff_ms = backoff.as_millis(),
                                error = %err,
                                "Projection batch failed, backing off"
                            );
                            tokio::select! {
                                _ = tokio::time::sleep(backoff) => {}
                                _ = shutdown.changed() => {
                                    if *shutdown.borrow() {
                                        break;
                                    }
                                }
                            }
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(
            worker_id = %self.worker_id,
            projection = self.projection.name(),
            "Projection worker shutting down"
        );

        Ok(())
    }

    async fn process_batch(&self) -> Result<()> {
        let position = self
            .store
            .load_projection_position(self.projection.name())
            .await?;

        let events = self
            .store
            .fetch_events_since(position, self.config.batch_size)
            .await?;

        for event in events {
            let projection_event = ProjectionEvent::from(event);
            let next_position = projection_event.global_sequence;
            self.projection.handle(projection_event).await?;
            self.store
                .store_projection_position(self.projection.name(), next_position)
                .await?;
            debug!(
                projection = self.projection.name(),
                global_sequence = next_position,
                "Projection advanced"
            );
        }

        Ok(())
    }
}
