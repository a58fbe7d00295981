//! Runtime for executing effects and projections.
//!
//! The runtime owns the background half of the engine:
//!
//! - Effect workers claim outbox effects, invoke the [`EffectHandler`], and
//!   route results back into the workflow
//! - Projection workers feed committed events to registered [`Projection`]s
//!
//! Create one with [`Runtime::new`], register projections, then call
//! [`Runtime::run`] with a shutdown future.

mod config;
mod effect_worker;

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;
use uuid::Uuid;

pub use config::RuntimeConfig;

use crate::effect::EffectHandler;
use crate::projection::{Projection, ProjectionWorker};
use crate::service::WorkflowService;
use crate::store::{DeadLetter, DeadLetterQuery, EventStore, OutboxStore, ProjectionStore, Store};
use crate::workflow::Workflow;
use effect_worker::EffectWorker;

/// Background runtime: effect workers plus projection workers.
///
/// # Shutdown behavior
///
/// When the shutdown future passed to [`run`](Self::run) completes:
/// 1. All workers stop claiming new work
/// 2. In-flight work is allowed to finish
/// 3. After `shutdown_timeout` the runtime forces a stop
pub struct Runtime<H, S>
where
    H: EffectHandler,
    S: Store + EventStore + ProjectionStore + OutboxStore,
{
    service: WorkflowService<H::Workflow, S>,
    handler: Arc<H>,
    projections: Vec<Arc<dyn Projection>>,
    config: RuntimeConfig,
    worker_id: String,
}

impl<H, S> Runtime<H, S>
where
    H: EffectHandler,
    <H::Workflow as Workflow>::Input: Send + Sync,
    <H::Workflow as Workflow>::Effect: serde::de::DeserializeOwned,
    S: Store + EventStore + ProjectionStore + OutboxStore,
{
    /// Create a new runtime over a store and effect handler.
    pub fn new(store: S, handler: H, config: RuntimeConfig) -> Self {
        let worker_id = config
            .worker_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        Self {
            service: WorkflowService::new(store),
            handler: Arc::new(handler),
            projections: Vec::new(),
            config,
            worker_id,
        }
    }

    /// Register a projection to run against the event feed.
    ///
    /// Each projection gets its own worker and checkpoint.
    pub fn with_projection(mut self, projection: Arc<dyn Projection>) -> Self {
        self.projections.push(projection);
        self
    }

    /// Returns the runtime configuration.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Returns the worker identifier.
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Borrow the workflow service backing this runtime.
    pub fn service(&self) -> &WorkflowService<H::Workflow, S> {
        &self.service
    }

    /// Run all workers until the shutdown future completes.
    pub async fn run<F>(self, shutdown: F) -> crate::Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let effect_worker_count = self.config.effect_workers.max(1);

        info!(
            worker_id = %self.worker_id,
            effect_workers = effect_worker_count,
            projections = self.projections.len(),
            "Runtime starting"
        );

        let mut worker_handles = Vec::new();

        for i in 0..effect_worker_count {
            let worker_id = if effect_worker_count == 1 {
                format!("{}-effect", self.worker_id)
            } else {
                format!("{}-effect-{}", self.worker_id, i)
            };

            let effect_worker = EffectWorker::new(
                self.service.clone(),
                Arc::clone(&self.handler),
                self.config.clone(),
                worker_id,
            );

            let effect_shutdown_rx = shutdown_rx.clone();
            worker_handles.push(tokio::spawn(async move {
                effect_worker.run(effect_shutdown_rx).await;
            }));
        }

        for projection in &self.projections {
            let worker_id = format!("{}-{}", self.worker_id, projection.name());
            let projection_worker = ProjectionWorker::new(
                self.service.store().clone(),
                Arc::clone(projection),
                self.config.projection.clone(),
                worker_id,
            );

            let projection_shutdown_rx = shutdown_rx.clone();
            worker_handles.push(tokio::spawn(async move {
                let _ = projection_worker.run(projection_shutdown_rx).await;
            }));
        }

        shutdown.await;

        let _ = shutdown_tx.send(true);

        let all_workers = async {
            for handle in worker_handles {
                let _ = handle.await;
            }
        };

        match tokio::time::timeout(self.config.shutdown_timeout, all_workers).await {
            Ok(()) => {
                info!(worker_id = %self.worker_id, "Runtime stopped gracefully");
            }
            Err(_) => {
                tracing::warn!(
                    worker_id = %self.worker_id,
                    timeout_secs = self.config.shutdown_timeout.as_secs(),
                    "Shutdown timeout exceeded, forcing stop"
                );
            }
        }

        Ok(())
    }

    /// Fetch dead-lettered effects.
    ///
    /// Returns effects that have exceeded the configured `max_attempts` and
    /// are no longer being retried.
    pub async fn fetch_dead_letters(
        &self,
        query: DeadLetterQuery,
    ) -> crate::Result<Vec<DeadLetter>> {
        self.service
            .store()
            .fetch_dead_letters(&query, self.config.retry_policy.max_attempts)
            .await
    }

    /// Count dead-lettered effects.
    pub async fn count_dead_letters(&self, query: DeadLetterQuery) -> crate::Result<u64> {
        self.service
            .store()
            .count_dead_letters(&query, self.config.retry_policy.max_attempts)
            .await
    }

    /// Retry a dead-lettered effect.
    ///
    /// Resets the effect's attempt count to 0, making it available for
    /// processing again. Returns `Ok(false)` if the effect was not found or
    /// was already processed.
    pub async fn retry_dead_letter(&self, effect_id: Uuid) -> crate::Result<bool> {
        self.service.store().retry_dead_letter(effect_id).await
    }
}
