//! Engine assembly: wires the store, validators, and projections together.

use std::sync::Arc;
use std::time::Duration;

use crate::content::handler::StageHandler;
use crate::content::notify::{StatusFeed, StatusNotifier};
use crate::content::push::{CompletionPublisher, CompletionSink};
use crate::content::service::ContentPipeline;
use crate::content::stages::ValidatorSet;
use crate::content::view::{ContentStatusView, StatusViewProjection};
use crate::projection::Projection;
use crate::runtime::{Runtime, RuntimeConfig};
use crate::service::WorkflowService;
use crate::store::{EventStore, OutboxStore, ProjectionStore, Store};

/// The assembled pipeline: boundary facade plus background runtime.
///
/// Obtain the [`ContentPipeline`] handle with [`pipeline`](Self::pipeline),
/// then drive the background workers with [`run`](Self::run).
///
/// # Example
///
/// ```ignore
/// let engine = PipelineEngine::builder(store, validators)
///     .completion_sink(sink)
///     .build();
///
/// let pipeline = engine.pipeline();
/// tokio::spawn(engine.run(async { shutdown_rx.await.ok(); }));
///
/// pipeline.submit("content-1", "Hello", BTreeMap::new()).await?;
/// ```
pub struct PipelineEngine<S>
where
    S: Store + EventStore + ProjectionStore + OutboxStore,
{
    pipeline: ContentPipeline<S>,
    runtime: Runtime<StageHandler, S>,
}

impl<S> PipelineEngine<S>
where
    S: Store + EventStore + ProjectionStore + OutboxStore,
{
    /// Start building an engine over a store and validator set.
    pub fn builder(store: S, validators: ValidatorSet) -> PipelineBuilder<S> {
        PipelineBuilder {
            store,
            validators,
            publisher: None,
            config: RuntimeConfig::default(),
            stage_timeout: None,
        }
    }

    /// A facade handle for submitting commands and reading views.
    pub fn pipeline(&self) -> &ContentPipeline<S> {
        &self.pipeline
    }

    /// Run the effect and projection workers until `shutdown` completes.
    pub async fn run<F>(self, shutdown: F) -> crate::Result<()>
    where
        F: std::future::Future<Output = ()> + Send,
    {
        self.runtime.run(shutdown).await
    }
}

/// Builder for [`PipelineEngine`].
pub struct PipelineBuilder<S>
where
    S: Store + EventStore + ProjectionStore + OutboxStore,
{
    store: S,
    validators: ValidatorSet,
    publisher: Option<Arc<dyn Projection>>,
    config: RuntimeConfig,
    stage_timeout: Option<Duration>,
}

impl<S> PipelineBuilder<S>
where
    S: Store + EventStore + ProjectionStore + OutboxStore,
{
    /// Publish completion events to this sink.
    ///
    /// Without a sink, completed pipelines simply finish with no downstream
    /// event.
    pub fn completion_sink<K: CompletionSink>(mut self, sink: K) -> Self {
        self.publisher = Some(Arc::new(CompletionPublisher::new(sink, self.store.clone())));
        self
    }

    /// Set the runtime configuration.
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the per-stage validator timeout (default 60s).
    pub fn stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = Some(timeout);
        self
    }

    /// Assemble the engine.
    pub fn build(self) -> PipelineEngine<S> {
        let feed = Arc::new(StatusFeed::new());
        let view = Arc::new(ContentStatusView::new());

        let mut handler = StageHandler::new(self.validators);
        if let Some(timeout) = self.stage_timeout {
            handler = handler.with_stage_timeout(timeout);
        }

        let mut runtime = Runtime::new(self.store.clone(), handler, self.config)
            .with_projection(Arc::new(StatusNotifier::new(Arc::clone(&feed))))
            .with_projection(Arc::new(StatusViewProjection::new(Arc::clone(&view))));
        if let Some(publisher) = self.publisher {
            runtime = runtime.with_projection(publisher);
        }

        let pipeline = ContentPipeline::new(WorkflowService::new(self.store), feed, view);

        PipelineEngine { pipeline, runtime }
    }
}
