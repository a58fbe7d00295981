//! Durable content-validation pipeline on an event-sourced workflow core.
//!
//! Gauntlet drives each piece of content through a fixed validation
//! sequence (language detection, four validator stages, aggregation, an
//! optional human-review pause, and routing) as one durable state machine
//! per content id:
//!
//! - **Pure functional core**: [`Workflow::evolve`] and [`Workflow::decide`]
//!   are deterministic with no side effects
//! - **Event sourcing**: state is reconstructed by replaying events
//! - **Transactional outbox**: stage invocations are enqueued atomically
//!   with the status that implies them, making progress crash-recoverable
//! - **Projections**: status notifications, the status view, and the
//!   downstream completion publisher all derive from the same event feed
//!
//! # Architecture
//!
//! ```text
//! submit/review ──► ContentPipeline ──► decide ──► events + stage effects
//!                                                     │           │
//!                                          event store │           │ outbox
//!                                                     ▼           ▼
//!                        projections (feed/view/push)      effect workers
//!                                                               │
//!                                        validators ◄───────────┘
//!                                             results routed back as inputs
//! ```
//!
//! # Example
//!
//! ```ignore
//! use gauntlet::{MemoryStore, PipelineEngine};
//!
//! let engine = PipelineEngine::builder(MemoryStore::new(), validators)
//!     .completion_sink(sink)
//!     .build();
//! let pipeline = engine.pipeline().clone();
//! tokio::spawn(engine.run(async { shutdown.await.ok(); }));
//!
//! pipeline.submit("content-1", "Hello world", metadata).await?;
//! let status = pipeline.status("content-1").await?;
//! ```
//!
//! # Design Documentation
//!
//! See `DESIGN.md` for architectural decisions.

pub mod content;
mod decider;
pub mod effect;
mod engine;
mod error;
mod projection;
pub mod runtime;
mod service;
pub mod store;
mod workflow;

pub use content::handler::StageHandler;
pub use content::notify::StatusFeed;
pub use content::push::{ChannelSink, CompletionSink, PushEvent};
pub use content::service::{ContentPipeline, StatusResponse, SubmitAck};
pub use content::stages::ValidatorSet;
pub use content::state::{
    AggregatedResult, ContentState, ContentStatus, ReviewDecision, ReviewVerdict, Stage,
    StageRecord, ValidatorStage, REVIEW_CONFIDENCE_THRESHOLD,
};
pub use content::view::{ContentStatusView, RowFilter, StatusRow};
pub use content::workflow::{ContentEvent, ContentInput, ContentWorkflow, StageEffect};
pub use effect::{EffectContext, EffectHandler, RetryPolicy};
pub use engine::{PipelineBuilder, PipelineEngine};
pub use error::{Error, Result};
pub use nonempty::NonEmpty;
pub use projection::{Projection, ProjectionConfig, ProjectionEvent, ProjectionWorker};
pub use runtime::{Runtime, RuntimeConfig};
pub use service::{Execution, WorkflowService};
pub use store::{
    BeginResult, DeadLetter, DeadLetterQuery, EventStore, MemoryStore, OutboxStore,
    ProjectionStore, Store, StoredEvent,
};
pub use workflow::{Decision, HasWorkflowId, Workflow, WorkflowId, WorkflowRef};
