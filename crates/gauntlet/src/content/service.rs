//! Boundary facade for the content pipeline.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::info;

use super::notify::StatusFeed;
use super::state::{ContentStatus, ReviewDecision};
use super::view::{ContentStatusView, RowFilter, StatusRow};
use super::workflow::{ContentInput, ContentWorkflow};
use crate::error::{Error, Result};
use crate::service::{Execution, WorkflowService};
use crate::store::{EventStore, Store};
use crate::workflow::WorkflowId;

/// Acknowledgement returned from [`ContentPipeline::submit`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitAck {
    pub content_id: String,
    pub status: ContentStatus,
}

/// Answer to [`ContentPipeline::status`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub content_id: String,
    pub status: ContentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_target: Option<String>,
}

/// The boundary operations of the pipeline.
///
/// Commands (`submit`, `status`, `review`) go against the event store, the
/// source of truth: `status` replays the log and reflects every committed
/// transition immediately. The read surface (`rows`, `subscribe`,
/// `subscribe_status`) is served from projections and trails commits by the
/// projection polling interval.
pub struct ContentPipeline<S>
where
    S: Store + EventStore,
{
    service: WorkflowService<ContentWorkflow, S>,
    feed: Arc<StatusFeed>,
    view: Arc<ContentStatusView>,
}

impl<S> Clone for ContentPipeline<S>
where
    S: Store + EventStore,
{
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            feed: Arc::clone(&self.feed),
            view: Arc::clone(&self.view),
        }
    }
}

impl<S> ContentPipeline<S>
where
    S: Store + EventStore,
{
    pub(crate) fn new(
        service: WorkflowService<ContentWorkflow, S>,
        feed: Arc<StatusFeed>,
        view: Arc<ContentStatusView>,
    ) -> Self {
        Self {
            service,
            feed,
            view,
        }
    }

    /// Start validation for new content.
    ///
    /// Idempotency-keyed by `content_id`: a second submit for the same id
    /// returns [`Error::AlreadyStarted`] without touching the running
    /// instance. On success the instance has already moved on to detection;
    /// the ack reports the RECEIVED admission status.
    pub async fn submit(
        &self,
        content_id: impl Into<String>,
        payload: impl Into<String>,
        metadata: BTreeMap<String, String>,
    ) -> Result<SubmitAck> {
        let content_id = content_id.into();
        info!(content_id = %content_id, "Submitting content for validation");

        match self
            .service
            .execute(&ContentInput::Submit {
                content_id: content_id.clone(),
                payload: payload.into(),
                metadata,
            })
            .await?
        {
            Execution::Applied => Ok(SubmitAck {
                content_id,
                status: ContentStatus::Received,
            }),
            // Terminal instances short-circuit before decide runs.
            Execution::SkippedTerminal => Err(Error::AlreadyStarted(content_id)),
        }
    }

    /// Current status of an instance, replayed from the event store.
    pub async fn status(&self, content_id: &str) -> Result<StatusResponse> {
        let state = self
            .service
            .load_state(&WorkflowId::new(content_id))
            .await?
            .ok_or_else(|| Error::NotStarted(content_id.to_string()))?;

        let status = state
            .status
            .ok_or_else(|| Error::NotStarted(content_id.to_string()))?;

        Ok(StatusResponse {
            content_id: content_id.to_string(),
            status,
            routing_target: state.routing_target,
        })
    }

    /// Record a human review decision for paused content.
    ///
    /// Rejected with [`Error::NotStarted`] or [`Error::InvalidState`] unless
    /// the instance is AWAITING_REVIEW. On success routing resumes with the
    /// decision attached.
    pub async fn review(&self, content_id: &str, decision: ReviewDecision) -> Result<()> {
        info!(
            content_id,
            reviewer = %decision.reviewer,
            verdict = ?decision.verdict,
            "Submitting review decision"
        );
        match self
            .service
            .execute(&ContentInput::SubmitReview {
                content_id: content_id.to_string(),
                decision,
            })
            .await?
        {
            Execution::Applied => Ok(()),
            Execution::SkippedTerminal => {
                let status = self.status(content_id).await?.status;
                Err(Error::invalid_state(
                    content_id,
                    status.as_str(),
                    ContentStatus::AwaitingReview.as_str(),
                ))
            }
        }
    }

    /// Live stream of status changes for one content id.
    ///
    /// No backlog: only changes committed after subscribing are delivered.
    pub fn subscribe_status(&self, content_id: &str) -> broadcast::Receiver<ContentStatus> {
        self.feed.subscribe(content_id)
    }

    /// All view rows, ordered by content id.
    pub fn rows(&self) -> Vec<StatusRow> {
        self.view.rows()
    }

    /// Snapshot of matching view rows plus a live stream of matching updates.
    pub fn subscribe(
        &self,
        filter: RowFilter,
    ) -> (Vec<StatusRow>, mpsc::UnboundedReceiver<StatusRow>) {
        self.view.subscribe(filter)
    }
}
