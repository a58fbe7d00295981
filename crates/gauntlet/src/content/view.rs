//! Eventually consistent status view over all content instances.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::state::{
    AggregatedResult, ContentState, ContentStatus, ReviewDecision, StageRecord,
};
use super::workflow::{ContentEvent, ContentWorkflow};
use crate::error::Result;
use crate::projection::{BoxFuture, Projection, ProjectionEvent};
use crate::workflow::Workflow;

/// One row per content id in the status view: a full snapshot of the
/// instance, including the stage results and any review decision recorded
/// so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRow {
    pub content_id: String,
    pub status: ContentStatus,
    pub payload: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<StageRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregated: Option<AggregatedResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review: Option<ReviewDecision>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_target: Option<String>,
}

/// Row filter for live subscriptions.
#[derive(Debug, Clone, Copy, Default)]
pub struct RowFilter {
    status: Option<ContentStatus>,
}

impl RowFilter {
    /// Match every row.
    pub fn any() -> Self {
        Self::default()
    }

    /// Match rows with exactly this status (e.g. pending reviews).
    pub fn status(status: ContentStatus) -> Self {
        Self {
            status: Some(status),
        }
    }

    fn matches(&self, row: &StatusRow) -> bool {
        self.status.map_or(true, |s| row.status == s)
    }
}

struct ViewState {
    // Folded through the workflow's own evolve, so the view can only ever
    // hold states the engine itself produced.
    instances: HashMap<String, ContentState>,
    subscribers: Vec<(RowFilter, mpsc::UnboundedSender<StatusRow>)>,
}

/// Read model over the event feed: point queries plus filtered live streams.
///
/// Updated by its projection worker, so reads trail the engine by the
/// polling interval (eventually consistent, never ahead). Command answers
/// must come from [`ContentPipeline::status`], which replays the log.
///
/// [`ContentPipeline::status`]: super::service::ContentPipeline::status
pub struct ContentStatusView {
    state: Mutex<ViewState>,
}

impl ContentStatusView {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ViewState {
                instances: HashMap::new(),
                subscribers: Vec::new(),
            }),
        }
    }

    /// All rows, ordered by content id. An empty store yields an empty vec.
    pub fn rows(&self) -> Vec<StatusRow> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut rows: Vec<_> = state.instances.values().filter_map(row_of).collect();
        rows.sort_by(|a, b| a.content_id.cmp(&b.content_id));
        rows
    }

    /// The row for one content id, if the view has seen it.
    pub fn get(&self, content_id: &str) -> Option<StatusRow> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.instances.get(content_id).and_then(row_of)
    }

    /// Snapshot of matching rows plus a live stream of subsequent matching
    /// updates.
    ///
    /// The stream delivers the row's new value on every status change that
    /// matches the filter after the snapshot was taken.
    pub fn subscribe(
        &self,
        filter: RowFilter,
    ) -> (Vec<StatusRow>, mpsc::UnboundedReceiver<StatusRow>) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut snapshot: Vec<_> = state
            .instances
            .values()
            .filter_map(row_of)
            .filter(|row| filter.matches(row))
            .collect();
        snapshot.sort_by(|a, b| a.content_id.cmp(&b.content_id));

        let (tx, rx) = mpsc::unbounded_channel();
        state.subscribers.push((filter, tx));
        (snapshot, rx)
    }

    fn apply(&self, content_id: &str, event: ContentEvent) {
        let status_changed = event.status_after().is_some();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let instance = state
            .instances
            .entry(content_id.to_string())
            .or_default();
        *instance = ContentWorkflow::evolve(std::mem::take(instance), event);

        if !status_changed {
            return;
        }
        let Some(row) = state.instances.get(content_id).and_then(row_of) else {
            return;
        };

        // Fan out to live subscribers, dropping any that have hung up.
        state
            .subscribers
            .retain(|(filter, tx)| !filter.matches(&row) || tx.send(row.clone()).is_ok());
    }
}

impl Default for ContentStatusView {
    fn default() -> Self {
        Self::new()
    }
}

fn row_of(instance: &ContentState) -> Option<StatusRow> {
    Some(StatusRow {
        content_id: instance.content_id.clone(),
        status: instance.status?,
        payload: instance.payload.clone(),
        language: instance.language.clone(),
        results: instance.results.clone(),
        aggregated: instance.aggregated.clone(),
        review: instance.review.clone(),
        routing_target: instance.routing_target.clone(),
    })
}

/// Projection driving a [`ContentStatusView`] from the event feed.
pub struct StatusViewProjection {
    view: std::sync::Arc<ContentStatusView>,
}

impl StatusViewProjection {
    pub fn new(view: std::sync::Arc<ContentStatusView>) -> Self {
        Self { view }
    }
}

impl Projection for StatusViewProjection {
    fn name(&self) -> &'static str {
        "content-status-view"
    }

    fn handle<'a>(&'a self, event: ProjectionEvent) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if event.workflow_type != ContentWorkflow::TYPE {
                return Ok(());
            }
            let content_event: ContentEvent = serde_json::from_value(event.payload)?;
            self.view.apply(event.workflow_id.as_str(), content_event);
            Ok(())
        })
    }
}
