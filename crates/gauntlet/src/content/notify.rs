//! Per-content status notification feed.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::broadcast;
use tracing::debug;

use super::state::ContentStatus;
use super::workflow::{ContentEvent, ContentWorkflow};
use crate::error::Result;
use crate::projection::{BoxFuture, Projection, ProjectionEvent};
use crate::workflow::Workflow;

const CHANNEL_CAPACITY: usize = 64;

/// Broadcast hub of status changes, one channel per content id.
///
/// Subscribers receive every status change committed after they subscribe,
/// in commit order; there is no backlog replay. Delivery is best effort: a
/// subscriber that lags more than the channel capacity drops the oldest
/// notifications (standard broadcast semantics).
pub struct StatusFeed {
    channels: Mutex<HashMap<String, broadcast::Sender<ContentStatus>>>,
}

impl StatusFeed {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe to status changes for one content id.
    ///
    /// Works before the id exists; the first change after subscribing is the
    /// first notification received.
    pub fn subscribe(&self, content_id: &str) -> broadcast::Receiver<ContentStatus> {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels
            .entry(content_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Publish a status change for a content id.
    ///
    /// A send with no live subscribers is a no-op.
    pub fn publish(&self, content_id: &str, status: ContentStatus) {
        let channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(sender) = channels.get(content_id) {
            let _ = sender.send(status);
        }
    }
}

impl Default for StatusFeed {
    fn default() -> Self {
        Self::new()
    }
}

/// Projection feeding [`StatusFeed`] from committed events.
///
/// Publishes one notification per status-changing event, in global commit
/// order. Data-only events (`Aggregated`, `ReviewRecorded`) publish nothing;
/// the branch event committed with them carries the change.
pub struct StatusNotifier {
    feed: std::sync::Arc<StatusFeed>,
}

impl StatusNotifier {
    pub fn new(feed: std::sync::Arc<StatusFeed>) -> Self {
        Self { feed }
    }
}

impl Projection for StatusNotifier {
    fn name(&self) -> &'static str {
        "status-feed"
    }

    fn handle<'a>(&'a self, event: ProjectionEvent) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if event.workflow_type != ContentWorkflow::TYPE {
                return Ok(());
            }

            let content_event: ContentEvent = serde_json::from_value(event.payload)?;
            if let Some(status) = content_event.status_after() {
                debug!(content_id = %event.workflow_id, status = %status, "Status notification");
                self.feed.publish(event.workflow_id.as_str(), status);
            }
            Ok(())
        })
    }
}
