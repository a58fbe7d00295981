//! Downstream completion publishing.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;

use super::workflow::{ContentEvent, ContentWorkflow};
use crate::error::{Error, Result};
use crate::projection::{BoxFuture, Projection, ProjectionEvent};
use crate::store::EventStore;
use crate::workflow::{Workflow, WorkflowId};

/// The downstream event published when a pipeline completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushEvent {
    pub content_id: String,
    pub target: String,
    pub payload: String,
}

impl PushEvent {
    /// The event's subject, used by consumers as the deduplication key.
    pub fn subject(&self) -> &str {
        &self.content_id
    }
}

/// Destination for completion events.
///
/// Delivery is at-least-once: the projection worker retries a failed publish
/// until it succeeds, so a sink may see the same event twice after a failure
/// mid-batch. Consumers dedupe by [`PushEvent::subject`].
#[async_trait]
pub trait CompletionSink: Send + Sync + 'static {
    async fn publish(&self, event: PushEvent) -> std::result::Result<(), String>;
}

/// In-process sink over an unbounded channel, the reference implementation.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<PushEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiver draining it.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PushEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl CompletionSink for ChannelSink {
    async fn publish(&self, event: PushEvent) -> std::result::Result<(), String> {
        self.tx
            .send(event)
            .map_err(|_| "completion channel closed".to_string())
    }
}

/// Projection publishing exactly one [`PushEvent`] per completed pipeline.
///
/// Only the `Routed` event (the COMPLETED transition) publishes; nothing is
/// emitted for FAILED or any intermediate status. The payload is captured
/// from the instance's `Submitted` event as the feed replays it, with the
/// event store as fallback: the projection checkpoint survives a restart but
/// the in-process cache does not, so a `Routed` event delivered to a fresh
/// process replays the instance's stream to recover the payload.
pub struct CompletionPublisher<K: CompletionSink, S: EventStore> {
    sink: K,
    store: S,
    payloads: Mutex<HashMap<String, String>>,
}

impl<K: CompletionSink, S: EventStore> CompletionPublisher<K, S> {
    pub fn new(sink: K, store: S) -> Self {
        Self {
            sink,
            store,
            payloads: Mutex::new(HashMap::new()),
        }
    }

    async fn payload_for(&self, content_id: &str) -> Result<String> {
        {
            let payloads = self.payloads.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(payload) = payloads.get(content_id) {
                return Ok(payload.clone());
            }
        }

        let events = self
            .store
            .fetch_stream_events(ContentWorkflow::TYPE, &WorkflowId::new(content_id))
            .await?;
        for stored in events {
            if let Ok(ContentEvent::Submitted { payload, .. }) =
                serde_json::from_value(stored.payload)
            {
                return Ok(payload);
            }
        }

        // A Routed event without a Submitted event means a corrupt stream.
        // Error so the worker retries instead of publishing a bogus payload.
        Err(Error::CompletionPublish(format!(
            "no submitted payload on record for {content_id}"
        )))
    }
}

impl<K: CompletionSink, S: EventStore> Projection for CompletionPublisher<K, S> {
    fn name(&self) -> &'static str {
        "completion-publisher"
    }

    fn handle<'a>(&'a self, event: ProjectionEvent) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if event.workflow_type != ContentWorkflow::TYPE {
                return Ok(());
            }

            let content_event: ContentEvent = serde_json::from_value(event.payload)?;
            match content_event {
                ContentEvent::Submitted {
                    content_id,
                    payload,
                    ..
                } => {
                    let mut payloads = self.payloads.lock().unwrap_or_else(|e| e.into_inner());
                    payloads.insert(content_id, payload);
                }
                ContentEvent::Routed { target } => {
                    let content_id = event.workflow_id.as_str().to_string();
                    let payload = self.payload_for(&content_id).await?;

                    let push = PushEvent {
                        content_id: content_id.clone(),
                        target,
                        payload,
                    };
                    info!(content_id = %content_id, target = %push.target, "Publishing completion");
                    self.sink
                        .publish(push)
                        .await
                        .map_err(Error::CompletionPublish)?;

                    let mut payloads = self.payloads.lock().unwrap_or_else(|e| e.into_inner());
                    payloads.remove(&content_id);
                }
                _ => {}
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::store::{BeginResult, MemoryStore, Store, UnitOfWork};

    async fn commit_events(store: &MemoryStore, content_id: &str, events: &[ContentEvent]) {
        let begin = store
            .begin(ContentWorkflow::TYPE, &WorkflowId::new(content_id))
            .await
            .unwrap();
        let BeginResult::Active { mut uow, .. } = begin else {
            panic!("instance unexpectedly completed");
        };
        uow.append_events(events.iter().cloned()).await.unwrap();
        uow.commit().await.unwrap();
    }

    fn projection_event(content_id: &str, sequence: i64, event: &ContentEvent) -> ProjectionEvent {
        ProjectionEvent {
            global_sequence: sequence,
            workflow_type: ContentWorkflow::TYPE.to_string(),
            workflow_id: crate::WorkflowId::new(content_id),
            sequence,
            payload: serde_json::to_value(event).unwrap(),
            created_at: time::OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[tokio::test]
    async fn publishes_once_on_completion_only() {
        let (sink, mut rx) = ChannelSink::new();
        let publisher = CompletionPublisher::new(sink, MemoryStore::new());

        let events = [
            ContentEvent::Submitted {
                content_id: "c-1".to_string(),
                payload: "Hello world content".to_string(),
                metadata: BTreeMap::new(),
            },
            ContentEvent::DetectionStarted,
            ContentEvent::LanguageDetected {
                language: "en".to_string(),
            },
            ContentEvent::RoutingStarted,
        ];
        for (i, event) in events.iter().enumerate() {
            publisher
                .handle(projection_event("c-1", i as i64 + 1, event))
                .await
                .unwrap();
        }
        assert!(rx.try_recv().is_err());

        publisher
            .handle(projection_event(
                "c-1",
                10,
                &ContentEvent::Routed {
                    target: "channel-a".to_string(),
                },
            ))
            .await
            .unwrap();

        let push = rx.try_recv().unwrap();
        assert_eq!(push.subject(), "c-1");
        assert_eq!(push.target, "channel-a");
        assert_eq!(push.payload, "Hello world content");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn failed_pipeline_publishes_nothing() {
        let (sink, mut rx) = ChannelSink::new();
        let publisher = CompletionPublisher::new(sink, MemoryStore::new());

        let events = [
            ContentEvent::Submitted {
                content_id: "c-1".to_string(),
                payload: "body".to_string(),
                metadata: BTreeMap::new(),
            },
            ContentEvent::Failed {
                stage: crate::content::state::Stage::Detect,
                error: "timed out".to_string(),
            },
        ];
        for (i, event) in events.iter().enumerate() {
            publisher
                .handle(projection_event("c-1", i as i64 + 1, event))
                .await
                .unwrap();
        }

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn failed_publish_surfaces_for_retry() {
        struct ClosedSink;

        #[async_trait]
        impl CompletionSink for ClosedSink {
            async fn publish(&self, _event: PushEvent) -> std::result::Result<(), String> {
                Err("downstream unavailable".to_string())
            }
        }

        let store = MemoryStore::new();
        commit_events(
            &store,
            "c-1",
            &[ContentEvent::Submitted {
                content_id: "c-1".to_string(),
                payload: "body".to_string(),
                metadata: BTreeMap::new(),
            }],
        )
        .await;

        let publisher = CompletionPublisher::new(ClosedSink, store);
        let err = publisher
            .handle(projection_event(
                "c-1",
                1,
                &ContentEvent::Routed {
                    target: "channel-a".to_string(),
                },
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CompletionPublish(_)));
    }

    #[tokio::test]
    async fn recovers_payload_from_stream_after_restart() {
        let store = MemoryStore::new();
        commit_events(
            &store,
            "c-1",
            &[
                ContentEvent::Submitted {
                    content_id: "c-1".to_string(),
                    payload: "durable body".to_string(),
                    metadata: BTreeMap::new(),
                },
                ContentEvent::DetectionStarted,
            ],
        )
        .await;

        // Fresh publisher with an empty in-process cache, as after a process
        // restart whose checkpoint already passed the Submitted event.
        let (sink, mut rx) = ChannelSink::new();
        let publisher = CompletionPublisher::new(sink, store);
        publisher
            .handle(projection_event(
                "c-1",
                10,
                &ContentEvent::Routed {
                    target: "channel-a".to_string(),
                },
            ))
            .await
            .unwrap();

        let push = rx.try_recv().unwrap();
        assert_eq!(push.payload, "durable body");
        assert_eq!(push.target, "channel-a");
    }

    #[tokio::test]
    async fn missing_submitted_payload_is_an_error_not_an_empty_push() {
        let (sink, mut rx) = ChannelSink::new();
        let publisher = CompletionPublisher::new(sink, MemoryStore::new());

        let err = publisher
            .handle(projection_event(
                "c-1",
                1,
                &ContentEvent::Routed {
                    target: "channel-a".to_string(),
                },
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CompletionPublish(_)));
        assert!(rx.try_recv().is_err());
    }
}
