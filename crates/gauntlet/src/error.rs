//! Error types for gauntlet.

use thiserror::Error;

/// A `Result` alias with [`enum@Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in gauntlet operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Failed to serialize or deserialize event/effect data.
    ///
    /// This typically indicates a mismatch between the stored event format
    /// and the current `Workflow::Event` type definition.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failed to deserialize an event during replay.
    ///
    /// Includes context about which event failed: workflow type, workflow ID,
    /// and the event's sequence number (0-indexed position in the stream).
    #[error(
        "failed to deserialize event at sequence {sequence} for {workflow_type}:{workflow_id}: {source}"
    )]
    EventDeserialization {
        /// The workflow type identifier.
        workflow_type: &'static str,
        /// The workflow instance ID.
        workflow_id: String,
        /// The event's position in the stream (0-indexed).
        sequence: usize,
        /// The underlying deserialization error.
        #[source]
        source: serde_json::Error,
    },

    /// A pipeline already exists for this content id.
    ///
    /// `submit` is idempotency-keyed by content id; a second submit for the
    /// same id is rejected without touching the existing instance.
    #[error("pipeline already started for content {0}")]
    AlreadyStarted(String),

    /// No pipeline exists for this content id.
    #[error("pipeline not started for content {0}")]
    NotStarted(String),

    /// The command is not valid for the instance's current status.
    ///
    /// Also covers stale stage results delivered more than once by the
    /// at-least-once effect path; the effect worker acknowledges those
    /// instead of retrying.
    #[error("content {content_id} is in status {status}, command requires {required}")]
    InvalidState {
        /// The content id the command targeted.
        content_id: String,
        /// The instance's current status name.
        status: String,
        /// The status (or status set) the command requires.
        required: String,
    },

    /// Downstream completion publish failed.
    ///
    /// Surfaced from the completion projection so its worker retries with
    /// backoff; the engine's own progression is unaffected.
    #[error("completion publish failed: {0}")]
    CompletionPublish(String),
}

impl Error {
    /// Create an event deserialization error with context.
    pub fn event_deserialization(
        workflow_type: &'static str,
        workflow_id: impl Into<String>,
        sequence: usize,
        source: serde_json::Error,
    ) -> Self {
        Error::EventDeserialization {
            workflow_type,
            workflow_id: workflow_id.into(),
            sequence,
            source,
        }
    }

    /// Create an [`Error::InvalidState`] with context.
    pub fn invalid_state(
        content_id: impl Into<String>,
        status: impl Into<String>,
        required: impl Into<String>,
    ) -> Self {
        Error::InvalidState {
            content_id: content_id.into(),
            status: status.into(),
            required: required.into(),
        }
    }

    /// Returns `true` for command-precondition rejections.
    ///
    /// Rejections are synchronous, persist nothing, and are surfaced verbatim
    /// to the caller. The effect worker treats a rejection of a routed stage
    /// result as a duplicate delivery and acknowledges the effect.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Error::AlreadyStarted(_) | Error::NotStarted(_) | Error::InvalidState { .. }
        )
    }
}
