//! Content pipeline state and status types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Confidence floor below which an aggregated result pauses for human review.
pub const REVIEW_CONFIDENCE_THRESHOLD: f64 = 0.8;

/// Pipeline status, in processing order.
///
/// Progression is monotone through the validation sequence; there are no
/// backward edges, and AWAITING_REVIEW resumes forward into ROUTING.
/// FAILED is reachable from any non-terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContentStatus {
    Received,
    Detecting,
    Nlp,
    ValidatingText,
    ValidatingLogo,
    ValidatingEnterprise,
    Aggregating,
    AwaitingReview,
    Routing,
    Completed,
    Failed,
}

impl ContentStatus {
    /// The wire name of this status (SCREAMING_SNAKE_CASE).
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentStatus::Received => "RECEIVED",
            ContentStatus::Detecting => "DETECTING",
            ContentStatus::Nlp => "NLP",
            ContentStatus::ValidatingText => "VALIDATING_TEXT",
            ContentStatus::ValidatingLogo => "VALIDATING_LOGO",
            ContentStatus::ValidatingEnterprise => "VALIDATING_ENTERPRISE",
            ContentStatus::Aggregating => "AGGREGATING",
            ContentStatus::AwaitingReview => "AWAITING_REVIEW",
            ContentStatus::Routing => "ROUTING",
            ContentStatus::Completed => "COMPLETED",
            ContentStatus::Failed => "FAILED",
        }
    }

    /// Returns `true` for COMPLETED and FAILED.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ContentStatus::Completed | ContentStatus::Failed)
    }
}

impl std::fmt::Display for ContentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The four validator stages executed between detection and aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidatorStage {
    Nlp,
    Text,
    Logo,
    Enterprise,
}

impl ValidatorStage {
    /// Stage identifier recorded in [`StageRecord::stage_id`].
    pub fn validator_id(&self) -> &'static str {
        match self {
            ValidatorStage::Nlp => "nlp-validator",
            ValidatorStage::Text => "text-validator",
            ValidatorStage::Logo => "logo-validator",
            ValidatorStage::Enterprise => "enterprise-validator",
        }
    }

    /// The status the pipeline moves to after this stage's result is recorded.
    pub fn status_after(&self) -> ContentStatus {
        match self {
            ValidatorStage::Nlp => ContentStatus::ValidatingText,
            ValidatorStage::Text => ContentStatus::ValidatingLogo,
            ValidatorStage::Logo => ContentStatus::ValidatingEnterprise,
            ValidatorStage::Enterprise => ContentStatus::Aggregating,
        }
    }
}

impl std::fmt::Display for ValidatorStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.validator_id())
    }
}

/// All pipeline stages, for failure attribution in `Failed` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Detect,
    Validator(ValidatorStage),
    Aggregate,
    Route,
}

impl Stage {
    /// The status the pipeline holds while this stage is in flight.
    ///
    /// A failure report for a stage is only valid while the instance is
    /// actually in that stage; anything else is a stale redelivery.
    pub fn active_status(&self) -> ContentStatus {
        match self {
            Stage::Detect => ContentStatus::Detecting,
            Stage::Validator(ValidatorStage::Nlp) => ContentStatus::Nlp,
            Stage::Validator(ValidatorStage::Text) => ContentStatus::ValidatingText,
            Stage::Validator(ValidatorStage::Logo) => ContentStatus::ValidatingLogo,
            Stage::Validator(ValidatorStage::Enterprise) => ContentStatus::ValidatingEnterprise,
            Stage::Aggregate => ContentStatus::Aggregating,
            Stage::Route => ContentStatus::Routing,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Detect => f.write_str("detect-language"),
            Stage::Validator(stage) => f.write_str(stage.validator_id()),
            Stage::Aggregate => f.write_str("aggregate"),
            Stage::Route => f.write_str("route"),
        }
    }
}

/// Outcome of one validator stage, appended to [`ContentState::results`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    /// Which validator produced this result.
    pub stage_id: String,
    /// Whether the stage passed.
    pub passed: bool,
    /// Issues found, empty when passed cleanly.
    pub issues: Vec<String>,
}

/// Consolidated verdict across all stage results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResult {
    /// Whether all stages passed overall.
    pub overall_passed: bool,
    /// Aggregator confidence in the verdict, in `[0, 1]`.
    pub confidence: f64,
    /// Brief summary, including failures if any.
    pub summary: String,
}

impl AggregatedResult {
    /// The review branch condition.
    ///
    /// A failed verdict or a confidence strictly below
    /// [`REVIEW_CONFIDENCE_THRESHOLD`] pauses for human review; exactly 0.8
    /// with an overall pass routes automatically.
    pub fn requires_review(&self) -> bool {
        !self.overall_passed || self.confidence < REVIEW_CONFIDENCE_THRESHOLD
    }
}

/// A reviewer's verdict on paused content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewVerdict {
    Approve,
    Reject,
}

/// Human review decision recorded while AWAITING_REVIEW.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewDecision {
    #[serde(rename = "decision")]
    pub verdict: ReviewVerdict,
    pub reviewer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Replayed state of one content pipeline instance.
///
/// `status: None` means the instance has never been started. All other
/// fields accrete monotonically as events are applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentState {
    pub content_id: String,
    pub payload: String,
    pub metadata: BTreeMap<String, String>,
    pub language: Option<String>,
    pub results: Vec<StageRecord>,
    pub aggregated: Option<AggregatedResult>,
    pub review: Option<ReviewDecision>,
    pub status: Option<ContentStatus>,
    pub routing_target: Option<String>,
}

impl ContentState {
    /// Returns `true` once the instance has reached COMPLETED or FAILED.
    pub fn is_terminal(&self) -> bool {
        self.status.map_or(false, |s| s.is_terminal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_wire_names() {
        assert_eq!(ContentStatus::Received.as_str(), "RECEIVED");
        assert_eq!(ContentStatus::Nlp.as_str(), "NLP");
        assert_eq!(ContentStatus::ValidatingEnterprise.as_str(), "VALIDATING_ENTERPRISE");
        assert_eq!(ContentStatus::AwaitingReview.as_str(), "AWAITING_REVIEW");

        let json = serde_json::to_string(&ContentStatus::ValidatingText).unwrap();
        assert_eq!(json, "\"VALIDATING_TEXT\"");
        let parsed: ContentStatus = serde_json::from_str("\"AWAITING_REVIEW\"").unwrap();
        assert_eq!(parsed, ContentStatus::AwaitingReview);
    }

    #[test]
    fn terminal_statuses() {
        assert!(ContentStatus::Completed.is_terminal());
        assert!(ContentStatus::Failed.is_terminal());
        assert!(!ContentStatus::AwaitingReview.is_terminal());
        assert!(!ContentStatus::Received.is_terminal());
    }

    #[test]
    fn validator_stage_order() {
        assert_eq!(ValidatorStage::Nlp.status_after(), ContentStatus::ValidatingText);
        assert_eq!(ValidatorStage::Text.status_after(), ContentStatus::ValidatingLogo);
        assert_eq!(ValidatorStage::Logo.status_after(), ContentStatus::ValidatingEnterprise);
        assert_eq!(ValidatorStage::Enterprise.status_after(), ContentStatus::Aggregating);
    }

    #[test]
    fn stage_active_statuses() {
        assert_eq!(Stage::Detect.active_status(), ContentStatus::Detecting);
        assert_eq!(
            Stage::Validator(ValidatorStage::Nlp).active_status(),
            ContentStatus::Nlp
        );
        assert_eq!(
            Stage::Validator(ValidatorStage::Enterprise).active_status(),
            ContentStatus::ValidatingEnterprise
        );
        assert_eq!(Stage::Aggregate.active_status(), ContentStatus::Aggregating);
        assert_eq!(Stage::Route.active_status(), ContentStatus::Routing);
    }

    #[test]
    fn review_decision_wire_shape() {
        let decision = ReviewDecision {
            verdict: ReviewVerdict::Approve,
            reviewer: "reviewer-1".to_string(),
            note: None,
        };

        let value = serde_json::to_value(&decision).unwrap();
        assert_eq!(value["decision"], "approve");
        assert_eq!(value["reviewer"], "reviewer-1");
        assert!(value.get("verdict").is_none());

        let parsed: ReviewDecision = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, decision);
    }

    #[test]
    fn review_branch_is_exact() {
        let passing = AggregatedResult {
            overall_passed: true,
            confidence: 0.8,
            summary: String::new(),
        };
        assert!(!passing.requires_review());

        let low_confidence = AggregatedResult {
            confidence: 0.79999,
            ..passing.clone()
        };
        assert!(low_confidence.requires_review());

        let failed = AggregatedResult {
            overall_passed: false,
            confidence: 1.0,
            summary: String::new(),
        };
        assert!(failed.requires_review());
    }

    #[test]
    fn default_state_is_unstarted() {
        let state = ContentState::default();
        assert!(state.status.is_none());
        assert!(!state.is_terminal());
        assert!(state.results.is_empty());
    }
}
