//! The content-validation workflow: inputs, events, effects, decide/evolve.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::stages::{
    AggregationRequest, DetectionResult, EnterpriseRequest, EnterpriseResult, LogoRequest,
    LogoResult, NlpRequest, NlpResult, RoutingDecision, RoutingRequest, TextRequest, TextResult,
};
use super::state::{
    AggregatedResult, ContentState, ContentStatus, ReviewDecision, Stage, StageRecord,
    ValidatorStage,
};
use crate::error::{Error, Result};
use crate::workflow::{Decision, HasWorkflowId, Workflow, WorkflowId};

/// Inputs driving the pipeline: boundary commands plus routed stage results.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentInput {
    /// Start validation for a new content id.
    Submit {
        content_id: String,
        payload: String,
        metadata: BTreeMap<String, String>,
    },
    /// A stage finished; routed back by the effect worker.
    StageCompleted {
        content_id: String,
        outcome: StageOutcome,
    },
    /// A stage exhausted its retry budget; failover to FAILED.
    StageFailed {
        content_id: String,
        stage: Stage,
        error: String,
    },
    /// Human review decision for paused content.
    SubmitReview {
        content_id: String,
        decision: ReviewDecision,
    },
}

impl HasWorkflowId for ContentInput {
    fn workflow_id(&self) -> WorkflowId {
        match self {
            ContentInput::Submit { content_id, .. }
            | ContentInput::StageCompleted { content_id, .. }
            | ContentInput::StageFailed { content_id, .. }
            | ContentInput::SubmitReview { content_id, .. } => WorkflowId::new(content_id),
        }
    }
}

/// Typed result of a completed stage, matched against the expected status.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "stage")]
pub enum StageOutcome {
    Detected(DetectionResult),
    Nlp(NlpResult),
    Text(TextResult),
    Logo(LogoResult),
    Enterprise(EnterpriseResult),
    Aggregated(AggregatedResult),
    Routed(RoutingDecision),
}

impl StageOutcome {
    /// The status an instance must hold for this outcome to be applicable.
    fn required_status(&self) -> ContentStatus {
        match self {
            StageOutcome::Detected(_) => ContentStatus::Detecting,
            StageOutcome::Nlp(_) => ContentStatus::Nlp,
            StageOutcome::Text(_) => ContentStatus::ValidatingText,
            StageOutcome::Logo(_) => ContentStatus::ValidatingLogo,
            StageOutcome::Enterprise(_) => ContentStatus::ValidatingEnterprise,
            StageOutcome::Aggregated(_) => ContentStatus::Aggregating,
            StageOutcome::Routed(_) => ContentStatus::Routing,
        }
    }
}

/// Facts recorded to the event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentEvent {
    Submitted {
        content_id: String,
        payload: String,
        metadata: BTreeMap<String, String>,
    },
    DetectionStarted,
    LanguageDetected {
        language: String,
    },
    StageValidated {
        stage: ValidatorStage,
        result: StageRecord,
    },
    Aggregated {
        result: AggregatedResult,
    },
    ReviewRequested,
    RoutingStarted,
    ReviewRecorded {
        decision: ReviewDecision,
    },
    Routed {
        target: String,
    },
    Failed {
        stage: Stage,
        error: String,
    },
}

impl ContentEvent {
    /// The status this event moves the instance to, if it changes status.
    ///
    /// `Aggregated` and `ReviewRecorded` carry data only; the branch event
    /// committed alongside them (`ReviewRequested`, `RoutingStarted`) carries
    /// the status change. Used by the notification and view projections.
    pub fn status_after(&self) -> Option<ContentStatus> {
        match self {
            ContentEvent::Submitted { .. } => Some(ContentStatus::Received),
            ContentEvent::DetectionStarted => Some(ContentStatus::Detecting),
            ContentEvent::LanguageDetected { .. } => Some(ContentStatus::Nlp),
            ContentEvent::StageValidated { stage, .. } => Some(stage.status_after()),
            ContentEvent::Aggregated { .. } => None,
            ContentEvent::ReviewRequested => Some(ContentStatus::AwaitingReview),
            ContentEvent::RoutingStarted => Some(ContentStatus::Routing),
            ContentEvent::ReviewRecorded { .. } => None,
            ContentEvent::Routed { .. } => Some(ContentStatus::Completed),
            ContentEvent::Failed { .. } => Some(ContentStatus::Failed),
        }
    }
}

/// Stage invocations enqueued to the outbox.
///
/// Each effect embeds the immutable request built from state at decision
/// time, so a redelivered effect re-invokes the validator with the identical
/// request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StageEffect {
    Detect {
        content_id: String,
        payload: String,
    },
    Nlp {
        content_id: String,
        request: NlpRequest,
    },
    Text {
        content_id: String,
        request: TextRequest,
    },
    Logo {
        request: LogoRequest,
    },
    Enterprise {
        content_id: String,
        request: EnterpriseRequest,
    },
    Aggregate {
        request: AggregationRequest,
    },
    Route {
        request: RoutingRequest,
    },
}

impl StageEffect {
    /// The content id this effect belongs to.
    pub fn content_id(&self) -> &str {
        match self {
            StageEffect::Detect { content_id, .. }
            | StageEffect::Nlp { content_id, .. }
            | StageEffect::Text { content_id, .. }
            | StageEffect::Enterprise { content_id, .. } => content_id,
            StageEffect::Logo { request } => &request.content_id,
            StageEffect::Aggregate { request } => &request.content_id,
            StageEffect::Route { request } => &request.content_id,
        }
    }

    /// The stage this effect invokes, for failure attribution.
    pub fn stage(&self) -> Stage {
        match self {
            StageEffect::Detect { .. } => Stage::Detect,
            StageEffect::Nlp { .. } => Stage::Validator(ValidatorStage::Nlp),
            StageEffect::Text { .. } => Stage::Validator(ValidatorStage::Text),
            StageEffect::Logo { .. } => Stage::Validator(ValidatorStage::Logo),
            StageEffect::Enterprise { .. } => Stage::Validator(ValidatorStage::Enterprise),
            StageEffect::Aggregate { .. } => Stage::Aggregate,
            StageEffect::Route { .. } => Stage::Route,
        }
    }
}

/// Event-sourced workflow for the content-validation pipeline.
pub struct ContentWorkflow;

impl ContentWorkflow {
    fn decide_stage_completed(
        state: &ContentState,
        content_id: &str,
        outcome: &StageOutcome,
    ) -> Result<Decision<ContentEvent, StageEffect>> {
        let required = outcome.required_status();
        let current = require_started(state, content_id)?;
        if current != required {
            // Stale or out-of-order stage result (duplicate delivery).
            return Err(Error::invalid_state(
                content_id,
                current.as_str(),
                required.as_str(),
            ));
        }

        let decision = match outcome {
            StageOutcome::Detected(result) => Decision::event(ContentEvent::LanguageDetected {
                language: result.language.clone(),
            })
            .with_effect(StageEffect::Nlp {
                content_id: content_id.to_string(),
                request: NlpRequest {
                    payload: state.payload.clone(),
                    language: result.language.clone(),
                },
            }),

            StageOutcome::Nlp(result) => {
                let record = StageRecord {
                    stage_id: ValidatorStage::Nlp.validator_id().to_string(),
                    passed: result.passed,
                    issues: result.issues.clone(),
                };
                Decision::event(ContentEvent::StageValidated {
                    stage: ValidatorStage::Nlp,
                    result: record,
                })
                .with_effect(StageEffect::Text {
                    content_id: content_id.to_string(),
                    request: TextRequest {
                        payload: state.payload.clone(),
                        language: state.language.clone().unwrap_or_default(),
                    },
                })
            }

            StageOutcome::Text(result) => {
                let record = StageRecord {
                    stage_id: ValidatorStage::Text.validator_id().to_string(),
                    passed: result.passed,
                    issues: result.issues.clone(),
                };
                Decision::event(ContentEvent::StageValidated {
                    stage: ValidatorStage::Text,
                    result: record,
                })
                .with_effect(StageEffect::Logo {
                    request: LogoRequest {
                        content_id: content_id.to_string(),
                        payload: state.payload.clone(),
                    },
                })
            }

            StageOutcome::Logo(result) => {
                let record = StageRecord {
                    stage_id: ValidatorStage::Logo.validator_id().to_string(),
                    passed: result.passed,
                    issues: result.findings.clone(),
                };
                Decision::event(ContentEvent::StageValidated {
                    stage: ValidatorStage::Logo,
                    result: record,
                })
                .with_effect(StageEffect::Enterprise {
                    content_id: content_id.to_string(),
                    request: EnterpriseRequest {
                        payload: state.payload.clone(),
                        metadata: state.metadata.clone(),
                    },
                })
            }

            StageOutcome::Enterprise(result) => {
                let record = StageRecord {
                    stage_id: ValidatorStage::Enterprise.validator_id().to_string(),
                    passed: result.passed,
                    issues: result.violations.clone(),
                };
                // The aggregation request carries all four results, including
                // the one recorded by this decision.
                let mut results = state.results.clone();
                results.push(record.clone());
                Decision::event(ContentEvent::StageValidated {
                    stage: ValidatorStage::Enterprise,
                    result: record,
                })
                .with_effect(StageEffect::Aggregate {
                    request: AggregationRequest {
                        content_id: content_id.to_string(),
                        results,
                    },
                })
            }

            StageOutcome::Aggregated(result) => {
                let aggregated = ContentEvent::Aggregated {
                    result: result.clone(),
                };
                if result.requires_review() {
                    // Pause: no effect, no timer. Resumes only via review.
                    Decision::event(aggregated).with_event(ContentEvent::ReviewRequested)
                } else {
                    Decision::event(aggregated)
                        .with_event(ContentEvent::RoutingStarted)
                        .with_effect(StageEffect::Route {
                            request: RoutingRequest {
                                content_id: content_id.to_string(),
                                aggregated: result.clone(),
                                review: None,
                            },
                        })
                }
            }

            StageOutcome::Routed(decision) => Decision::event(ContentEvent::Routed {
                target: decision.target.clone(),
            }),
        };

        Ok(decision)
    }
}

impl Workflow for ContentWorkflow {
    type State = ContentState;
    type Input = ContentInput;
    type Event = ContentEvent;
    type Effect = StageEffect;

    const TYPE: &'static str = "content-validation";

    fn evolve(mut state: ContentState, event: ContentEvent) -> ContentState {
        let status_after = event.status_after();

        match event {
            ContentEvent::Submitted {
                content_id,
                payload,
                metadata,
            } => {
                state.content_id = content_id;
                state.payload = payload;
                state.metadata = metadata;
            }
            ContentEvent::LanguageDetected { language } => {
                state.language = Some(language);
            }
            ContentEvent::StageValidated { result, .. } => {
                state.results.push(result);
            }
            ContentEvent::Aggregated { result } => {
                state.aggregated = Some(result);
            }
            ContentEvent::ReviewRecorded { decision } => {
                state.review = Some(decision);
            }
            ContentEvent::Routed { target } => {
                state.routing_target = Some(target);
            }
            ContentEvent::DetectionStarted
            | ContentEvent::ReviewRequested
            | ContentEvent::RoutingStarted
            | ContentEvent::Failed { .. } => {}
        }

        if let Some(status) = status_after {
            state.status = Some(status);
        }
        state
    }

    fn decide(
        _now: OffsetDateTime,
        state: &ContentState,
        input: &ContentInput,
    ) -> Result<Decision<ContentEvent, StageEffect>> {
        match input {
            ContentInput::Submit {
                content_id,
                payload,
                metadata,
            } => {
                if state.status.is_some() {
                    return Err(Error::AlreadyStarted(content_id.clone()));
                }
                Ok(Decision::event(ContentEvent::Submitted {
                    content_id: content_id.clone(),
                    payload: payload.clone(),
                    metadata: metadata.clone(),
                })
                .with_event(ContentEvent::DetectionStarted)
                .with_effect(StageEffect::Detect {
                    content_id: content_id.clone(),
                    payload: payload.clone(),
                }))
            }

            ContentInput::StageCompleted {
                content_id,
                outcome,
            } => Self::decide_stage_completed(state, content_id, outcome),

            ContentInput::StageFailed {
                content_id,
                stage,
                error,
            } => {
                let current = require_started(state, content_id)?;
                // Only the stage the instance is actually in may fail it.
                // Anything else is a stale redelivery for a stage that has
                // since completed, or a report against a terminal instance.
                let required = stage.active_status();
                if current != required {
                    return Err(Error::invalid_state(
                        content_id,
                        current.as_str(),
                        required.as_str(),
                    ));
                }
                Ok(Decision::event(ContentEvent::Failed {
                    stage: *stage,
                    error: error.clone(),
                }))
            }

            ContentInput::SubmitReview {
                content_id,
                decision,
            } => {
                let current = require_started(state, content_id)?;
                if current != ContentStatus::AwaitingReview {
                    return Err(Error::invalid_state(
                        content_id,
                        current.as_str(),
                        ContentStatus::AwaitingReview.as_str(),
                    ));
                }
                let Some(aggregated) = state.aggregated.clone() else {
                    // Unreachable if events are consistent; reject rather
                    // than route without a verdict.
                    return Err(Error::invalid_state(
                        content_id,
                        current.as_str(),
                        "AWAITING_REVIEW with aggregated result",
                    ));
                };
                Ok(Decision::event(ContentEvent::ReviewRecorded {
                    decision: decision.clone(),
                })
                .with_event(ContentEvent::RoutingStarted)
                .with_effect(StageEffect::Route {
                    request: RoutingRequest {
                        content_id: content_id.clone(),
                        aggregated,
                        review: Some(decision.clone()),
                    },
                }))
            }
        }
    }

    fn is_terminal(state: &ContentState) -> bool {
        state.is_terminal()
    }
}

fn require_started(state: &ContentState, content_id: &str) -> Result<ContentStatus> {
    state
        .status
        .ok_or_else(|| Error::NotStarted(content_id.to_string()))
}
