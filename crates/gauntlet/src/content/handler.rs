//! Effect handler that invokes validators for stage effects.

use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use tracing::{info, warn};

use super::stages::ValidatorSet;
use super::workflow::{ContentInput, ContentWorkflow, StageEffect, StageOutcome};
use crate::effect::{EffectContext, EffectHandler};

/// Default bound on a single validator invocation.
pub const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(60);

/// Executes [`StageEffect`]s by dispatching to the [`ValidatorSet`].
///
/// Each invocation runs under [`stage_timeout`](Self::with_stage_timeout);
/// a timeout or validator fault surfaces as a handler error, which the
/// effect worker retries with backoff. When the retry budget is exhausted
/// the handler's failover produces a `StageFailed` input, driving the
/// instance to FAILED.
pub struct StageHandler {
    validators: ValidatorSet,
    stage_timeout: Duration,
}

impl StageHandler {
    /// Create a handler with the default 60s stage timeout.
    pub fn new(validators: ValidatorSet) -> Self {
        Self {
            validators,
            stage_timeout: DEFAULT_STAGE_TIMEOUT,
        }
    }

    /// Override the per-stage invocation timeout.
    pub fn with_stage_timeout(mut self, stage_timeout: Duration) -> Self {
        self.stage_timeout = stage_timeout;
        self
    }

    async fn invoke(&self, effect: &StageEffect) -> anyhow::Result<StageOutcome> {
        let outcome = match effect {
            StageEffect::Detect {
                content_id,
                payload,
            } => {
                info!(content_id, "Detecting language");
                StageOutcome::Detected(self.validators.detector.detect(payload).await?)
            }
            StageEffect::Nlp { request, .. } => {
                StageOutcome::Nlp(self.validators.nlp.validate(request).await?)
            }
            StageEffect::Text { request, .. } => {
                StageOutcome::Text(self.validators.text.validate(request).await?)
            }
            StageEffect::Logo { request } => {
                StageOutcome::Logo(self.validators.logo.validate(request).await?)
            }
            StageEffect::Enterprise { request, .. } => {
                StageOutcome::Enterprise(self.validators.enterprise.validate(request).await?)
            }
            StageEffect::Aggregate { request } => {
                let result = self.validators.aggregator.aggregate(request).await?;
                info!(
                    content_id = %request.content_id,
                    overall_passed = result.overall_passed,
                    confidence = result.confidence,
                    "Aggregation finished"
                );
                StageOutcome::Aggregated(result)
            }
            StageEffect::Route { request } => {
                StageOutcome::Routed(self.validators.router.route(request).await?)
            }
        };
        Ok(outcome)
    }
}

#[async_trait]
impl EffectHandler for StageHandler {
    type Workflow = ContentWorkflow;
    type Error = anyhow::Error;

    async fn handle(
        &self,
        effect: &StageEffect,
        _ctx: &EffectContext,
    ) -> Result<Option<ContentInput>, Self::Error> {
        let stage = effect.stage();
        let outcome = tokio::time::timeout(self.stage_timeout, self.invoke(effect))
            .await
            .map_err(|_| {
                anyhow!(
                    "stage {} timed out after {:?}",
                    stage,
                    self.stage_timeout
                )
            })?
            // Flatten the chain into the message: the worker stringifies
            // this error for dead letters and failover inputs, and the
            // validator's root cause has to survive that.
            .map_err(|e| anyhow!("stage {} failed: {:#}", stage, e))?;

        Ok(Some(ContentInput::StageCompleted {
            content_id: effect.content_id().to_string(),
            outcome,
        }))
    }

    async fn on_exhausted(
        &self,
        effect: &StageEffect,
        ctx: &EffectContext,
        last_error: &str,
    ) -> Option<ContentInput> {
        warn!(
            content_id = effect.content_id(),
            stage = %effect.stage(),
            attempt = ctx.attempt,
            error = last_error,
            "Stage retries exhausted, failing pipeline"
        );
        Some(ContentInput::StageFailed {
            content_id: effect.content_id().to_string(),
            stage: effect.stage(),
            error: last_error.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use time::OffsetDateTime;
    use uuid::Uuid;

    use crate::content::stages::*;
    use crate::content::state::AggregatedResult;
    use crate::workflow::WorkflowRef;

    struct Stub;

    #[async_trait]
    impl LanguageDetector for Stub {
        async fn detect(&self, _payload: &str) -> anyhow::Result<DetectionResult> {
            Ok(DetectionResult {
                language: "en".to_string(),
                confidence: 0.99,
            })
        }
    }

    #[async_trait]
    impl NlpValidator for Stub {
        async fn validate(&self, _request: &NlpRequest) -> anyhow::Result<NlpResult> {
            Ok(NlpResult {
                category: "article".to_string(),
                passed: true,
                issues: vec![],
            })
        }
    }

    #[async_trait]
    impl TextValidator for Stub {
        async fn validate(&self, _request: &TextRequest) -> anyhow::Result<TextResult> {
            Ok(TextResult {
                passed: true,
                issues: vec![],
            })
        }
    }

    #[async_trait]
    impl LogoValidator for Stub {
        async fn validate(&self, _request: &LogoRequest) -> anyhow::Result<LogoResult> {
            Ok(LogoResult {
                passed: true,
                findings: vec![],
            })
        }
    }

    #[async_trait]
    impl EnterpriseValidator for Stub {
        async fn validate(
            &self,
            _request: &EnterpriseRequest,
        ) -> anyhow::Result<EnterpriseResult> {
            Ok(EnterpriseResult {
                passed: true,
                violations: vec![],
            })
        }
    }

    #[async_trait]
    impl ResultAggregator for Stub {
        async fn aggregate(
            &self,
            _request: &AggregationRequest,
        ) -> anyhow::Result<AggregatedResult> {
            Ok(AggregatedResult {
                overall_passed: true,
                confidence: 0.95,
                summary: String::new(),
            })
        }
    }

    #[async_trait]
    impl ComplianceRouter for Stub {
        async fn route(&self, _request: &RoutingRequest) -> anyhow::Result<RoutingDecision> {
            Ok(RoutingDecision {
                target: "channel-a".to_string(),
                compliant: true,
                notes: vec![],
            })
        }
    }

    struct FailingLogo;

    #[async_trait]
    impl LogoValidator for FailingLogo {
        async fn validate(&self, _request: &LogoRequest) -> anyhow::Result<LogoResult> {
            Err(anyhow!("logo service unavailable"))
        }
    }

    fn ctx() -> EffectContext {
        EffectContext::new(
            Uuid::nil(),
            WorkflowRef::new("content-validation", "c-1"),
            1,
            OffsetDateTime::UNIX_EPOCH,
        )
    }

    #[tokio::test]
    async fn handler_error_carries_validator_root_cause() {
        let stub = Arc::new(Stub);
        let validators = ValidatorSet {
            detector: stub.clone(),
            nlp: stub.clone(),
            text: stub.clone(),
            logo: Arc::new(FailingLogo),
            enterprise: stub.clone(),
            aggregator: stub.clone(),
            router: stub,
        };
        let handler = StageHandler::new(validators);

        let effect = StageEffect::Logo {
            request: LogoRequest {
                content_id: "c-1".to_string(),
                payload: "body".to_string(),
            },
        };
        let err = handler.handle(&effect, &ctx()).await.unwrap_err();

        // The worker stores err.to_string() in dead letters; the root cause
        // must be inside the top-level message, not a dropped source chain.
        let message = err.to_string();
        assert!(message.contains("logo-validator"), "{message}");
        assert!(message.contains("logo service unavailable"), "{message}");
    }
}
