//! Effect worker for processing effects from the outbox.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use super::RuntimeConfig;
use crate::effect::{EffectContext, EffectHandler};
use crate::service::WorkflowService;
use crate::store::{EventStore, OutboxEffect, OutboxStore, Store};
use crate::workflow::Workflow;

/// Effect worker that polls the outbox and invokes the effect handler.
///
/// The worker runs in a loop, claiming effects one at a time and processing
/// them sequentially. Results from the handler route back into the workflow
/// as new inputs.
///
/// # Lifecycle
///
/// 1. Poll for an available effect at `effect_poll_interval`
/// 2. Claim the effect (lock lease for `effect_lock_duration`)
/// 3. Call the handler with the effect payload
/// 4. If the handler returns `Some(input)`, execute it as a new decision
/// 5. Mark processed, or record failure with backoff
/// 6. Repeat until shutdown signal
///
/// # Duplicate deliveries
///
/// At-least-once delivery means a routed result can arrive at the workflow
/// twice (lease expiry, routing committed but ack lost). The workflow
/// rejects the stale duplicate; the worker treats that rejection as success
/// and acknowledges the effect instead of retrying it.
pub(crate) struct EffectWorker<H, S>
where
    H: EffectHandler,
    S: Store + EventStore + OutboxStore,
{
    service: WorkflowService<H::Workflow, S>,
    handler: Arc<H>,
    config: RuntimeConfig,
    worker_id: String,
}

impl<H, S> EffectWorker<H, S>
where
    H: EffectHandler,
    <H::Workflow as Workflow>::Input: Send + Sync,
    <H::Workflow as Workflow>::Effect: serde::de::DeserializeOwned,
    S: Store + EventStore + OutboxStore,
{
    pub fn new(
        service: WorkflowService<H::Workflow, S>,
        handler: Arc<H>,
        config: RuntimeConfig,
        worker_id: String,
    ) -> Self {
        Self {
            service,
            handler,
            config,
            worker_id,
        }
    }

    /// Run the effect worker until shutdown signal.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut poll_interval = interval(self.config.effect_poll_interval);
        poll_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(worker_id = %self.worker_id, "Effect worker started");

        loop {
            tokio::select! {
                _ = poll_interval.tick() => {
                    if let Err(e) = self.process_one().await {
                        error!(error = %e, "Error processing effect");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(worker_id = %self.worker_id, "Effect worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Try to claim and process one effect.
    async fn process_one(&self) -> crate::Result<()> {
        let effect = self
            .service
            .store()
            .claim_effect(
                &self.worker_id,
                self.config.effect_lock_duration,
                self.config.retry_policy.max_attempts,
            )
            .await?;

        let Some(effect) = effect else {
            return Ok(()); // No effects available
        };

        debug!(
            effect_id = %effect.id,
            workflow = %effect.workflow,
            attempt = effect.attempts + 1,
            "Processing effect"
        );

        let ctx = EffectContext::new(
            effect.id,
            effect.workflow.clone(),
            effect.attempts + 1,
            effect.created_at,
        );

        let payload: <H::Workflow as Workflow>::Effect =
            match serde_json::from_value(effect.payload.clone()) {
                Ok(payload) => payload,
                Err(e) => {
                    // Undecodable payloads never succeed; dead-letter directly.
                    let error_msg = format!("Undecodable effect payload: {}", e);
                    warn!(effect_id = %effect.id, error = %error_msg, "Dead letter");
                    self.service
                        .store()
                        .record_permanent_failure(
                            effect.id,
                            &error_msg,
                            self.config.retry_policy.max_attempts,
                        )
                        .await?;
                    return Ok(());
                }
            };

        match self.handler.handle(&payload, &ctx).await {
            Ok(maybe_input) => {
                if let Some(input) = maybe_input {
                    debug!(
                        effect_id = %effect.id,
                        workflow = %effect.workflow,
                        "Routing effect result as new input"
                    );
                    // NOTE: not atomic with `mark_processed`; failures lead to
                    // a redelivery that the workflow must reject as stale.
                    if let Err(e) = self.service.execute(&input).await {
                        if e.is_rejection() {
                            // Duplicate delivery of an already-applied result.
                            debug!(
                                effect_id = %effect.id,
                                error = %e,
                                "Stale effect result rejected, acknowledging"
                            );
                        } else {
                            let error_msg = format!("Failed to route result: {}", e);
                            warn!(effect_id = %effect.id, error = %error_msg, "Result routing failed");
                            self.record_failure_with_backoff(&effect, &error_msg)
                                .await?;
                            return Ok(());
                        }
                    }
                }

                self.service.store().mark_processed(effect.id).await?;
                debug!(effect_id = %effect.id, "Effect processed successfully");
            }
            Err(effect_error) => {
                let error_msg = effect_error.to_string();
                let new_attempts = effect.attempts + 1;

                if new_attempts >= self.config.retry_policy.max_attempts {
                    warn!(
                        effect_id = %effect.id,
                        error = %error_msg,
                        attempts = new_attempts,
                        max_attempts = self.config.retry_policy.max_attempts,
                        "Effect exceeded max retries, moving to dead letter"
                    );
                    self.route_exhausted(&payload, &ctx, &error_msg).await;
                    self.service
                        .store()
                        .record_permanent_failure(
                            effect.id,
                            &error_msg,
                            self.config.retry_policy.max_attempts,
                        )
                        .await?;
                } else {
                    debug!(
                        effect_id = %effect.id,
                        error = %error_msg,
                        attempts = new_attempts,
                        "Effect failed, will retry"
                    );
                    self.record_failure_with_backoff(&effect, &error_msg)
                        .await?;
                }
            }
        }

        Ok(())
    }

    /// Route the handler's failover input after the retry budget is spent.
    ///
    /// The failover is best-effort: if routing fails or the workflow rejects
    /// it, the dead letter still records the exhaustion.
    async fn route_exhausted(
        &self,
        payload: &<H::Workflow as Workflow>::Effect,
        ctx: &EffectContext,
        last_error: &str,
    ) {
        let Some(input) = self.handler.on_exhausted(payload, ctx, last_error).await else {
            return;
        };

        if let Err(e) = self.service.execute(&input).await {
            if e.is_rejection() {
                debug!(effect_id = %ctx.effect_id, error = %e, "Failover input rejected");
            } else {
                error!(effect_id = %ctx.effect_id, error = %e, "Failed to route failover input");
            }
        }
    }

    /// Record a failure with exponential backoff delay.
    async fn record_failure_with_backoff(
        &self,
        effect: &OutboxEffect,
        error: &str,
    ) -> crate::Result<()> {
        let backoff = self
            .config
            .retry_policy
            .backoff_duration(effect.attempts + 1);
        self.service
            .store()
            .record_failure(effect.id, error, backoff)
            .await
    }
}
