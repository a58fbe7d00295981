//! Shared harness for the pipeline integration tests.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use gauntlet::content::stages::{
    AggregationRequest, ComplianceRouter, DetectionResult, EnterpriseRequest, EnterpriseResult,
    EnterpriseValidator, LanguageDetector, LogoRequest, LogoResult, LogoValidator, NlpRequest,
    NlpResult, NlpValidator, ResultAggregator, RoutingDecision, RoutingRequest, TextRequest,
    TextResult, TextValidator,
};
use gauntlet::{
    AggregatedResult, ChannelSink, ContentPipeline, ContentStatus, DeadLetter, DeadLetterQuery,
    MemoryStore, OutboxStore, PipelineEngine, ProjectionConfig, PushEvent, RetryPolicy,
    ReviewVerdict, RuntimeConfig, ValidatorSet,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const TEST_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(20);
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Initialize tracing for tests. Safe to call multiple times.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("gauntlet=debug")
        .try_init();
}

/// Assert that events match the expected `type` tags in order.
pub fn assert_event_types(events: &[serde_json::Value], expected_types: &[&str]) {
    assert_eq!(
        events.len(),
        expected_types.len(),
        "event count mismatch: expected {}, got {}",
        expected_types.len(),
        events.len()
    );
    for (i, expected_type) in expected_types.iter().enumerate() {
        assert_eq!(
            events[i]["type"], *expected_type,
            "event {i} type mismatch: expected {expected_type}, got {}",
            events[i]["type"]
        );
    }
}

/// Fast runtime config for tests.
pub fn test_runtime_config() -> RuntimeConfig {
    RuntimeConfig {
        effect_poll_interval: Duration::from_millis(10),
        effect_lock_duration: Duration::from_secs(30),
        shutdown_timeout: Duration::from_secs(5),
        retry_policy: RetryPolicy {
            max_attempts: TEST_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
        },
        projection: ProjectionConfig {
            poll_interval: Duration::from_millis(10),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Poll until condition returns Some(T) or timeout expires.
pub async fn wait_until<F, Fut, T>(timeout: Duration, interval: Duration, check: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        if let Some(result) = check().await? {
            return Ok(result);
        }

        if tokio::time::Instant::now() > deadline {
            return Err(anyhow!("timeout waiting for condition"));
        }

        tokio::time::sleep(interval).await;
    }
}

// --- Canned validators ---

pub struct CannedDetector {
    pub calls: AtomicUsize,
}

impl CannedDetector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl LanguageDetector for CannedDetector {
    async fn detect(&self, _payload: &str) -> Result<DetectionResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(DetectionResult {
            language: "en".to_string(),
            confidence: 0.99,
        })
    }
}

pub struct PassingNlp;

#[async_trait]
impl NlpValidator for PassingNlp {
    async fn validate(&self, _request: &NlpRequest) -> Result<NlpResult> {
        Ok(NlpResult {
            category: "article".to_string(),
            passed: true,
            issues: vec![],
        })
    }
}

pub struct PassingText;

#[async_trait]
impl TextValidator for PassingText {
    async fn validate(&self, _request: &TextRequest) -> Result<TextResult> {
        Ok(TextResult {
            passed: true,
            issues: vec![],
        })
    }
}

pub struct PassingLogo;

#[async_trait]
impl LogoValidator for PassingLogo {
    async fn validate(&self, _request: &LogoRequest) -> Result<LogoResult> {
        Ok(LogoResult {
            passed: true,
            findings: vec![],
        })
    }
}

/// Logo validator that fails every attempt, for retry-exhaustion tests.
pub struct BrokenLogo {
    pub calls: AtomicUsize,
}

impl BrokenLogo {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl LogoValidator for BrokenLogo {
    async fn validate(&self, _request: &LogoRequest) -> Result<LogoResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(anyhow!("logo service unavailable"))
    }
}

pub struct PassingEnterprise;

#[async_trait]
impl EnterpriseValidator for PassingEnterprise {
    async fn validate(&self, _request: &EnterpriseRequest) -> Result<EnterpriseResult> {
        Ok(EnterpriseResult {
            passed: true,
            violations: vec![],
        })
    }
}

/// Aggregator returning a fixed verdict.
pub struct CannedAggregator {
    pub overall_passed: bool,
    pub confidence: f64,
}

#[async_trait]
impl ResultAggregator for CannedAggregator {
    async fn aggregate(&self, request: &AggregationRequest) -> Result<AggregatedResult> {
        assert_eq!(
            request.results.len(),
            4,
            "aggregation must see all four stage results"
        );
        Ok(AggregatedResult {
            overall_passed: self.overall_passed,
            confidence: self.confidence,
            summary: "canned verdict".to_string(),
        })
    }
}

/// Routes approved content to "channel-a" and rejected content to
/// "quarantine", proving the review decision reaches the router.
pub struct CannedRouter;

#[async_trait]
impl ComplianceRouter for CannedRouter {
    async fn route(&self, request: &RoutingRequest) -> Result<RoutingDecision> {
        let rejected = request
            .review
            .as_ref()
            .is_some_and(|r| r.verdict == ReviewVerdict::Reject);
        Ok(RoutingDecision {
            target: if rejected { "quarantine" } else { "channel-a" }.to_string(),
            compliant: !rejected,
            notes: vec![],
        })
    }
}

/// Validator set where everything passes and aggregation has the given
/// confidence.
pub fn passing_validators(confidence: f64) -> ValidatorSet {
    ValidatorSet {
        detector: CannedDetector::new(),
        nlp: Arc::new(PassingNlp),
        text: Arc::new(PassingText),
        logo: Arc::new(PassingLogo),
        enterprise: Arc::new(PassingEnterprise),
        aggregator: Arc::new(CannedAggregator {
            overall_passed: true,
            confidence,
        }),
        router: Arc::new(CannedRouter),
    }
}

pub fn metadata() -> BTreeMap<String, String> {
    BTreeMap::from([("type".to_string(), "article".to_string())])
}

// --- Test application ---

/// Owns the engine lifecycle for a test. Drop signals shutdown.
pub struct TestApp {
    pub store: MemoryStore,
    pub pipeline: ContentPipeline<MemoryStore>,
    pub pushes: mpsc::UnboundedReceiver<PushEvent>,
    max_attempts: u32,
    shutdown: Option<tokio::sync::oneshot::Sender<()>>,
    _handle: JoinHandle<gauntlet::Result<()>>,
}

impl TestApp {
    pub async fn start(validators: ValidatorSet) -> Self {
        Self::start_with(validators, test_runtime_config()).await
    }

    pub async fn start_with(validators: ValidatorSet, config: RuntimeConfig) -> Self {
        init_test_tracing();

        let store = MemoryStore::new();
        let (sink, pushes) = ChannelSink::new();
        let max_attempts = config.retry_policy.max_attempts;

        let engine = PipelineEngine::builder(store.clone(), validators)
            .completion_sink(sink)
            .config(config)
            .build();
        let pipeline = engine.pipeline().clone();

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(engine.run(async move {
            let _ = shutdown_rx.await;
        }));

        Self {
            store,
            pipeline,
            pushes,
            max_attempts,
            shutdown: Some(shutdown_tx),
            _handle: handle,
        }
    }

    /// Poll `status` until the instance reaches the expected status.
    pub async fn wait_for_status(
        &self,
        content_id: &str,
        expected: ContentStatus,
    ) -> Result<gauntlet::StatusResponse> {
        let pipeline = &self.pipeline;
        wait_until(DEFAULT_TEST_TIMEOUT, DEFAULT_POLL_INTERVAL, || async {
            let response = pipeline.status(content_id).await?;
            Ok((response.status == expected).then_some(response))
        })
        .await
        .with_context(|| format!("waiting for {content_id} to reach {expected}"))
    }

    /// Fetch the instance's raw event payloads in stream order.
    pub async fn fetch_events(&self, content_id: &str) -> Result<Vec<serde_json::Value>> {
        use gauntlet::{ContentWorkflow, EventStore, Workflow, WorkflowId};
        let events = self
            .store
            .fetch_stream_events(ContentWorkflow::TYPE, &WorkflowId::new(content_id))
            .await?;
        Ok(events.into_iter().map(|e| e.payload).collect())
    }

    pub async fn wait_for_dead_letter(&self, query: DeadLetterQuery) -> Result<Vec<DeadLetter>> {
        let store = &self.store;
        let max_attempts = self.max_attempts;
        wait_until(DEFAULT_TEST_TIMEOUT, DEFAULT_POLL_INTERVAL, || async {
            let dead_letters = store.fetch_dead_letters(&query, max_attempts).await?;
            Ok((!dead_letters.is_empty()).then_some(dead_letters))
        })
        .await
        .context("waiting for dead letter")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        // Signal shutdown if not already done (e.g. on panic or early
        // return); the runtime drains in the background.
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}
