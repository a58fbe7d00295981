//! Validator seams for the pipeline stages.
//!
//! One trait per stage. Implementations are opaque services (model calls,
//! rule engines, remote APIs); the pipeline only depends on the typed
//! request/response contract.
//!
//! # Duplicate-call safety
//!
//! Stage invocations ride the outbox with at-least-once delivery: a crash
//! between a validator response and the commit of its result re-invokes the
//! validator with the identical request. Implementations must therefore be
//! safe to call more than once with the same request (pure functions over the
//! request, or idempotent against external systems). The engine additionally
//! rejects stale duplicate results, so a re-invocation can never corrupt
//! recorded state.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::state::{AggregatedResult, ReviewDecision, StageRecord};

/// Detected language for a payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionResult {
    pub language: String,
    pub confidence: f64,
}

/// Detects the natural language of the content payload.
#[async_trait]
pub trait LanguageDetector: Send + Sync + 'static {
    async fn detect(&self, payload: &str) -> Result<DetectionResult>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NlpRequest {
    pub payload: String,
    pub language: String,
}

/// NLP verdict. `category` classifies the content but is not recorded in the
/// stage result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NlpResult {
    pub category: String,
    pub passed: bool,
    pub issues: Vec<String>,
}

/// Language-aware NLP validation of the payload.
#[async_trait]
pub trait NlpValidator: Send + Sync + 'static {
    async fn validate(&self, request: &NlpRequest) -> Result<NlpResult>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextRequest {
    pub payload: String,
    pub language: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextResult {
    pub passed: bool,
    pub issues: Vec<String>,
}

/// Text-level validation (grammar, tone, banned phrases).
#[async_trait]
pub trait TextValidator: Send + Sync + 'static {
    async fn validate(&self, request: &TextRequest) -> Result<TextResult>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogoRequest {
    pub content_id: String,
    pub payload: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogoResult {
    pub passed: bool,
    pub findings: Vec<String>,
}

/// Brand and logo usage validation.
#[async_trait]
pub trait LogoValidator: Send + Sync + 'static {
    async fn validate(&self, request: &LogoRequest) -> Result<LogoResult>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnterpriseRequest {
    pub payload: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnterpriseResult {
    pub passed: bool,
    pub violations: Vec<String>,
}

/// Enterprise policy validation against payload and metadata.
#[async_trait]
pub trait EnterpriseValidator: Send + Sync + 'static {
    async fn validate(&self, request: &EnterpriseRequest) -> Result<EnterpriseResult>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationRequest {
    pub content_id: String,
    pub results: Vec<StageRecord>,
}

/// Consolidates stage results into an [`AggregatedResult`].
#[async_trait]
pub trait ResultAggregator: Send + Sync + 'static {
    async fn aggregate(&self, request: &AggregationRequest) -> Result<AggregatedResult>;
}

/// Routing request carrying the full validation outcome.
///
/// `review` is `None` on the auto-pass path and holds the recorded decision
/// when routing resumes after human review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingRequest {
    pub content_id: String,
    pub aggregated: AggregatedResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review: Option<ReviewDecision>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    /// Destination platform/channel for the content.
    pub target: String,
    /// Final compliance check outcome.
    pub compliant: bool,
    #[serde(default)]
    pub notes: Vec<String>,
}

/// Determines the routing destination and applies final compliance checks.
#[async_trait]
pub trait ComplianceRouter: Send + Sync + 'static {
    async fn route(&self, request: &RoutingRequest) -> Result<RoutingDecision>;
}

/// The full set of validators the stage handler dispatches to.
#[derive(Clone)]
pub struct ValidatorSet {
    pub detector: Arc<dyn LanguageDetector>,
    pub nlp: Arc<dyn NlpValidator>,
    pub text: Arc<dyn TextValidator>,
    pub logo: Arc<dyn LogoValidator>,
    pub enterprise: Arc<dyn EnterpriseValidator>,
    pub aggregator: Arc<dyn ResultAggregator>,
    pub router: Arc<dyn ComplianceRouter>,
}
