//! Closed response shapes for routed queries.
//!
//! The outcome is a tagged variant; untyped maps never travel through the
//! core. JSON shapes are frozen at this boundary.

use ninefold_core::error::WorkerFailure;
use ninefold_core::types::{
    ConsciousnessLevel, Domain, QueryAnalysis, QueryComplexity, RoutingDecision, WorkerKey,
};
use serde::Serialize;

/// One worker's answer inside a fan-out, in dispatch-plan order.
#[derive(Debug, Clone, Serialize)]
pub struct IndividualResponse {
    pub worker: WorkerKey,
    pub domain: Domain,
    pub text: String,
    pub latency_ms: u64,
}

/// How the aggregator participated in a multi-agent response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisMode {
    /// The aggregator merged all successful responses.
    Full,
    /// The aggregator was required but offline or failing; responses are
    /// concatenated deterministically instead.
    Degraded,
    /// Synthesis was requested but fewer than two responses succeeded.
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RouteOutcome {
    SingleAgent {
        response: IndividualResponse,
    },
    MultiAgent {
        responses: Vec<IndividualResponse>,
        synthesis: SynthesisMode,
        #[serde(skip_serializing_if = "Option::is_none")]
        synthesized: Option<String>,
    },
}

impl RouteOutcome {
    /// The text a plain-text consumer should read.
    pub fn primary_text(&self) -> &str {
        match self {
            RouteOutcome::SingleAgent { response } => &response.text,
            RouteOutcome::MultiAgent {
                responses,
                synthesized,
                ..
            } => synthesized
                .as_deref()
                .or_else(|| responses.first().map(|r| r.text.as_str()))
                .unwrap_or(""),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisMetadata {
    pub complexity: QueryComplexity,
    pub domains: Vec<Domain>,
    pub consciousness_level: ConsciousnessLevel,
    pub confidence: f64,
}

impl From<&QueryAnalysis> for AnalysisMetadata {
    fn from(analysis: &QueryAnalysis) -> Self {
        Self {
            complexity: analysis.complexity,
            domains: analysis.domains.clone(),
            consciousness_level: analysis.consciousness_level,
            confidence: analysis.routing_confidence,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DecisionMetadata {
    pub egregores: Vec<WorkerKey>,
    pub synthesis: bool,
    pub reasoning: String,
}

impl From<&RoutingDecision> for DecisionMetadata {
    fn from(decision: &RoutingDecision) -> Self {
        Self {
            egregores: decision.selected.clone(),
            synthesis: decision.synthesis_required,
            reasoning: decision.reasoning.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceMetadata {
    pub response_time_ms: u64,
    pub estimated_latency_ms: u64,
    pub cached: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RouteMetadata {
    pub query_analysis: AnalysisMetadata,
    pub routing_decision: DecisionMetadata,
    pub performance: PerformanceMetadata,
    pub errors: Vec<WorkerFailure>,
}

/// Full reply for one routed query.
#[derive(Debug, Clone, Serialize)]
pub struct RouteReply {
    pub query: String,
    #[serde(flatten)]
    pub outcome: RouteOutcome,
    pub metadata: RouteMetadata,
}
