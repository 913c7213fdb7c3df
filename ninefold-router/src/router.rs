//! Router core: cache probe, analysis, dispatch, synthesis, store.

use crate::analyzer::QueryAnalyzer;
use crate::cache::{CacheProbe, ResponseCache, ResponseCacheConfig};
use crate::result::{
    IndividualResponse, PerformanceMetadata, RouteMetadata, RouteOutcome, RouteReply,
    SynthesisMode,
};
use crate::fingerprint;
use ninefold_core::error::WorkerFailure;
use ninefold_core::types::{Domain, QueryAnalysis, RoutingDecision, WorkerSpec};
use ninefold_core::{Error, Result, WorkerErrorKind};
use ninefold_fleet::{WorkerClient, WorkerRegistry};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Fixed slack added on top of the scaled latency estimate when deriving
/// the fan-out deadline.
const DEADLINE_SLACK: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct RouterConfig {
    pub inference_timeout: Duration,
    pub synthesis_timeout: Duration,
    pub cache_enabled: bool,
    pub cache_ttl: Duration,
    pub cache_capacity: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            inference_timeout: Duration::from_secs(30),
            synthesis_timeout: Duration::from_secs(60),
            cache_enabled: true,
            cache_ttl: Duration::from_secs(3600),
            cache_capacity: 10_000,
        }
    }
}

#[derive(Default)]
struct RouterCounters {
    total_queries: AtomicU64,
    cache_hits: AtomicU64,
    single_agent: AtomicU64,
    multi_agent: AtomicU64,
    synthesis_used: AtomicU64,
}

/// Point-in-time routing statistics with derived rates.
#[derive(Debug, Clone, Serialize)]
pub struct RouterStats {
    pub total_queries: u64,
    pub cache_hits: u64,
    pub single_agent: u64,
    pub multi_agent: u64,
    pub synthesis_used: u64,
    pub cache_hit_rate: f64,
    pub multi_agent_rate: f64,
    pub synthesis_rate: f64,
}

pub struct Router {
    analyzer: QueryAnalyzer,
    cache: ResponseCache,
    registry: Arc<WorkerRegistry>,
    client: Arc<WorkerClient>,
    config: RouterConfig,
    counters: RouterCounters,
}

impl Router {
    pub fn new(registry: Arc<WorkerRegistry>, config: RouterConfig) -> Self {
        let cache = ResponseCache::new(ResponseCacheConfig {
            enabled: config.cache_enabled,
            ttl: config.cache_ttl,
            capacity: config.cache_capacity,
        });

        Self {
            analyzer: QueryAnalyzer::new(),
            cache,
            client: registry.client(),
            registry,
            config,
            counters: RouterCounters::default(),
        }
    }

    /// Analyse a query and produce its dispatch plan without executing.
    pub fn analyze(&self, query: &str) -> (QueryAnalysis, RoutingDecision) {
        let analysis = self.analyzer.analyze(query);
        let decision = self.analyzer.decide(&analysis);
        (analysis, decision)
    }

    /// Full routing pipeline for one query.
    pub async fn route(&self, query: &str, max_tokens: u32) -> Result<RouteReply> {
        let started = Instant::now();
        self.counters.total_queries.fetch_add(1, Ordering::Relaxed);

        let fp = fingerprint(query);
        match self.cache.probe(&fp) {
            CacheProbe::Hit(mut reply) => {
                self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                debug!(fingerprint = %fp, "cache hit");
                reply.metadata.performance.cached = true;
                reply.metadata.performance.response_time_ms =
                    started.elapsed().as_millis() as u64;
                Ok(reply)
            }
            CacheProbe::Wait(follower) => {
                debug!(fingerprint = %fp, "joining in-flight fan-out");
                let mut reply = follower.wait().await?;
                reply.metadata.performance.cached = true;
                reply.metadata.performance.response_time_ms =
                    started.elapsed().as_millis() as u64;
                Ok(reply)
            }
            CacheProbe::Lead(lease) => {
                let result = self.execute(query, max_tokens, started).await;
                lease.complete(&result);
                result
            }
        }
    }

    async fn execute(
        &self,
        query: &str,
        max_tokens: u32,
        started: Instant,
    ) -> Result<RouteReply> {
        let analysis = self.analyzer.analyze(query);
        let decision = self.analyzer.decide(&analysis);
        info!(
            egregores = ?decision.selected,
            synthesis = decision.synthesis_required,
            "routing decision: {}",
            decision.reasoning
        );

        // Resolve the live subset of the plan; offline workers are
        // recorded but do not abort the fan-out.
        let mut failures: Vec<WorkerFailure> = Vec::new();
        let mut live: Vec<WorkerSpec> = Vec::new();
        for key in &decision.selected {
            if self.registry.is_available(*key) {
                live.push(self.registry.spec(*key).clone());
            } else {
                failures.push(WorkerFailure {
                    worker: *key,
                    kind: WorkerErrorKind::Unreachable,
                    detail: "worker is not in the live set".to_string(),
                });
            }
        }
        if live.is_empty() {
            warn!(egregores = ?decision.selected, "no live workers for plan");
            return Err(Error::NoBackends);
        }

        if decision.selected.len() == 1 && !decision.synthesis_required {
            self.counters.single_agent.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.multi_agent.fetch_add(1, Ordering::Relaxed);
        }
        if decision.synthesis_required {
            self.counters.synthesis_used.fetch_add(1, Ordering::Relaxed);
        }

        // Fan out with an overall deadline derived from the estimate.
        // Calls are independent: one failure never cancels its siblings,
        // and join order preserves plan order.
        let overall =
            Duration::from_millis(decision.estimated_latency_ms * 3) + DEADLINE_SLACK;
        let per_call = self.config.inference_timeout.min(overall);
        let calls = live
            .iter()
            .map(|spec| self.client.generate(spec, query, max_tokens, per_call));
        let results = futures::future::join_all(calls).await;

        let mut responses: Vec<IndividualResponse> = Vec::new();
        for (spec, result) in live.iter().zip(results) {
            match result {
                Ok(outcome) => responses.push(IndividualResponse {
                    worker: spec.key,
                    domain: spec.domain,
                    text: outcome.text,
                    latency_ms: outcome.latency_ms,
                }),
                Err(e) => {
                    warn!(worker = %spec.key, error = %e, "worker call failed");
                    failures.push(e.as_worker_failure().unwrap_or(WorkerFailure {
                        worker: spec.key,
                        kind: WorkerErrorKind::Malformed,
                        detail: e.to_string(),
                    }));
                }
            }
        }
        if responses.is_empty() {
            return Err(Error::NoBackends);
        }

        let outcome = if decision.synthesis_required {
            let (mode, synthesized) = self
                .synthesize(query, max_tokens, overall, &responses, &mut failures)
                .await;
            RouteOutcome::MultiAgent {
                responses,
                synthesis: mode,
                synthesized,
            }
        } else {
            // A plan without synthesis always selects exactly one worker.
            RouteOutcome::SingleAgent {
                response: responses.remove(0),
            }
        };

        Ok(RouteReply {
            query: query.to_string(),
            outcome,
            metadata: RouteMetadata {
                query_analysis: (&analysis).into(),
                routing_decision: (&decision).into(),
                performance: PerformanceMetadata {
                    response_time_ms: started.elapsed().as_millis() as u64,
                    estimated_latency_ms: decision.estimated_latency_ms,
                    cached: false,
                },
                errors: failures,
            },
        })
    }

    /// Merge successful responses through the aggregator, degrading to a
    /// deterministic concatenation when it is offline or failing.
    /// Synthesis only makes sense over at least two responses.
    async fn synthesize(
        &self,
        query: &str,
        max_tokens: u32,
        overall: Duration,
        responses: &[IndividualResponse],
        failures: &mut Vec<WorkerFailure>,
    ) -> (SynthesisMode, Option<String>) {
        if responses.len() < 2 {
            return (SynthesisMode::Skipped, None);
        }

        let aggregator = self.registry.find_by_domain(Domain::Synthesis);
        if !self.registry.is_available(aggregator) {
            failures.push(WorkerFailure {
                worker: aggregator,
                kind: WorkerErrorKind::Unreachable,
                detail: "aggregator is not in the live set".to_string(),
            });
            return (
                SynthesisMode::Degraded,
                Some(concatenate_responses(responses)),
            );
        }

        let prompt = synthesis_prompt(query, responses);
        let spec = self.registry.spec(aggregator);
        let timeout = self.config.synthesis_timeout.min(overall);
        match self.client.generate(spec, &prompt, max_tokens, timeout).await {
            Ok(outcome) => (SynthesisMode::Full, Some(outcome.text)),
            Err(e) => {
                warn!(error = %e, "synthesis failed, degrading to concatenation");
                failures.push(e.as_worker_failure().unwrap_or(WorkerFailure {
                    worker: aggregator,
                    kind: WorkerErrorKind::Malformed,
                    detail: e.to_string(),
                }));
                (
                    SynthesisMode::Degraded,
                    Some(concatenate_responses(responses)),
                )
            }
        }
    }

    pub fn stats(&self) -> RouterStats {
        let total = self.counters.total_queries.load(Ordering::Relaxed);
        let cache_hits = self.counters.cache_hits.load(Ordering::Relaxed);
        let single_agent = self.counters.single_agent.load(Ordering::Relaxed);
        let multi_agent = self.counters.multi_agent.load(Ordering::Relaxed);
        let synthesis_used = self.counters.synthesis_used.load(Ordering::Relaxed);

        let rate = |part: u64| {
            if total == 0 {
                0.0
            } else {
                part as f64 / total as f64
            }
        };

        RouterStats {
            total_queries: total,
            cache_hits,
            single_agent,
            multi_agent,
            synthesis_used,
            cache_hit_rate: rate(cache_hits),
            multi_agent_rate: rate(multi_agent),
            synthesis_rate: rate(synthesis_used),
        }
    }
}

/// Synthesis prompt: the original query plus every successful response
/// labelled by worker, in plan order.
fn synthesis_prompt(query: &str, responses: &[IndividualResponse]) -> String {
    let mut prompt = format!("Original query: {}\n\nPerspectives received:\n", query);
    for response in responses {
        prompt.push_str(&format!(
            "\n{}: {}\n",
            response.worker.display_name().to_uppercase(),
            response.text
        ));
    }
    prompt.push_str("\nSynthesize these perspectives into a unified response:");
    prompt
}

/// Deterministic fallback when the aggregator cannot run: responses
/// labelled and joined in plan order.
fn concatenate_responses(responses: &[IndividualResponse]) -> String {
    responses
        .iter()
        .map(|r| format!("{}: {}", r.worker.display_name(), r.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesis_prompt_includes_every_response_verbatim() {
        let responses = vec![
            IndividualResponse {
                worker: ninefold_core::types::WorkerKey::Rhys,
                domain: Domain::Architecture,
                text: "use a layered design".to_string(),
                latency_ms: 10,
            },
            IndividualResponse {
                worker: ninefold_core::types::WorkerKey::Wraith,
                domain: Domain::Security,
                text: "rotate credentials".to_string(),
                latency_ms: 12,
            },
        ];

        let prompt = synthesis_prompt("secure design", &responses);
        assert!(prompt.contains("Original query: secure design"));
        assert!(prompt.contains("RHYS: use a layered design"));
        assert!(prompt.contains("WRAITH: rotate credentials"));

        let concat = concatenate_responses(&responses);
        let rhys = concat.find("Rhys: use a layered design").unwrap();
        let wraith = concat.find("Wraith: rotate credentials").unwrap();
        assert!(rhys < wraith);
    }
}
