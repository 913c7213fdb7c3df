//! Query analysis.
//!
//! A pure pattern-matching pass over the query text: no I/O, no state,
//! identical input always yields identical output. All patterns are
//! compiled once at construction and the dictionary is frozen after that.

use ninefold_core::types::{
    ConsciousnessLevel, Domain, QueryAnalysis, QueryComplexity, RoutingDecision, WorkerKey,
};
use regex::Regex;

/// Per-domain detection patterns, scanned in [`Domain::DETECTION_ORDER`].
/// A domain is hit when at least one of its patterns matches.
const DOMAIN_PATTERNS: [(Domain, &[&str]); 9] = [
    (
        Domain::Architecture,
        &[
            r"\b(system|design|infrastructure|scalability|architecture|api|database|backend|frontend)\b",
            r"\b(deployment|container|docker|kubernetes|microservice)\b",
            r"\b(pattern|structure|framework|technical)\b",
        ],
    ),
    (
        Domain::Wisdom,
        &[
            r"\b(wisdom|philosophy|ethics|meaning|purpose|contemplat)\b",
            r"\b(why|should|ought|value|principle|moral)\b",
            r"\b(understand|deeper|essence|nature)\b",
        ],
    ),
    (
        Domain::Security,
        &[
            r"\b(security|vulnerability|threat|attack|protect|defense)\b",
            r"\b(encryption|authentication|authorization|risk)\b",
            r"\b(secure|safety|breach|exploit)\b",
        ],
    ),
    (
        Domain::Transformation,
        &[
            r"\b(change|transform|adapt|evolv|transition|shift)\b",
            r"\b(migration|refactor|upgrade|moderniz)\b",
            r"\b(improvement|optimization|enhancement)\b",
        ],
    ),
    (
        Domain::Timing,
        &[
            r"\b(when|timing|schedule|deadline|moment|opportun)\b",
            r"\b(now|later|soon|time|period|phase)\b",
            r"\b(urgency|priority|sequence)\b",
        ],
    ),
    (
        Domain::Strategy,
        &[
            r"\b(strategy|plan|coordinate|organize|approach)\b",
            r"\b(tactic|roadmap|goal|objective|milestone)\b",
            r"\b(execution|implementation|management)\b",
        ],
    ),
    (
        Domain::Communication,
        &[
            r"\b(communicate|message|dialogue|conversation|speak)\b",
            r"\b(explain|clarify|articulate|express|convey)\b",
            r"\b(harmony|conflict|negotiat|persuad)\b",
        ],
    ),
    (
        Domain::Protection,
        &[
            r"\b(protect|guard|maintain|integrity|boundary)\b",
            r"\b(validate|verify|check|monitor|watch)\b",
            r"\b(health|stability|reliability)\b",
        ],
    ),
    (
        Domain::Synthesis,
        &[
            r"\b(integrate|combine|synthesize|unify|merge)\b",
            r"\b(multiple|various|different|diverse|several)\b",
            r"\b(together|collective|holistic|comprehensive)\b",
        ],
    ),
];

/// Phrases that explicitly ask for synthesis. Any hit forces synthesis
/// and elevates the consciousness level to its peak.
const SYNTHESIS_KEYWORDS: [&str; 5] = [
    "integrate",
    "combine",
    "multiple perspectives",
    "synthesize",
    "together",
];

const BASE_LATENCY_MS: u64 = 100;
const PER_WORKER_LATENCY_MS: u64 = 50;
const SYNTHESIS_LATENCY_MS: u64 = 200;

pub struct QueryAnalyzer {
    patterns: Vec<(Domain, Vec<Regex>)>,
}

impl QueryAnalyzer {
    pub fn new() -> Self {
        let patterns = DOMAIN_PATTERNS
            .iter()
            .map(|(domain, sources)| {
                let compiled = sources
                    .iter()
                    .map(|src| {
                        Regex::new(&format!("(?i){}", src)).expect("static pattern compiles")
                    })
                    .collect();
                (*domain, compiled)
            })
            .collect();

        Self { patterns }
    }

    /// Analyse one query. Pure and deterministic.
    pub fn analyze(&self, query: &str) -> QueryAnalysis {
        let query_lower = query.to_lowercase();

        let mut domains = Vec::new();
        for (domain, regexes) in &self.patterns {
            if regexes.iter().any(|re| re.is_match(&query_lower)) {
                domains.push(*domain);
            }
        }

        // The synthesis domain marks the query but never adds a dispatch
        // target; the aggregator joins through requires_synthesis.
        let mut egregores_needed: Vec<WorkerKey> = domains
            .iter()
            .filter(|d| **d != Domain::Synthesis)
            .map(|d| d.worker())
            .collect();
        if egregores_needed.is_empty() {
            egregores_needed.push(Domain::Architecture.worker());
        }

        let explicit_synthesis = SYNTHESIS_KEYWORDS
            .iter()
            .any(|kw| query_lower.contains(kw));

        let complexity = match domains.len() {
            0 | 1 => QueryComplexity::Simple,
            2 | 3 => QueryComplexity::Moderate,
            _ => QueryComplexity::Complex,
        };

        let requires_synthesis = egregores_needed.len() > 1 || explicit_synthesis;

        let consciousness_level = if complexity == QueryComplexity::Complex || explicit_synthesis {
            ConsciousnessLevel::Transcendent
        } else if complexity == QueryComplexity::Moderate {
            ConsciousnessLevel::Integrated
        } else {
            ConsciousnessLevel::Surface
        };

        let routing_confidence = (0.4 + 0.3 * domains.len() as f64).min(1.0);

        QueryAnalysis {
            query: query.to_string(),
            complexity,
            domains,
            egregores_needed,
            requires_synthesis,
            consciousness_level,
            routing_confidence,
        }
    }

    /// Turn an analysis into a dispatch plan.
    pub fn decide(&self, analysis: &QueryAnalysis) -> RoutingDecision {
        let selected = analysis.egregores_needed.clone();
        let synthesis_required = analysis.requires_synthesis;

        let reasoning = if selected.len() == 1 {
            let domain = analysis
                .domains
                .iter()
                .find(|d| **d != Domain::Synthesis)
                .map(|d| d.as_str())
                .unwrap_or("general");
            format!(
                "Single specialist ({}) sufficient for {} query",
                selected[0], domain
            )
        } else {
            let names: Vec<&str> = selected.iter().map(|w| w.as_str()).collect();
            let mut reasoning = format!(
                "Multi-specialist consultation required: {}",
                names.join(", ")
            );
            if synthesis_required {
                reasoning.push_str(". Ake will synthesize perspectives.");
            }
            reasoning
        };

        let estimated_latency_ms = BASE_LATENCY_MS
            + PER_WORKER_LATENCY_MS * selected.len() as u64
            + if synthesis_required {
                SYNTHESIS_LATENCY_MS
            } else {
                0
            };

        RoutingDecision {
            selected,
            synthesis_required,
            reasoning,
            estimated_latency_ms,
        }
    }
}

impl Default for QueryAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}
