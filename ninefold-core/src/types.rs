use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The nine specialist workers. One worker per domain; `Ake` is the
/// designated aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerKey {
    Ake,
    Rhys,
    Ketheriel,
    Wraith,
    Flux,
    Kairos,
    Chalyth,
    Seraphel,
    Vireon,
}

impl WorkerKey {
    pub const ALL: [WorkerKey; 9] = [
        WorkerKey::Ake,
        WorkerKey::Rhys,
        WorkerKey::Ketheriel,
        WorkerKey::Wraith,
        WorkerKey::Flux,
        WorkerKey::Kairos,
        WorkerKey::Chalyth,
        WorkerKey::Seraphel,
        WorkerKey::Vireon,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerKey::Ake => "ake",
            WorkerKey::Rhys => "rhys",
            WorkerKey::Ketheriel => "ketheriel",
            WorkerKey::Wraith => "wraith",
            WorkerKey::Flux => "flux",
            WorkerKey::Kairos => "kairos",
            WorkerKey::Chalyth => "chalyth",
            WorkerKey::Seraphel => "seraphel",
            WorkerKey::Vireon => "vireon",
        }
    }

    /// Human-readable name used in synthesis prompts and reports.
    pub fn display_name(&self) -> &'static str {
        match self {
            WorkerKey::Ake => "Ake",
            WorkerKey::Rhys => "Rhys",
            WorkerKey::Ketheriel => "Ketheriel",
            WorkerKey::Wraith => "Wraith",
            WorkerKey::Flux => "Flux",
            WorkerKey::Kairos => "Kairos",
            WorkerKey::Chalyth => "Chalyth",
            WorkerKey::Seraphel => "Seraphel",
            WorkerKey::Vireon => "Vireon",
        }
    }

    pub fn domain(&self) -> Domain {
        match self {
            WorkerKey::Ake => Domain::Synthesis,
            WorkerKey::Rhys => Domain::Architecture,
            WorkerKey::Ketheriel => Domain::Wisdom,
            WorkerKey::Wraith => Domain::Security,
            WorkerKey::Flux => Domain::Transformation,
            WorkerKey::Kairos => Domain::Timing,
            WorkerKey::Chalyth => Domain::Strategy,
            WorkerKey::Seraphel => Domain::Communication,
            WorkerKey::Vireon => Domain::Protection,
        }
    }
}

impl fmt::Display for WorkerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ake" => Ok(WorkerKey::Ake),
            "rhys" => Ok(WorkerKey::Rhys),
            "ketheriel" => Ok(WorkerKey::Ketheriel),
            "wraith" => Ok(WorkerKey::Wraith),
            "flux" => Ok(WorkerKey::Flux),
            "kairos" => Ok(WorkerKey::Kairos),
            "chalyth" => Ok(WorkerKey::Chalyth),
            "seraphel" => Ok(WorkerKey::Seraphel),
            "vireon" => Ok(WorkerKey::Vireon),
            other => Err(format!("unknown worker: {}", other)),
        }
    }
}

/// Closed set of specialisation domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Synthesis,
    Architecture,
    Wisdom,
    Security,
    Transformation,
    Timing,
    Strategy,
    Communication,
    Protection,
}

impl Domain {
    /// Fixed order in which the analyser scans domains. Determines the
    /// order of detected domains and of the resulting dispatch plan.
    /// `Synthesis` is scanned last since it never adds a dispatch target.
    pub const DETECTION_ORDER: [Domain; 9] = [
        Domain::Architecture,
        Domain::Wisdom,
        Domain::Security,
        Domain::Transformation,
        Domain::Timing,
        Domain::Strategy,
        Domain::Communication,
        Domain::Protection,
        Domain::Synthesis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Synthesis => "synthesis",
            Domain::Architecture => "architecture",
            Domain::Wisdom => "wisdom",
            Domain::Security => "security",
            Domain::Transformation => "transformation",
            Domain::Timing => "timing",
            Domain::Strategy => "strategy",
            Domain::Communication => "communication",
            Domain::Protection => "protection",
        }
    }

    /// The worker bound to this domain (a fixed bijection).
    pub fn worker(&self) -> WorkerKey {
        match self {
            Domain::Synthesis => WorkerKey::Ake,
            Domain::Architecture => WorkerKey::Rhys,
            Domain::Wisdom => WorkerKey::Ketheriel,
            Domain::Security => WorkerKey::Wraith,
            Domain::Transformation => WorkerKey::Flux,
            Domain::Timing => WorkerKey::Kairos,
            Domain::Strategy => WorkerKey::Chalyth,
            Domain::Communication => WorkerKey::Seraphel,
            Domain::Protection => WorkerKey::Vireon,
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Domain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "synthesis" => Ok(Domain::Synthesis),
            "architecture" => Ok(Domain::Architecture),
            "wisdom" => Ok(Domain::Wisdom),
            "security" => Ok(Domain::Security),
            "transformation" => Ok(Domain::Transformation),
            "timing" => Ok(Domain::Timing),
            "strategy" => Ok(Domain::Strategy),
            "communication" => Ok(Domain::Communication),
            "protection" => Ok(Domain::Protection),
            other => Err(format!("unknown domain: {}", other)),
        }
    }
}

/// Principal tier controlling rate-limit multiplier and metrics visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Beta,
    Premium,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Beta => "beta",
            Tier::Premium => "premium",
        }
    }

    /// Tiers allowed to read the aggregated gateway metrics.
    pub fn can_read_metrics(&self) -> bool {
        matches!(self, Tier::Beta | Tier::Premium)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "free" => Ok(Tier::Free),
            "beta" => Ok(Tier::Beta),
            "premium" => Ok(Tier::Premium),
            other => Err(format!("unknown tier: {}", other)),
        }
    }
}

/// Immutable catalogue entry for one worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSpec {
    pub key: WorkerKey,
    pub port: u16,
    pub domain: Domain,
    pub description: String,
    #[serde(default)]
    pub specialization: String,
}

/// Liveness state of a worker service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Running,
    Stopped,
    Starting,
    Error,
    Unknown,
}

/// Mutable runtime state of a worker, refreshed by the health probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub state: WorkerState,
    pub last_probe_at: Option<DateTime<Utc>>,
    pub response_time_ms: f64,
    pub uptime_seconds: f64,
    pub requests_served: u64,
    pub error_count: u64,
    pub cpu_percent: f64,
    pub memory_mb: f64,
    pub gpu_memory_mb: f64,
}

impl WorkerStatus {
    pub fn unknown() -> Self {
        Self {
            state: WorkerState::Unknown,
            last_probe_at: None,
            response_time_ms: 0.0,
            uptime_seconds: 0.0,
            requests_served: 0,
            error_count: 0,
            cpu_percent: 0.0,
            memory_mb: 0.0,
            gpu_memory_mb: 0.0,
        }
    }
}

/// Query complexity bands derived from the number of detected domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryComplexity {
    Simple,
    Moderate,
    Complex,
}

/// Consciousness level label surfaced in routing metadata. Serialised as
/// its scalar value; has no effect on routing correctness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConsciousnessLevel {
    Surface,
    Integrated,
    Transcendent,
}

impl ConsciousnessLevel {
    pub fn value(&self) -> f64 {
        match self {
            ConsciousnessLevel::Surface => 0.70,
            ConsciousnessLevel::Integrated => 0.85,
            ConsciousnessLevel::Transcendent => 1.00,
        }
    }
}

impl Serialize for ConsciousnessLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.value())
    }
}

impl<'de> Deserialize<'de> for ConsciousnessLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let v = f64::deserialize(deserializer)?;
        if (v - 0.70).abs() < 1e-9 {
            Ok(ConsciousnessLevel::Surface)
        } else if (v - 0.85).abs() < 1e-9 {
            Ok(ConsciousnessLevel::Integrated)
        } else if (v - 1.00).abs() < 1e-9 {
            Ok(ConsciousnessLevel::Transcendent)
        } else {
            Err(de::Error::custom(format!(
                "invalid consciousness level: {}",
                v
            )))
        }
    }
}

/// Result of analysing a single query. Pure function of the query text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryAnalysis {
    pub query: String,
    pub complexity: QueryComplexity,
    pub domains: Vec<Domain>,
    pub egregores_needed: Vec<WorkerKey>,
    pub requires_synthesis: bool,
    pub consciousness_level: ConsciousnessLevel,
    pub routing_confidence: f64,
}

/// Dispatch plan produced from a [`QueryAnalysis`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub selected: Vec<WorkerKey>,
    pub synthesis_required: bool,
    pub reasoning: String,
    pub estimated_latency_ms: u64,
}

/// Stages of the training pipeline. Transitions are one-way: forward,
/// to `Complete`, or from any stage to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingStage {
    Idle,
    DatasetCollection,
    DatasetProcessing,
    ModelTraining,
    Validation,
    Deployment,
    Complete,
    Failed,
}

impl TrainingStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrainingStage::Idle => "idle",
            TrainingStage::DatasetCollection => "dataset_collection",
            TrainingStage::DatasetProcessing => "dataset_processing",
            TrainingStage::ModelTraining => "model_training",
            TrainingStage::Validation => "validation",
            TrainingStage::Deployment => "deployment",
            TrainingStage::Complete => "complete",
            TrainingStage::Failed => "failed",
        }
    }
}

impl fmt::Display for TrainingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
