//! Per-worker training records.

use chrono::{DateTime, Utc};
use ninefold_core::types::{Domain, TrainingStage, WorkerKey, WorkerSpec};
use serde::{Deserialize, Serialize};

/// Static configuration for one worker's training run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingJobConfig {
    pub worker: WorkerKey,
    pub port: u16,
    pub domain: Domain,
    pub base_model: String,
    pub dataset_size_target: u64,
    pub training_epochs: u32,
    pub steps_per_epoch: u32,
    pub batch_size: u32,
    pub learning_rate: f64,
    pub max_length: u32,
    pub validation_size: u32,
    /// Relative specialist-over-generalist improvement the run aims for.
    pub advantage_target: f64,
}

impl TrainingJobConfig {
    /// Defaults for a catalogued worker. Dataset targets vary with the
    /// breadth of the domain.
    pub fn for_worker(spec: &WorkerSpec) -> Self {
        let dataset_size_target = match spec.key {
            WorkerKey::Ake | WorkerKey::Rhys | WorkerKey::Ketheriel => 30_000,
            WorkerKey::Wraith | WorkerKey::Flux | WorkerKey::Chalyth | WorkerKey::Seraphel => {
                25_000
            }
            WorkerKey::Kairos | WorkerKey::Vireon => 20_000,
        };

        Self {
            worker: spec.key,
            port: spec.port,
            domain: spec.domain,
            base_model: "gpt2-medium".to_string(),
            dataset_size_target,
            training_epochs: 3,
            steps_per_epoch: 100,
            batch_size: 8,
            learning_rate: 5e-5,
            max_length: 512,
            validation_size: 20,
            advantage_target: 0.25,
        }
    }
}

/// Validation verdict recorded on the job and in the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub generalist_score: f64,
    pub specialist_score: f64,
    pub advantage: f64,
    pub meets_target: bool,
    pub validation_size: u32,
}

/// Live supervision record for one worker.
#[derive(Debug, Clone, Serialize)]
pub struct TrainingJob {
    pub worker: WorkerKey,
    pub stage: TrainingStage,
    pub progress_pct: f64,
    pub current_step: String,
    pub dataset_collected: u64,
    pub training_loss: Option<f64>,
    pub validation: Option<ValidationOutcome>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    /// Last stage attempted before `Failed`; `None` while healthy.
    pub failed_stage: Option<TrainingStage>,
    pub started_at: DateTime<Utc>,
    pub estimated_completion: Option<DateTime<Utc>>,
}

impl TrainingJob {
    pub fn new(worker: WorkerKey) -> Self {
        Self {
            worker,
            stage: TrainingStage::Idle,
            progress_pct: 0.0,
            current_step: "Initializing".to_string(),
            dataset_collected: 0,
            training_loss: None,
            validation: None,
            warnings: Vec::new(),
            errors: Vec::new(),
            failed_stage: None,
            started_at: Utc::now(),
            estimated_completion: None,
        }
    }

    /// Advance progress. Progress is monotonic non-decreasing for a
    /// healthy job; regressions are clamped away.
    pub fn advance(&mut self, progress_pct: f64, step: impl Into<String>) {
        self.progress_pct = self.progress_pct.max(progress_pct.clamp(0.0, 100.0));
        self.current_step = step.into();
        self.refresh_estimate();
    }

    pub fn enter_stage(&mut self, stage: TrainingStage, progress_pct: f64, step: impl Into<String>) {
        self.stage = stage;
        self.advance(progress_pct, step);
    }

    /// Terminal failure: record the attempted stage and the error.
    pub fn fail(&mut self, stage: TrainingStage, detail: impl Into<String>) {
        let detail = detail.into();
        self.failed_stage = Some(stage);
        self.errors.push(format!("{}: {}", stage, detail));
        self.stage = TrainingStage::Failed;
        self.current_step = format!("Failed: {}", detail);
        self.estimated_completion = None;
    }

    fn refresh_estimate(&mut self) {
        if self.progress_pct <= 0.0 || self.progress_pct >= 100.0 {
            self.estimated_completion = None;
            return;
        }
        let elapsed = Utc::now().signed_duration_since(self.started_at);
        let scale = 100.0 / self.progress_pct;
        if let Some(total) = elapsed
            .num_milliseconds()
            .checked_mul(scale as i64)
            .map(chrono::Duration::milliseconds)
        {
            self.estimated_completion = Some(self.started_at + total);
        }
    }
}
