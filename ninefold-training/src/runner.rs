//! Stage compute seam.
//!
//! The supervisor owns sequencing, progress and failure handling; the
//! runner owns the actual compute behind each stage. Production wires in
//! dataset scrapers, trainers and deploy tooling. [`SimulatedRunner`]
//! stands in for all of that with paced simulation and a real artefact
//! tree, which is what test mode runs against.

use crate::job::TrainingJobConfig;
use async_trait::async_trait;
use ninefold_core::Result;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Ordered deployment sub-steps. `RegisterWorker` is intercepted by the
/// supervisor, which owns the fleet registry hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployStep {
    CopyArtifacts,
    WriteServiceConfig,
    StartWorker,
    RegisterWorker,
    HealthCheck,
}

impl DeployStep {
    pub const ALL: [DeployStep; 5] = [
        DeployStep::CopyArtifacts,
        DeployStep::WriteServiceConfig,
        DeployStep::StartWorker,
        DeployStep::RegisterWorker,
        DeployStep::HealthCheck,
    ];

    pub fn describe(&self) -> &'static str {
        match self {
            DeployStep::CopyArtifacts => "Copying model files",
            DeployStep::WriteServiceConfig => "Creating service configuration",
            DeployStep::StartWorker => "Starting worker service",
            DeployStep::RegisterWorker => "Registering with the fleet",
            DeployStep::HealthCheck => "Running health checks",
        }
    }
}

impl fmt::Display for DeployStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Benchmark scores produced at the end of validation.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ValidationScores {
    pub generalist_score: f64,
    pub specialist_score: f64,
}

#[async_trait]
pub trait StageRunner: Send + Sync {
    /// Collect one chunk of training examples; returns how many were
    /// actually collected.
    async fn collect_chunk(
        &self,
        config: &TrainingJobConfig,
        already_collected: u64,
        chunk_size: u64,
    ) -> Result<u64>;

    /// Filter, deduplicate and split the collected dataset.
    async fn process_dataset(&self, config: &TrainingJobConfig) -> Result<()>;

    /// Run one optimiser step; returns the current loss.
    async fn train_step(&self, config: &TrainingJobConfig, epoch: u32, step: u32) -> Result<f64>;

    /// Run one validation batch.
    async fn validate_batch(&self, config: &TrainingJobConfig, index: u32) -> Result<()>;

    /// Compare specialist and generalist on the held-out set.
    async fn measure_advantage(&self, config: &TrainingJobConfig) -> Result<ValidationScores>;

    /// Execute one deployment sub-step.
    async fn deploy_step(&self, config: &TrainingJobConfig, step: DeployStep) -> Result<()>;
}

/// Paced in-process simulation writing a real artefact tree under
/// `<workspace>/<worker>/{datasets,models,results,logs}`.
pub struct SimulatedRunner {
    workspace: PathBuf,
    pace: Duration,
}

const GENERALIST_BASELINE: f64 = 0.65;
const SAMPLE_DATASET_LINES: u64 = 100;

impl SimulatedRunner {
    pub fn new(workspace: impl Into<PathBuf>, pace: Duration) -> Self {
        Self {
            workspace: workspace.into(),
            pace,
        }
    }

    fn worker_dir(&self, config: &TrainingJobConfig) -> PathBuf {
        self.workspace.join(config.worker.as_str())
    }

    async fn throttle(&self) {
        if !self.pace.is_zero() {
            tokio::time::sleep(self.pace).await;
        }
    }

    async fn write_json(path: &Path, value: &serde_json::Value) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, serde_json::to_vec_pretty(value)?).await?;
        Ok(())
    }
}

#[async_trait]
impl StageRunner for SimulatedRunner {
    async fn collect_chunk(
        &self,
        config: &TrainingJobConfig,
        already_collected: u64,
        chunk_size: u64,
    ) -> Result<u64> {
        self.throttle().await;

        // The dataset file gets a representative sample, not the full
        // simulated volume.
        if already_collected == 0 {
            let path = self
                .worker_dir(config)
                .join("datasets")
                .join("training_data.jsonl");
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let mut file = tokio::fs::File::create(&path).await?;
            let lines = SAMPLE_DATASET_LINES.min(config.dataset_size_target);
            for i in 0..lines {
                let line = serde_json::to_string(&serde_json::json!({
                    "prompt": format!("Sample {} question {}", config.domain, i),
                    "completion": format!("Sample {} answer {}", config.domain, i),
                }))?;
                file.write_all(line.as_bytes()).await?;
                file.write_all(b"\n").await?;
            }
            file.flush().await?;
        }

        let remaining = config.dataset_size_target.saturating_sub(already_collected);
        Ok(chunk_size.min(remaining))
    }

    async fn process_dataset(&self, _config: &TrainingJobConfig) -> Result<()> {
        self.throttle().await;
        Ok(())
    }

    async fn train_step(&self, config: &TrainingJobConfig, epoch: u32, step: u32) -> Result<f64> {
        self.throttle().await;

        // Exponential loss decay across epochs.
        let frac = epoch as f64 + step as f64 / config.steps_per_epoch.max(1) as f64;
        let loss = 2.5 * 0.7_f64.powf(frac);

        let last_epoch = epoch + 1 == config.training_epochs;
        let last_step = step + 1 == config.steps_per_epoch;
        if last_epoch && last_step {
            let path = self
                .worker_dir(config)
                .join("models")
                .join(format!("{}_finetuned", config.worker))
                .join("config.json");
            Self::write_json(
                &path,
                &serde_json::json!({
                    "model_type": config.base_model,
                    "worker": config.worker,
                    "domain": config.domain,
                    "final_loss": loss,
                }),
            )
            .await?;
        }

        Ok(loss)
    }

    async fn validate_batch(&self, _config: &TrainingJobConfig, _index: u32) -> Result<()> {
        self.throttle().await;
        Ok(())
    }

    async fn measure_advantage(&self, config: &TrainingJobConfig) -> Result<ValidationScores> {
        self.throttle().await;

        let scores = ValidationScores {
            generalist_score: GENERALIST_BASELINE,
            specialist_score: GENERALIST_BASELINE * (1.0 + config.advantage_target),
        };

        let path = self
            .worker_dir(config)
            .join("results")
            .join("validation.json");
        Self::write_json(
            &path,
            &serde_json::json!({
                "generalist_score": scores.generalist_score,
                "specialist_score": scores.specialist_score,
                "validation_size": config.validation_size,
            }),
        )
        .await?;

        Ok(scores)
    }

    async fn deploy_step(&self, config: &TrainingJobConfig, step: DeployStep) -> Result<()> {
        self.throttle().await;

        if step == DeployStep::WriteServiceConfig {
            let path = self
                .worker_dir(config)
                .join("results")
                .join("service_config.json");
            Self::write_json(
                &path,
                &serde_json::json!({
                    "worker": config.worker,
                    "port": config.port,
                    "model_path": format!("models/{}_finetuned", config.worker),
                }),
            )
            .await?;
        }

        Ok(())
    }
}
