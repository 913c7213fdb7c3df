//! Per-worker stage machine and fleet-wide orchestration.

use crate::job::{TrainingJob, TrainingJobConfig, ValidationOutcome};
use crate::runner::{DeployStep, StageRunner};
use chrono::Utc;
use dashmap::DashMap;
use ninefold_core::config::TrainingSettings;
use ninefold_core::types::{TrainingStage, WorkerKey};
use ninefold_core::{Catalogue, Error, Result};
use ninefold_fleet::WorkerRegistry;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Examples fetched per collection round.
const COLLECTION_CHUNK: u64 = 5_000;

/// How the fleet-wide run schedules its jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestrationMode {
    /// One job at a time.
    Sequential,
    /// All jobs concurrently.
    Parallel,
    /// Configured phases run in order; jobs inside a phase run together.
    PhaseParallel,
}

/// Outcome of a fleet-wide run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub results: BTreeMap<WorkerKey, bool>,
    pub report_path: PathBuf,
}

pub struct TrainingSupervisor {
    settings: TrainingSettings,
    configs: BTreeMap<WorkerKey, TrainingJobConfig>,
    runner: Arc<dyn StageRunner>,
    registry: Arc<WorkerRegistry>,
    jobs: DashMap<WorkerKey, TrainingJob>,
    cancels: DashMap<WorkerKey, CancellationToken>,
}

impl TrainingSupervisor {
    pub fn new(
        settings: TrainingSettings,
        catalogue: &Catalogue,
        runner: Arc<dyn StageRunner>,
        registry: Arc<WorkerRegistry>,
    ) -> Self {
        let configs = catalogue
            .iter()
            .map(|spec| (spec.key, TrainingJobConfig::for_worker(spec)))
            .collect();

        Self {
            settings,
            configs,
            runner,
            registry,
            jobs: DashMap::new(),
            cancels: DashMap::new(),
        }
    }

    /// Replace one worker's training configuration (shorter runs in test
    /// mode, different dataset targets, ...).
    pub fn set_config(&mut self, config: TrainingJobConfig) {
        self.configs.insert(config.worker, config);
    }

    pub fn progress(&self, key: WorkerKey) -> Option<TrainingJob> {
        self.jobs.get(&key).map(|job| job.clone())
    }

    pub fn all_progress(&self) -> BTreeMap<WorkerKey, TrainingJob> {
        self.jobs
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    /// Cancel a running job. The current stage fails with reason
    /// `Cancelled` at its next checkpoint.
    pub fn cancel(&self, key: WorkerKey) -> bool {
        match self.cancels.get(&key) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Run the full pipeline for one worker. Returns whether it reached
    /// `Complete`; failures are recorded on the job, never panicked.
    pub async fn train_worker(&self, key: WorkerKey) -> bool {
        let Some(config) = self.configs.get(&key).cloned() else {
            let mut job = TrainingJob::new(key);
            job.fail(TrainingStage::Idle, "no training configuration");
            self.jobs.insert(key, job);
            return false;
        };

        let cancel = CancellationToken::new();
        self.cancels.insert(key, cancel.clone());
        self.jobs.insert(key, TrainingJob::new(key));

        info!(worker = %key, domain = %config.domain, "starting training pipeline");

        let result = self.pipeline(&config, &cancel).await;
        self.cancels.remove(&key);

        match result {
            Ok(()) => {
                self.update(key, |job| {
                    job.stage = TrainingStage::Complete;
                    job.advance(100.0, "Training pipeline complete");
                    job.estimated_completion = None;
                });
                info!(worker = %key, "training complete");
                true
            }
            Err(Error::Stage { stage, detail }) => {
                warn!(worker = %key, %stage, detail = %detail, "training failed");
                self.update(key, |job| job.fail(stage, detail.clone()));
                false
            }
            Err(e) => {
                warn!(worker = %key, error = %e, "training failed");
                self.update(key, |job| {
                    let stage = job.stage;
                    job.fail(stage, e.to_string());
                });
                false
            }
        }
    }

    async fn pipeline(
        &self,
        config: &TrainingJobConfig,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.ensure_workspace(config).await?;
        self.collect_dataset(config, cancel).await?;
        self.process_dataset(config, cancel).await?;
        self.train_model(config, cancel).await?;
        self.validate(config, cancel).await?;
        self.deploy(config, cancel).await?;
        Ok(())
    }

    async fn ensure_workspace(&self, config: &TrainingJobConfig) -> Result<()> {
        let root = self.settings.workspace_dir.join(config.worker.as_str());
        for subdir in ["datasets", "models", "results", "logs"] {
            tokio::fs::create_dir_all(root.join(subdir))
                .await
                .map_err(|e| stage_error(TrainingStage::Idle, e))?;
        }
        Ok(())
    }

    /// Stage 1: dataset collection, progress band 0-30%.
    async fn collect_dataset(
        &self,
        config: &TrainingJobConfig,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let key = config.worker;
        self.update(key, |job| {
            job.enter_stage(
                TrainingStage::DatasetCollection,
                0.0,
                "Initializing dataset collection",
            );
        });

        let chunk = COLLECTION_CHUNK.min(config.dataset_size_target).max(1);
        let mut collected = 0;
        while collected < config.dataset_size_target {
            check_cancel(cancel, TrainingStage::DatasetCollection)?;

            let got = self
                .runner
                .collect_chunk(config, collected, chunk)
                .await
                .map_err(|e| stage_error(TrainingStage::DatasetCollection, e))?;
            if got == 0 {
                break;
            }
            collected += got;

            let fraction = collected as f64 / config.dataset_size_target as f64;
            self.update(key, |job| {
                job.dataset_collected = collected;
                job.advance(
                    fraction * 30.0,
                    format!(
                        "Collected {}/{} examples",
                        collected, config.dataset_size_target
                    ),
                );
            });
            self.trace(key);
        }

        Ok(())
    }

    /// Stage 2: dataset processing, progress band 30-40%.
    async fn process_dataset(
        &self,
        config: &TrainingJobConfig,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let key = config.worker;
        self.update(key, |job| {
            job.enter_stage(
                TrainingStage::DatasetProcessing,
                30.0,
                "Processing and filtering dataset",
            );
        });
        check_cancel(cancel, TrainingStage::DatasetProcessing)?;

        self.runner
            .process_dataset(config)
            .await
            .map_err(|e| stage_error(TrainingStage::DatasetProcessing, e))?;

        self.update(key, |job| {
            job.advance(40.0, "Dataset processing complete");
        });
        self.trace(key);
        Ok(())
    }

    /// Stage 3: model training, progress band 40-70%.
    async fn train_model(
        &self,
        config: &TrainingJobConfig,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let key = config.worker;
        self.update(key, |job| {
            job.enter_stage(
                TrainingStage::ModelTraining,
                40.0,
                "Initializing model training",
            );
        });

        let total_steps = (config.training_epochs * config.steps_per_epoch).max(1);
        for epoch in 0..config.training_epochs {
            for step in 0..config.steps_per_epoch {
                check_cancel(cancel, TrainingStage::ModelTraining)?;

                let loss = self
                    .runner
                    .train_step(config, epoch, step)
                    .await
                    .map_err(|e| stage_error(TrainingStage::ModelTraining, e))?;

                let done = epoch * config.steps_per_epoch + step + 1;
                let progress = 40.0 + (done as f64 / total_steps as f64) * 30.0;
                self.update(key, |job| {
                    job.training_loss = Some(loss);
                    job.advance(
                        progress,
                        format!(
                            "Epoch {}/{}, Step {}/{}",
                            epoch + 1,
                            config.training_epochs,
                            step + 1,
                            config.steps_per_epoch
                        ),
                    );
                });
            }
            self.trace(key);
        }

        Ok(())
    }

    /// Stage 4: validation, progress band 70-90%. Missing the advantage
    /// target is a warning, not a failure.
    async fn validate(
        &self,
        config: &TrainingJobConfig,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let key = config.worker;
        self.update(key, |job| {
            job.enter_stage(TrainingStage::Validation, 70.0, "Running validation tests");
        });

        for index in 0..config.validation_size {
            check_cancel(cancel, TrainingStage::Validation)?;
            self.runner
                .validate_batch(config, index)
                .await
                .map_err(|e| stage_error(TrainingStage::Validation, e))?;

            let progress =
                70.0 + ((index + 1) as f64 / config.validation_size.max(1) as f64) * 20.0;
            self.update(key, |job| {
                job.advance(
                    progress,
                    format!("Validation test {}/{}", index + 1, config.validation_size),
                );
            });
        }

        let scores = self
            .runner
            .measure_advantage(config)
            .await
            .map_err(|e| stage_error(TrainingStage::Validation, e))?;
        let advantage =
            (scores.specialist_score - scores.generalist_score) / scores.generalist_score;
        let meets_target = advantage + 1e-9 >= config.advantage_target;

        info!(
            worker = %key,
            specialist = scores.specialist_score,
            generalist = scores.generalist_score,
            advantage_pct = advantage * 100.0,
            meets_target,
            "validation results"
        );

        self.update(key, |job| {
            if !meets_target {
                job.warnings.push(format!(
                    "specialist advantage {:.1}% below target {:.1}%; consider retraining with more data",
                    advantage * 100.0,
                    config.advantage_target * 100.0
                ));
            }
            job.validation = Some(ValidationOutcome {
                generalist_score: scores.generalist_score,
                specialist_score: scores.specialist_score,
                advantage,
                meets_target,
                validation_size: config.validation_size,
            });
        });
        self.trace(key);

        Ok(())
    }

    /// Stage 5: deployment, progress band 90-100%. Registration forces
    /// the worker into the registry's live set.
    async fn deploy(
        &self,
        config: &TrainingJobConfig,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let key = config.worker;
        self.update(key, |job| {
            job.enter_stage(
                TrainingStage::Deployment,
                90.0,
                "Deploying model to production",
            );
        });

        let total = DeployStep::ALL.len();
        for (index, step) in DeployStep::ALL.into_iter().enumerate() {
            check_cancel(cancel, TrainingStage::Deployment)?;

            self.runner
                .deploy_step(config, step)
                .await
                .map_err(|e| stage_error(TrainingStage::Deployment, e))?;
            if step == DeployStep::RegisterWorker {
                self.registry.mark_running(key);
            }

            let progress = 90.0 + ((index + 1) as f64 / total as f64) * 10.0;
            self.update(key, |job| job.advance(progress, step.describe()));
        }
        self.trace(key);

        Ok(())
    }

    /// Orchestrate a set of jobs and write the run report.
    pub async fn run(
        &self,
        workers: &[WorkerKey],
        mode: OrchestrationMode,
    ) -> Result<RunSummary> {
        info!(count = workers.len(), ?mode, "starting training run");
        let mut results = BTreeMap::new();

        match mode {
            OrchestrationMode::Sequential => {
                for key in workers {
                    results.insert(*key, self.train_worker(*key).await);
                }
            }
            OrchestrationMode::Parallel => {
                let outcomes = futures::future::join_all(
                    workers
                        .iter()
                        .map(|key| async move { (*key, self.train_worker(*key).await) }),
                )
                .await;
                results.extend(outcomes);
            }
            OrchestrationMode::PhaseParallel => {
                for phase in &self.settings.phases {
                    let members: Vec<WorkerKey> = phase
                        .workers
                        .iter()
                        .copied()
                        .filter(|key| workers.contains(key))
                        .collect();
                    if members.is_empty() {
                        continue;
                    }
                    info!(phase = %phase.name, workers = ?members, "starting phase");
                    let outcomes = futures::future::join_all(
                        members
                            .iter()
                            .map(|key| async move { (*key, self.train_worker(*key).await) }),
                    )
                    .await;
                    results.extend(outcomes);
                }
                // Requested workers outside the phase plan still train,
                // after every phase.
                for key in workers {
                    if !results.contains_key(key) {
                        warn!(worker = %key, "worker absent from phase plan");
                        results.insert(*key, self.train_worker(*key).await);
                    }
                }
            }
        }

        let report_path = self.generate_report().await?;
        Ok(RunSummary {
            results,
            report_path,
        })
    }

    /// Write `training_report.json` at the workspace root.
    pub async fn generate_report(&self) -> Result<PathBuf> {
        let report = serde_json::json!({
            "timestamp": Utc::now(),
            "workspace": self.settings.workspace_dir,
            "progress": self.all_progress(),
        });

        tokio::fs::create_dir_all(&self.settings.workspace_dir).await?;
        let path = self.settings.workspace_dir.join("training_report.json");
        tokio::fs::write(&path, serde_json::to_vec_pretty(&report)?).await?;
        info!(path = %path.display(), "training report written");
        Ok(path)
    }

    fn update(&self, key: WorkerKey, f: impl FnOnce(&mut TrainingJob)) {
        if let Some(mut job) = self.jobs.get_mut(&key) {
            f(&mut job);
        }
    }

    fn trace(&self, key: WorkerKey) {
        if let Some(job) = self.jobs.get(&key) {
            debug!(
                worker = %key,
                stage = %job.stage,
                progress = format!("{:.1}%", job.progress_pct),
                "{}",
                job.current_step
            );
        }
    }
}

fn check_cancel(cancel: &CancellationToken, stage: TrainingStage) -> Result<()> {
    if cancel.is_cancelled() {
        Err(Error::Stage {
            stage,
            detail: "Cancelled".to_string(),
        })
    } else {
        Ok(())
    }
}

fn stage_error(stage: TrainingStage, e: impl std::fmt::Display) -> Error {
    Error::Stage {
        stage,
        detail: e.to_string(),
    }
}
