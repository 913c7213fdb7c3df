//! Training supervisor for the Ninefold worker fleet.
//!
//! Drives each worker through a one-way stage machine (dataset collection,
//! processing, training, validation, deployment) with live progress, then
//! hands the finished worker to the fleet registry. Stage compute is an
//! opaque seam so production training and fast simulation share the same
//! supervisor.

pub mod job;
pub mod runner;
pub mod supervisor;

pub use job::{TrainingJob, TrainingJobConfig, ValidationOutcome};
pub use runner::{DeployStep, SimulatedRunner, StageRunner, ValidationScores};
pub use supervisor::{OrchestrationMode, RunSummary, TrainingSupervisor};
