//! Worker fleet management for Ninefold.
//!
//! This crate owns the immutable worker catalogue, the mutable per-worker
//! status map refreshed by a background health probe, and the typed HTTP
//! client used to talk to a single worker's generate endpoint.

pub mod client;
pub mod registry;

pub use client::{GenerateOutcome, HealthReport, WorkerClient, WorkerClientConfig};
pub use registry::{FleetSummary, WorkerRegistry, WorkerView};

#[cfg(test)]
mod tests;
