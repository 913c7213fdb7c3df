//! Worker registry and health monitor.
//!
//! The registry holds the read-only catalogue plus a concurrently-readable
//! status map. Only the probe task (and the training supervisor's
//! deployment hook) writes status records; each record is published as a
//! whole so readers never observe a torn view.

use crate::client::{WorkerClient, WorkerClientConfig};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ninefold_core::types::{Domain, WorkerKey, WorkerSpec, WorkerState, WorkerStatus};
use ninefold_core::{Catalogue, Error, WorkerErrorKind};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-worker keyword weights used by [`WorkerRegistry::recommend`].
/// Distinct from the analyser's regex dictionary: this is a coarse
/// direct-dispatch hint, not a routing plan.
const RECOMMEND_KEYWORDS: [(WorkerKey, &[&str]); 9] = [
    (
        WorkerKey::Ake,
        &["synthesis", "integrate", "combine", "multiple", "collective", "unity"],
    ),
    (
        WorkerKey::Rhys,
        &["architecture", "system", "design", "infrastructure", "scalability", "technical"],
    ),
    (
        WorkerKey::Ketheriel,
        &["wisdom", "philosophy", "ethics", "meaning", "contemplat", "deep"],
    ),
    (
        WorkerKey::Wraith,
        &["security", "vulnerability", "protect", "threat", "analysis", "risk"],
    ),
    (
        WorkerKey::Flux,
        &["change", "transform", "adapt", "evolution", "transition"],
    ),
    (
        WorkerKey::Kairos,
        &["timing", "when", "opportunity", "moment", "schedule"],
    ),
    (
        WorkerKey::Chalyth,
        &["strategy", "plan", "coordinate", "organize", "tactics"],
    ),
    (
        WorkerKey::Seraphel,
        &["communication", "dialogue", "message", "speak", "harmony"],
    ),
    (
        WorkerKey::Vireon,
        &["integrity", "boundary", "protect", "guard", "maintain"],
    ),
];

/// Catalogue entry plus live status, as served by the gateway.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerView {
    #[serde(flatten)]
    pub spec: WorkerSpec,
    pub status: WorkerStatus,
    pub available: bool,
}

/// Fleet-wide snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct FleetSummary {
    pub timestamp: DateTime<Utc>,
    pub manager_uptime_seconds: f64,
    pub total_workers: usize,
    pub running_workers: usize,
    pub workers: Vec<WorkerView>,
    pub available: Vec<WorkerKey>,
}

pub struct WorkerRegistry {
    catalogue: Catalogue,
    status: DashMap<WorkerKey, WorkerStatus>,
    client: Arc<WorkerClient>,
    probe_interval: Duration,
    probe_timeout: Duration,
    started_at: Instant,
}

impl WorkerRegistry {
    pub fn new(
        catalogue: Catalogue,
        client_config: WorkerClientConfig,
        probe_interval: Duration,
        probe_timeout: Duration,
    ) -> Self {
        let status = DashMap::new();
        for spec in catalogue.iter() {
            status.insert(spec.key, WorkerStatus::unknown());
        }

        Self {
            catalogue,
            status,
            client: Arc::new(WorkerClient::new(client_config)),
            probe_interval,
            probe_timeout,
            started_at: Instant::now(),
        }
    }

    /// Shared handle to the worker HTTP client.
    pub fn client(&self) -> Arc<WorkerClient> {
        Arc::clone(&self.client)
    }

    pub fn catalogue(&self) -> &Catalogue {
        &self.catalogue
    }

    pub fn spec(&self, key: WorkerKey) -> &WorkerSpec {
        self.catalogue.get(key)
    }

    pub fn list(&self) -> Vec<WorkerSpec> {
        self.catalogue.iter().cloned().collect()
    }

    /// Snapshot of one worker's status.
    pub fn status(&self, key: WorkerKey) -> WorkerStatus {
        self.status
            .get(&key)
            .map(|entry| entry.clone())
            .unwrap_or_else(WorkerStatus::unknown)
    }

    /// A worker counts as available only while its latest successful probe
    /// is younger than three probe intervals.
    pub fn is_available(&self, key: WorkerKey) -> bool {
        let status = self.status(key);
        if status.state != WorkerState::Running {
            return false;
        }
        match status.last_probe_at {
            Some(at) => {
                let age = Utc::now().signed_duration_since(at);
                let horizon = self.probe_interval * 3;
                age.to_std().map(|age| age <= horizon).unwrap_or(true)
            }
            None => false,
        }
    }

    /// Workers currently in the live set, in catalogue order.
    pub fn available(&self) -> Vec<WorkerKey> {
        self.catalogue
            .iter()
            .map(|spec| spec.key)
            .filter(|key| self.is_available(*key))
            .collect()
    }

    pub fn find_by_domain(&self, domain: Domain) -> WorkerKey {
        self.catalogue.find_by_domain(domain).key
    }

    /// Keyword-weighted recommendation over the live set. Ties break in
    /// declaration order; with no keyword hits the first available worker
    /// is returned, and with an empty live set there is no answer.
    pub fn recommend(&self, query: &str) -> Option<WorkerKey> {
        let query_lower = query.to_lowercase();
        let available = self.available();
        if available.is_empty() {
            return None;
        }

        let mut best: Option<(WorkerKey, usize)> = None;
        for (key, keywords) in RECOMMEND_KEYWORDS {
            if !available.contains(&key) {
                continue;
            }
            let score = keywords
                .iter()
                .filter(|kw| query_lower.contains(*kw))
                .count();
            if score > 0 && best.map(|(_, s)| score > s).unwrap_or(true) {
                best = Some((key, score));
            }
        }

        best.map(|(key, _)| key).or_else(|| available.first().copied())
    }

    /// Deployment hook: force a worker into the live set immediately
    /// instead of waiting for the next probe cycle.
    pub fn mark_running(&self, key: WorkerKey) {
        let mut status = self.status(key);
        status.state = WorkerState::Running;
        status.last_probe_at = Some(Utc::now());
        self.status.insert(key, status);
        info!(worker = %key, "worker registered into live set");
    }

    /// Probe one worker and publish the refreshed status record.
    pub async fn probe(&self, key: WorkerKey) -> bool {
        let spec = self.catalogue.get(key);
        match self.client.health(spec, self.probe_timeout).await {
            Ok(report) => {
                self.status.insert(
                    key,
                    WorkerStatus {
                        state: WorkerState::Running,
                        last_probe_at: Some(Utc::now()),
                        response_time_ms: report.response_time_ms,
                        uptime_seconds: report.uptime_seconds,
                        requests_served: report.requests_served,
                        error_count: report.error_count,
                        cpu_percent: report.cpu_percent,
                        memory_mb: report.memory_mb,
                        gpu_memory_mb: report.gpu_memory_mb,
                    },
                );
                true
            }
            Err(e) => {
                let state = match &e {
                    Error::Worker {
                        kind: WorkerErrorKind::Unreachable,
                        ..
                    } => WorkerState::Stopped,
                    _ => WorkerState::Error,
                };
                let previous = self.status(key);
                self.status.insert(
                    key,
                    WorkerStatus {
                        state,
                        last_probe_at: Some(Utc::now()),
                        error_count: previous.error_count,
                        ..WorkerStatus::unknown()
                    },
                );
                debug!(worker = %key, error = %e, "health probe failed");
                false
            }
        }
    }

    /// Probe the whole fleet; returns how many workers are running.
    pub async fn probe_all(&self) -> usize {
        let mut running = 0;
        for spec in self.catalogue.iter() {
            if self.probe(spec.key).await {
                running += 1;
            }
        }
        running
    }

    /// Spawn the periodic probe loop. The task is owned by the caller and
    /// stops when `cancel` fires.
    pub fn spawn_probe_task(
        self: &Arc<Self>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            info!(
                interval_s = registry.probe_interval.as_secs(),
                "starting fleet health monitoring"
            );
            let mut ticker = tokio::time::interval(registry.probe_interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("stopping fleet health monitoring");
                        break;
                    }
                    _ = ticker.tick() => {
                        let running = registry.probe_all().await;
                        let total = registry.catalogue.len();
                        if running < total {
                            warn!(running, total, "fleet degraded");
                        } else {
                            debug!(running, total, "fleet healthy");
                        }
                    }
                }
            }
        })
    }

    /// Snapshot of the whole fleet for the gateway's workers endpoint.
    pub fn summary(&self) -> FleetSummary {
        let workers: Vec<WorkerView> = self
            .catalogue
            .iter()
            .map(|spec| WorkerView {
                spec: spec.clone(),
                status: self.status(spec.key),
                available: self.is_available(spec.key),
            })
            .collect();
        let running = workers
            .iter()
            .filter(|w| w.status.state == WorkerState::Running)
            .count();

        FleetSummary {
            timestamp: Utc::now(),
            manager_uptime_seconds: self.started_at.elapsed().as_secs_f64(),
            total_workers: workers.len(),
            running_workers: running,
            available: self.available(),
            workers,
        }
    }
}
