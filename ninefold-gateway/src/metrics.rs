//! Gateway metrics sink.
//!
//! Lock-free counters for the totals, short-lived per-key locks for the
//! maps. Pure sink: nothing in the request path ever reads it except the
//! metrics endpoint.

use dashmap::DashMap;
use ninefold_core::types::Tier;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
struct EndpointTiming {
    count: u64,
    total_ms: u64,
}

#[derive(Default)]
pub struct MetricsAggregator {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    total_response_time_ms: AtomicU64,
    by_endpoint: DashMap<String, u64>,
    by_user: DashMap<String, u64>,
    by_tier: DashMap<Tier, u64>,
    timing_by_endpoint: DashMap<String, EndpointTiming>,
}

/// Aggregated view served by the metrics endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub success_rate: f64,
    pub average_response_time_ms: f64,
    pub requests_by_endpoint: BTreeMap<String, u64>,
    pub requests_by_user: BTreeMap<String, u64>,
    pub requests_by_tier: BTreeMap<Tier, u64>,
    pub response_time_ms_by_endpoint: BTreeMap<String, f64>,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(
        &self,
        endpoint: &str,
        username: &str,
        tier: Tier,
        response_time_ms: u64,
        success: bool,
    ) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
        self.total_response_time_ms
            .fetch_add(response_time_ms, Ordering::Relaxed);

        *self.by_endpoint.entry(endpoint.to_string()).or_insert(0) += 1;
        *self.by_user.entry(username.to_string()).or_insert(0) += 1;
        *self.by_tier.entry(tier).or_insert(0) += 1;

        let mut timing = self
            .timing_by_endpoint
            .entry(endpoint.to_string())
            .or_default();
        timing.count += 1;
        timing.total_ms += response_time_ms;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let total = self.total_requests.load(Ordering::Relaxed);
        let successful = self.successful_requests.load(Ordering::Relaxed);
        let failed = self.failed_requests.load(Ordering::Relaxed);
        let total_ms = self.total_response_time_ms.load(Ordering::Relaxed);

        MetricsSnapshot {
            total_requests: total,
            successful_requests: successful,
            failed_requests: failed,
            success_rate: if total == 0 {
                0.0
            } else {
                successful as f64 / total as f64
            },
            average_response_time_ms: if total == 0 {
                0.0
            } else {
                total_ms as f64 / total as f64
            },
            requests_by_endpoint: self
                .by_endpoint
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
            requests_by_user: self
                .by_user
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
            requests_by_tier: self
                .by_tier
                .iter()
                .map(|e| (*e.key(), *e.value()))
                .collect(),
            response_time_ms_by_endpoint: self
                .timing_by_endpoint
                .iter()
                .map(|e| {
                    let avg = if e.count == 0 {
                        0.0
                    } else {
                        e.total_ms as f64 / e.count as f64
                    };
                    (e.key().clone(), avg)
                })
                .collect(),
        }
    }
}
