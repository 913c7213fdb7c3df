//! Typed HTTP client for a single worker.
//!
//! One method that matters: [`WorkerClient::generate`]. Timeouts are owned
//! by the caller; retry policy lives in the router, not here. Failures are
//! classified into [`WorkerErrorKind`] with the worker key attached.

use ninefold_core::types::{WorkerKey, WorkerSpec};
use ninefold_core::{Error, Result, WorkerErrorKind};
use reqwest::Client as ReqwestClient;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

const DEFAULT_MAX_CONNECTIONS: usize = 32;

#[derive(Clone, Debug)]
pub struct WorkerClientConfig {
    /// Host every worker listens on; ports come from the catalogue.
    pub host: String,
    pub max_connections: usize,
}

impl Default for WorkerClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    prompt: &'a str,
    max_tokens: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct GenerateResponse {
    text: String,
    #[serde(default)]
    meta: Option<serde_json::Value>,
}

/// A successful generate call, with the measured round-trip latency.
#[derive(Debug, Clone, Serialize)]
pub struct GenerateOutcome {
    pub worker: WorkerKey,
    pub text: String,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

/// Payload of a worker's `GET /health` endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HealthReport {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub response_time_ms: f64,
    #[serde(default)]
    pub requests_served: u64,
    #[serde(default)]
    pub uptime_seconds: f64,
    #[serde(default)]
    pub cpu_percent: f64,
    #[serde(default)]
    pub memory_mb: f64,
    #[serde(default)]
    pub gpu_memory_mb: f64,
    #[serde(default)]
    pub error_count: u64,
}

pub struct WorkerClient {
    config: WorkerClientConfig,
    client: ReqwestClient,
}

impl WorkerClient {
    pub fn new(config: WorkerClientConfig) -> Self {
        let client = ReqwestClient::builder()
            .pool_max_idle_per_host(config.max_connections)
            .build()
            .expect("Failed to build HTTP client");

        Self { config, client }
    }

    fn base_url(&self, spec: &WorkerSpec) -> String {
        format!("http://{}:{}", self.config.host, spec.port)
    }

    fn classify(worker: WorkerKey, e: reqwest::Error) -> Error {
        let kind = if e.is_timeout() {
            WorkerErrorKind::Timeout
        } else if e.is_connect() {
            WorkerErrorKind::Unreachable
        } else if e.is_decode() {
            WorkerErrorKind::Malformed
        } else {
            WorkerErrorKind::Unreachable
        };
        Error::worker(worker, kind, e.to_string())
    }

    /// Send one prompt to one worker and wait for the generated text.
    pub async fn generate(
        &self,
        spec: &WorkerSpec,
        prompt: &str,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<GenerateOutcome> {
        let url = format!("{}/api/generate", self.base_url(spec));
        let start = Instant::now();

        let response = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(&GenerateRequest { prompt, max_tokens })
            .send()
            .await
            .map_err(|e| Self::classify(spec.key, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::worker(
                spec.key,
                WorkerErrorKind::Http(status.as_u16()),
                format!("{} returned {}", spec.key, status),
            ));
        }

        let body: GenerateResponse = response.json().await.map_err(|e| {
            Error::worker(spec.key, WorkerErrorKind::Malformed, e.to_string())
        })?;

        Ok(GenerateOutcome {
            worker: spec.key,
            text: body.text,
            latency_ms: start.elapsed().as_millis() as u64,
            meta: body.meta,
        })
    }

    /// Probe a worker's health endpoint.
    pub async fn health(&self, spec: &WorkerSpec, timeout: Duration) -> Result<HealthReport> {
        let url = format!("{}/health", self.base_url(spec));

        let response = self
            .client
            .get(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| Self::classify(spec.key, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::worker(
                spec.key,
                WorkerErrorKind::Http(status.as_u16()),
                format!("health check returned {}", status),
            ));
        }

        response.json().await.map_err(|e| {
            Error::worker(spec.key, WorkerErrorKind::Malformed, e.to_string())
        })
    }
}
