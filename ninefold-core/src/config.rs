//! Layered configuration: built-in defaults, an optional TOML file, then
//! `NINEFOLD__*` environment variables.

use crate::catalogue::{Catalogue, default_catalogue};
use crate::types::{Tier, WorkerKey, WorkerSpec};
use crate::Result;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NinefoldConfig {
    /// Gateway bind address.
    pub bind_host: String,
    pub bind_port: u16,
    /// Host the worker fleet listens on.
    pub worker_host: String,

    /// HS256 signing secret. Empty means "generate one at startup";
    /// tokens then do not survive a restart.
    pub token_secret: String,
    pub token_lifetime_s: u64,

    pub rate_limit_window_s: u64,
    pub rate_limit_base: u32,
    pub tier_multipliers: TierMultipliers,

    pub cache_enabled: bool,
    pub cache_ttl_s: u64,
    pub cache_capacity: usize,

    pub probe_interval_s: u64,
    pub probe_timeout_s: u64,
    pub default_inference_timeout_s: u64,
    pub synthesis_timeout_s: u64,

    pub worker_catalogue: Vec<WorkerSpec>,
    pub training: TrainingSettings,
}

impl Default for NinefoldConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            bind_port: 8000,
            worker_host: "localhost".to_string(),
            token_secret: String::new(),
            token_lifetime_s: 24 * 3600,
            rate_limit_window_s: 60,
            rate_limit_base: 60,
            tier_multipliers: TierMultipliers::default(),
            cache_enabled: true,
            cache_ttl_s: 3600,
            cache_capacity: 10_000,
            probe_interval_s: 30,
            probe_timeout_s: 5,
            default_inference_timeout_s: 30,
            synthesis_timeout_s: 60,
            worker_catalogue: default_catalogue(),
            training: TrainingSettings::default(),
        }
    }
}

impl NinefoldConfig {
    /// Load configuration from `$NINEFOLD_CONFIG` (or `ninefold.toml` in
    /// the working directory) overlaid with `NINEFOLD__*` env vars.
    pub fn load() -> Result<Self> {
        let path = std::env::var("NINEFOLD_CONFIG").ok();
        Self::load_from(path.as_deref())
    }

    pub fn load_from(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        builder = match path {
            Some(path) => builder.add_source(config::File::with_name(path)),
            None => builder.add_source(config::File::with_name("ninefold").required(false)),
        };
        let settings = builder
            .add_source(config::Environment::with_prefix("NINEFOLD").separator("__"))
            .build()?;

        let cfg: NinefoldConfig = settings.try_deserialize()?;
        cfg.catalogue()?;
        Ok(cfg)
    }

    /// Validate and freeze the configured worker table.
    pub fn catalogue(&self) -> Result<Catalogue> {
        Catalogue::new(self.worker_catalogue.clone())
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_s)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_s)
    }

    pub fn inference_timeout(&self) -> Duration {
        Duration::from_secs(self.default_inference_timeout_s)
    }

    pub fn synthesis_timeout(&self) -> Duration {
        Duration::from_secs(self.synthesis_timeout_s)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_s)
    }

    pub fn token_lifetime(&self) -> Duration {
        Duration::from_secs(self.token_lifetime_s)
    }
}

/// Rate-limit capacity multipliers per tier.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TierMultipliers {
    pub free: u32,
    pub beta: u32,
    pub premium: u32,
}

impl Default for TierMultipliers {
    fn default() -> Self {
        Self {
            free: 1,
            beta: 5,
            premium: 5,
        }
    }
}

impl TierMultipliers {
    pub fn for_tier(&self, tier: Tier) -> u32 {
        match tier {
            Tier::Free => self.free,
            Tier::Beta => self.beta,
            Tier::Premium => self.premium,
        }
    }
}

/// Training supervisor settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    /// Root of the artefact tree (`<workspace>/<worker>/{datasets,models,results,logs}`).
    pub workspace_dir: PathBuf,
    /// Ordered phase plan for phase-parallel orchestration.
    pub phases: Vec<TrainingPhase>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrainingPhase {
    pub name: String,
    pub workers: Vec<WorkerKey>,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        fn phase(name: &str, workers: &[WorkerKey]) -> TrainingPhase {
            TrainingPhase {
                name: name.to_string(),
                workers: workers.to_vec(),
            }
        }

        Self {
            workspace_dir: PathBuf::from("./workspace"),
            phases: vec![
                phase(
                    "core",
                    &[WorkerKey::Rhys, WorkerKey::Ketheriel, WorkerKey::Ake],
                ),
                phase("expansion", &[WorkerKey::Wraith, WorkerKey::Flux]),
                phase("coordination", &[WorkerKey::Kairos, WorkerKey::Chalyth]),
                phase(
                    "communication",
                    &[WorkerKey::Seraphel, WorkerKey::Vireon],
                ),
            ],
        }
    }
}
