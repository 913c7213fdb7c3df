//! Static worker catalogue.
//!
//! The catalogue is read-only after startup. Ports and descriptions can be
//! overridden through configuration, but the worker population itself is
//! closed: exactly one worker per domain.

use crate::types::{Domain, WorkerKey, WorkerSpec};
use crate::{Error, Result};
use std::collections::BTreeMap;

/// Built-in definitions of the nine workers.
pub fn default_catalogue() -> Vec<WorkerSpec> {
    fn spec(key: WorkerKey, port: u16, description: &str, specialization: &str) -> WorkerSpec {
        WorkerSpec {
            key,
            port,
            domain: key.domain(),
            description: description.to_string(),
            specialization: specialization.to_string(),
        }
    }

    vec![
        spec(
            WorkerKey::Ake,
            8100,
            "Master synthesizer - integrates multiple perspectives",
            "Multi-agent synthesis and unified responses",
        ),
        spec(
            WorkerKey::Rhys,
            8110,
            "Architecture specialist - system design and infrastructure",
            "Technical architecture, scalability, infrastructure",
        ),
        spec(
            WorkerKey::Ketheriel,
            8120,
            "Wisdom specialist - philosophy and deep knowledge",
            "Philosophy, ethics, contemplative wisdom",
        ),
        spec(
            WorkerKey::Wraith,
            8130,
            "Security specialist - analysis and protection",
            "Security assessment, vulnerability analysis",
        ),
        spec(
            WorkerKey::Flux,
            8140,
            "Transformation specialist - change and adaptation",
            "Change management, adaptation strategies",
        ),
        spec(
            WorkerKey::Kairos,
            8150,
            "Timing specialist - opportunity and moment",
            "Timing analysis, opportunity recognition",
        ),
        spec(
            WorkerKey::Chalyth,
            8160,
            "Strategy specialist - coordination and planning",
            "Strategic planning, coordination patterns",
        ),
        spec(
            WorkerKey::Seraphel,
            8170,
            "Communication specialist - harmony and dialogue",
            "Communication excellence, harmonious dialogue",
        ),
        spec(
            WorkerKey::Vireon,
            8180,
            "Protection specialist - integrity and boundaries",
            "Integrity verification, protective measures",
        ),
    ]
}

/// Validated, immutable worker table with domain/key lookups.
#[derive(Debug, Clone)]
pub struct Catalogue {
    workers: BTreeMap<WorkerKey, WorkerSpec>,
}

impl Catalogue {
    /// Build a catalogue from specs, enforcing the one-worker-per-domain
    /// bijection and distinct ports.
    pub fn new(specs: Vec<WorkerSpec>) -> Result<Self> {
        let mut workers = BTreeMap::new();
        let mut seen_domains = Vec::new();
        let mut seen_ports = Vec::new();

        for spec in specs {
            if spec.key.domain() != spec.domain {
                return Err(Error::Config(format!(
                    "worker {} is bound to domain {}, not {}",
                    spec.key,
                    spec.key.domain(),
                    spec.domain
                )));
            }
            if seen_domains.contains(&spec.domain) {
                return Err(Error::Config(format!("duplicate domain: {}", spec.domain)));
            }
            if seen_ports.contains(&spec.port) {
                return Err(Error::Config(format!("duplicate port: {}", spec.port)));
            }
            seen_domains.push(spec.domain);
            seen_ports.push(spec.port);
            workers.insert(spec.key, spec);
        }

        if workers.len() != WorkerKey::ALL.len() {
            return Err(Error::Config(format!(
                "catalogue must define all {} workers, got {}",
                WorkerKey::ALL.len(),
                workers.len()
            )));
        }

        Ok(Self { workers })
    }

    pub fn get(&self, key: WorkerKey) -> &WorkerSpec {
        // new() guarantees every key is present
        &self.workers[&key]
    }

    pub fn find_by_domain(&self, domain: Domain) -> &WorkerSpec {
        self.get(domain.worker())
    }

    /// All specs in stable key order.
    pub fn iter(&self) -> impl Iterator<Item = &WorkerSpec> {
        self.workers.values()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

impl Default for Catalogue {
    fn default() -> Self {
        // The built-in catalogue always satisfies the invariants.
        Self::new(default_catalogue()).expect("default catalogue is valid")
    }
}
