//! Fingerprint-keyed response cache with single-flight execution.
//!
//! The cache has two jobs: serve fresh results for repeated queries, and
//! guarantee that at most one fan-out per fingerprint is in flight at any
//! instant. Followers subscribe to the leader's result instead of
//! dispatching again. Disabling the cache turns every probe into a miss
//! but keeps single-flight intact.

use crate::result::RouteReply;
use dashmap::DashMap;
use ninefold_core::Error;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::debug;

type FlightResult = Result<RouteReply, Arc<Error>>;

#[derive(Clone)]
struct StoredEntry {
    reply: RouteReply,
    created_at: Instant,
}

struct CacheShared {
    enabled: bool,
    ttl: Duration,
    capacity: usize,
    entries: DashMap<String, StoredEntry>,
    // Serialises leader election; never held across an await point.
    inflight: Mutex<HashMap<String, watch::Receiver<Option<FlightResult>>>>,
}

pub struct ResponseCache {
    shared: Arc<CacheShared>,
}

/// Result of probing the cache for a fingerprint.
pub enum CacheProbe {
    /// A fresh entry existed.
    Hit(RouteReply),
    /// The caller is now the leader and must call [`FlightLease::complete`].
    Lead(FlightLease),
    /// Another call owns the fan-out; wait for its result.
    Wait(FlightFollower),
}

pub struct ResponseCacheConfig {
    pub enabled: bool,
    pub ttl: Duration,
    pub capacity: usize,
}

impl Default for ResponseCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(3600),
            capacity: 10_000,
        }
    }
}

impl ResponseCache {
    pub fn new(config: ResponseCacheConfig) -> Self {
        Self {
            shared: Arc::new(CacheShared {
                enabled: config.enabled,
                ttl: config.ttl,
                capacity: config.capacity.max(1),
                entries: DashMap::new(),
                inflight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Probe for a fingerprint: fresh entry, leadership, or a follower
    /// subscription. Stale entries are dropped on the way through.
    pub fn probe(&self, fingerprint: &str) -> CacheProbe {
        if self.shared.enabled {
            if let Some(entry) = self.shared.entries.get(fingerprint) {
                if entry.created_at.elapsed() < self.shared.ttl {
                    return CacheProbe::Hit(entry.reply.clone());
                }
            }
            // Expired entries are evicted lazily, outside the read guard.
            self.shared
                .entries
                .remove_if(fingerprint, |_, entry| {
                    entry.created_at.elapsed() >= self.shared.ttl
                });
        }

        let mut inflight = self
            .shared
            .inflight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(rx) = inflight.get(fingerprint) {
            return CacheProbe::Wait(FlightFollower { rx: rx.clone() });
        }

        let (tx, rx) = watch::channel(None);
        inflight.insert(fingerprint.to_string(), rx);
        CacheProbe::Lead(FlightLease {
            shared: Arc::clone(&self.shared),
            fingerprint: fingerprint.to_string(),
            tx: Some(tx),
        })
    }

    /// Insert a result directly (used by the leader's lease).
    fn store(shared: &CacheShared, fingerprint: &str, reply: &RouteReply) {
        if !shared.enabled {
            return;
        }

        if shared.entries.len() >= shared.capacity {
            Self::evict_oldest(shared);
        }

        shared.entries.insert(
            fingerprint.to_string(),
            StoredEntry {
                reply: reply.clone(),
                created_at: Instant::now(),
            },
        );
    }

    fn evict_oldest(shared: &CacheShared) {
        let oldest = shared
            .entries
            .iter()
            .min_by_key(|entry| entry.created_at)
            .map(|entry| entry.key().clone());
        if let Some(key) = oldest {
            debug!(fingerprint = %key, "evicting oldest cache entry");
            shared.entries.remove(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.shared.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.entries.is_empty()
    }
}

/// Leadership over one fingerprint's fan-out. Completing the lease stores
/// the result and wakes every follower; dropping it uncompleted publishes
/// an abort so followers never hang.
pub struct FlightLease {
    shared: Arc<CacheShared>,
    fingerprint: String,
    tx: Option<watch::Sender<Option<FlightResult>>>,
}

impl FlightLease {
    pub fn complete(mut self, result: &Result<RouteReply, Error>) {
        let Some(tx) = self.tx.take() else {
            return;
        };

        let outcome = match result {
            Ok(reply) => {
                ResponseCache::store(&self.shared, &self.fingerprint, reply);
                Ok(reply.clone())
            }
            Err(e) => Err(Arc::new(e.duplicate())),
        };

        Self::release(&self.shared, &self.fingerprint);
        // Receivers may all be gone; that is fine.
        let _ = tx.send(Some(outcome));
    }

    fn release(shared: &CacheShared, fingerprint: &str) {
        let mut inflight = shared
            .inflight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        inflight.remove(fingerprint);
    }
}

impl Drop for FlightLease {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            Self::release(&self.shared, &self.fingerprint);
            let _ = tx.send(Some(Err(Arc::new(Error::Internal(
                "in-flight request aborted".to_string(),
            )))));
        }
    }
}

/// Subscription to a leader's in-flight result.
pub struct FlightFollower {
    rx: watch::Receiver<Option<FlightResult>>,
}

impl FlightFollower {
    pub async fn wait(mut self) -> Result<RouteReply, Error> {
        let result = self
            .rx
            .wait_for(|value| value.is_some())
            .await
            .map_err(|_| Error::Internal("in-flight leader vanished".to_string()))?;

        match result.as_ref() {
            Some(Ok(reply)) => Ok(reply.clone()),
            Some(Err(e)) => Err(e.duplicate()),
            None => Err(Error::Internal("in-flight result missing".to_string())),
        }
    }
}
