//! Per-principal token-bucket rate limiting.
//!
//! Capacity is `base × tier multiplier`; refill is continuous at
//! `capacity / window` tokens per second. Buckets are created lazily and
//! locked independently, so one principal never contends with another.

use dashmap::DashMap;
use ninefold_core::config::TierMultipliers;
use ninefold_core::types::Tier;
use ninefold_core::{Error, Result};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    pub base_capacity: u32,
    pub window: Duration,
    pub multipliers: TierMultipliers,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            base_capacity: 60,
            window: Duration::from_secs(60),
            multipliers: TierMultipliers::default(),
        }
    }
}

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn full(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_update: now,
        }
    }

    /// Refill from elapsed time, clamped to capacity.
    fn refill(&mut self, capacity: f64, window: Duration, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();
        let rate = capacity / window.as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(capacity);
        self.last_update = now;
    }
}

pub struct RateLimiter {
    config: RateLimiterConfig,
    buckets: DashMap<String, TokenBucket>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            buckets: DashMap::new(),
        }
    }

    fn capacity(&self, tier: Tier) -> f64 {
        (self.config.base_capacity as u64 * self.config.multipliers.for_tier(tier) as u64) as f64
    }

    /// Admit one request for a principal, or fail with `RateLimited`.
    /// Returns the tokens remaining after the decrement.
    pub fn admit(&self, username: &str, tier: Tier) -> Result<u32> {
        self.admit_at(username, tier, Instant::now())
    }

    // Separated for deterministic boundary tests.
    fn admit_at(&self, username: &str, tier: Tier, now: Instant) -> Result<u32> {
        let capacity = self.capacity(tier);
        // The entry guard is the per-bucket lock: refill and decrement
        // are atomic with respect to other callers.
        let mut bucket = self
            .buckets
            .entry(username.to_string())
            .or_insert_with(|| TokenBucket::full(capacity, now));

        bucket.refill(capacity, self.config.window, now);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(bucket.tokens.floor() as u32)
        } else {
            Err(Error::RateLimited {
                remaining: bucket.tokens.floor() as u32,
                retry_after_s: self.config.window.as_secs(),
            })
        }
    }

    /// Tokens currently available without consuming one.
    pub fn remaining(&self, username: &str, tier: Tier) -> u32 {
        self.remaining_at(username, tier, Instant::now())
    }

    fn remaining_at(&self, username: &str, tier: Tier, now: Instant) -> u32 {
        let capacity = self.capacity(tier);
        match self.buckets.get_mut(username) {
            Some(mut bucket) => {
                bucket.refill(capacity, self.config.window, now);
                bucket.tokens.floor() as u32
            }
            None => capacity.floor() as u32,
        }
    }

    pub fn tracked_principals(&self) -> usize {
        self.buckets.len()
    }
}
