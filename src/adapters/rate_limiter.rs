//! Per-Provider Rate Limiter
//!
//! Independent token bucket per provider. Buckets start full and refill
//! continuously at `calls_per_period / period`, capped at `calls_per_period`.
//!
//! - `acquire` sleeps (never spins) until the bucket can grant the permit
//! - `try_acquire` never waits
//! - `penalize` applies a 429 cooldown: drains the bucket and blocks
//!   admission until the cooldown passes
//!
//! Requests that can never be satisfied fail fast instead of waiting forever.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use crate::domain::Provider;

/// Slack for float error when comparing token counts
const TOKEN_EPSILON: f64 = 1e-9;

/// Rate limiter errors (all of them are misconfigurations)
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RateLimitError {
    #[error("{provider}: requested {requested} permits but the bucket holds at most {capacity}")]
    ExceedsCapacity {
        provider: Provider,
        requested: u32,
        capacity: u32,
    },
    #[error("No rate limit configured for {0}")]
    UnknownProvider(Provider),
    #[error("Invalid rate limit for {provider}: {reason}")]
    InvalidQuota { provider: Provider, reason: String },
}

/// Calls allowed per period
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitQuota {
    pub calls_per_period: u32,
    pub period: Duration,
}

impl RateLimitQuota {
    pub fn new(calls_per_period: u32, period: Duration) -> Self {
        Self {
            calls_per_period,
            period,
        }
    }

    /// Convenience for requests-per-minute quotas
    pub fn per_minute(calls: u32) -> Self {
        Self::new(calls, Duration::from_secs(60))
    }

    fn validate(&self, provider: Provider) -> Result<(), RateLimitError> {
        if self.calls_per_period == 0 {
            return Err(RateLimitError::InvalidQuota {
                provider,
                reason: "calls_per_period must be > 0".into(),
            });
        }
        if self.period.is_zero() {
            return Err(RateLimitError::InvalidQuota {
                provider,
                reason: "period must be > 0".into(),
            });
        }
        Ok(())
    }
}

/// Proof of admission handed back by `acquire`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permit {
    pub provider: Provider,
    pub permits: u32,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
    cooldown_until: Option<Instant>,
}

#[derive(Debug)]
struct TokenBucket {
    capacity: u32,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    fn new(quota: RateLimitQuota) -> Self {
        Self {
            capacity: quota.calls_per_period,
            refill_per_sec: quota.calls_per_period as f64 / quota.period.as_secs_f64(),
            state: Mutex::new(BucketState {
                tokens: quota.calls_per_period as f64,
                last_refill: Instant::now(),
                cooldown_until: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity as f64);
        state.last_refill = now;
    }

    /// Take `n` tokens, or report how long until they could be taken
    fn try_take(&self, n: u32, now: Instant) -> Result<(), Duration> {
        let mut state = self.lock();
        self.refill(&mut state, now);

        if let Some(until) = state.cooldown_until {
            if until > now {
                return Err(until - now);
            }
            state.cooldown_until = None;
        }

        let needed = n as f64;
        if state.tokens + TOKEN_EPSILON >= needed {
            state.tokens = (state.tokens - needed).max(0.0);
            Ok(())
        } else {
            let deficit = needed - state.tokens;
            Err(Duration::from_secs_f64(deficit / self.refill_per_sec))
        }
    }

    fn available(&self, now: Instant) -> f64 {
        let mut state = self.lock();
        self.refill(&mut state, now);
        state.tokens
    }
}

/// Token-bucket limiter keyed by provider
#[derive(Debug, Default)]
pub struct RateLimiter {
    buckets: HashMap<Provider, TokenBucket>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a provider's quota
    pub fn register(&mut self, provider: Provider, quota: RateLimitQuota) -> Result<(), RateLimitError> {
        quota.validate(provider)?;
        self.buckets.insert(provider, TokenBucket::new(quota));
        Ok(())
    }

    /// Builder form of `register`
    pub fn with_quota(mut self, provider: Provider, quota: RateLimitQuota) -> Result<Self, RateLimitError> {
        self.register(provider, quota)?;
        Ok(self)
    }

    fn bucket(&self, provider: Provider) -> Result<&TokenBucket, RateLimitError> {
        self.buckets
            .get(&provider)
            .ok_or(RateLimitError::UnknownProvider(provider))
    }

    /// Wait for one permit
    pub async fn acquire(&self, provider: Provider) -> Result<Permit, RateLimitError> {
        self.acquire_n(provider, 1).await
    }

    /// Wait for `n` permits at once
    pub async fn acquire_n(&self, provider: Provider, n: u32) -> Result<Permit, RateLimitError> {
        let bucket = self.bucket(provider)?;
        if n > bucket.capacity {
            return Err(RateLimitError::ExceedsCapacity {
                provider,
                requested: n,
                capacity: bucket.capacity,
            });
        }

        loop {
            match bucket.try_take(n, Instant::now()) {
                Ok(()) => return Ok(Permit { provider, permits: n }),
                Err(wait) => {
                    tracing::trace!("{} rate limited, waiting {:?}", provider, wait);
                    tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
                }
            }
        }
    }

    /// Take one permit if available right now
    pub fn try_acquire(&self, provider: Provider) -> bool {
        match self.bucket(provider) {
            Ok(bucket) => bucket.try_take(1, Instant::now()).is_ok(),
            Err(_) => false,
        }
    }

    /// 429 cooldown: drain the bucket and block admission for `cooldown`
    pub fn penalize(&self, provider: Provider, cooldown: Duration) {
        let Ok(bucket) = self.bucket(provider) else {
            return;
        };
        let now = Instant::now();
        let mut state = bucket.lock();
        bucket.refill(&mut state, now);
        state.tokens = 0.0;
        let until = now + cooldown;
        state.cooldown_until = Some(match state.cooldown_until {
            Some(existing) if existing > until => existing,
            _ => until,
        });
        tracing::warn!("{} returned 429, cooling down for {:?}", provider, cooldown);
    }

    /// Tokens currently in the provider's bucket
    pub fn available(&self, provider: Provider) -> Option<f64> {
        self.bucket(provider).ok().map(|b| b.available(Instant::now()))
    }

    pub fn providers(&self) -> impl Iterator<Item = Provider> + '_ {
        self.buckets.keys().copied()
    }
}
