//! Token-bucket rate limiting keyed by sending number.
//!
//! WhatsApp throttles template sends per business phone number, so every send
//! acquires a permit for its sender before it is issued.

use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

pub const RATE_LIMIT_ENV: &str = "CAMPAIGN_RATE_LIMITS";

/// How many sends one token represents.
const TOKEN: f64 = 1.0;
const TICK_MS: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimit {
    pub rps: f64,
    pub burst: f64,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            rps: 5.0,
            burst: 10.0,
        }
    }
}

/// Default limit plus per-sender overrides.
#[derive(Clone, Debug, Default)]
pub struct RateLimits {
    default: RateLimit,
    senders: HashMap<String, RateLimit>,
}

impl RateLimits {
    pub fn new(default: RateLimit) -> Self {
        Self {
            default,
            senders: HashMap::new(),
        }
    }

    pub fn with_sender(mut self, sender: impl Into<String>, limit: RateLimit) -> Self {
        self.senders.insert(sender.into(), limit);
        self
    }

    /// Reads overrides from `CAMPAIGN_RATE_LIMITS`, a JSON object mapping
    /// sender numbers to `{"rps": .., "burst": ..}`.
    pub fn from_env() -> Self {
        match std::env::var(RATE_LIMIT_ENV) {
            Ok(raw) => Self::from_json(&raw),
            Err(_) => Self::default(),
        }
    }

    pub fn from_json(raw: &str) -> Self {
        let senders = match serde_json::from_str::<HashMap<String, SenderRateLimit>>(raw) {
            Ok(map) => map
                .into_iter()
                .map(|(sender, cfg)| {
                    (
                        sender,
                        RateLimit {
                            rps: cfg.rps.max(0.1),
                            burst: cfg.burst.max(1.0),
                        },
                    )
                })
                .collect(),
            Err(err) => {
                warn!(error = %err, "ignoring malformed {RATE_LIMIT_ENV}");
                HashMap::new()
            }
        };
        Self {
            default: RateLimit::default(),
            senders,
        }
    }

    pub fn get(&self, sender: &str) -> RateLimit {
        self.senders.get(sender).copied().unwrap_or(self.default)
    }
}

#[derive(Debug, Deserialize)]
struct SenderRateLimit {
    rps: f64,
    burst: f64,
}

#[async_trait]
pub trait BackpressureLimiter: Send + Sync {
    async fn acquire(&self, sender: &str) -> Result<Permit>;
}

#[derive(Debug)]
pub struct Permit;

impl Permit {
    fn new() -> Self {
        Self
    }
}

/// Limiter that never waits; for tests and backends that throttle themselves.
#[derive(Clone, Debug, Default)]
pub struct Unlimited;

#[async_trait]
impl BackpressureLimiter for Unlimited {
    async fn acquire(&self, _sender: &str) -> Result<Permit> {
        Ok(Permit::new())
    }
}

/// In-process token bucket per sender.
#[derive(Clone)]
pub struct LocalBackpressureLimiter {
    limits: Arc<RateLimits>,
    buckets: Arc<Mutex<HashMap<String, LocalBucket>>>,
}

#[derive(Debug)]
struct LocalBucket {
    tokens: f64,
    last_refill: Instant,
}

impl LocalBackpressureLimiter {
    pub fn new(limits: Arc<RateLimits>) -> Self {
        Self {
            limits,
            buckets: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn refill(tokens: f64, elapsed: Duration, limit: RateLimit) -> (f64, Duration) {
        let ticks = elapsed.as_millis() as u64 / TICK_MS;
        if ticks == 0 {
            return (tokens, Duration::ZERO);
        }
        let refill = (ticks as f64) * (limit.rps * (TICK_MS as f64 / 1000.0));
        let tokens = (tokens + refill).min(limit.burst);
        (tokens, Duration::from_millis(ticks * TICK_MS))
    }
}

#[async_trait]
impl BackpressureLimiter for LocalBackpressureLimiter {
    async fn acquire(&self, sender: &str) -> Result<Permit> {
        loop {
            let limit = self.limits.get(sender);
            let mut guard = self.buckets.lock().await;
            let bucket = guard.entry(sender.to_string()).or_insert(LocalBucket {
                tokens: limit.burst,
                last_refill: Instant::now(),
            });
            let elapsed = Instant::now().saturating_duration_since(bucket.last_refill);
            let (filled, consumed) = Self::refill(bucket.tokens, elapsed, limit);
            if !consumed.is_zero() {
                bucket.last_refill += consumed;
                bucket.tokens = filled;
            }
            if bucket.tokens >= TOKEN {
                bucket.tokens -= TOKEN;
                metrics::gauge!("gauge.backpressure.tokens", "sender" => sender.to_string())
                    .set(bucket.tokens);
                return Ok(Permit::new());
            }
            let missing = (TOKEN - bucket.tokens).max(0.0);
            let wait_secs = (missing / limit.rps.max(0.1)).max(0.1);
            drop(guard);
            debug!(sender, wait_secs, "send rate exhausted, waiting for tokens");
            tokio::time::sleep(Duration::from_secs_f64(wait_secs)).await;
        }
    }
}
