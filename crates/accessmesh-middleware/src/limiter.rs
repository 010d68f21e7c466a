//! Token-bucket admission control.
//!
//! Each client key owns a bucket of at most `capacity` tokens refilled
//! continuously at `refill_per_second`. A request consumes one token; with
//! less than one token left it is denied. Bucket updates are linearizable per
//! key: the map entry guard holds the shard lock for the whole
//! read-modify-write, so two concurrent requests for the same key can never
//! both spend the last token.

use std::sync::Arc;
use std::time::Duration;

use accessmesh_core::{Clock, Timestamp};
use dashmap::DashMap;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::debug;

/// Invalid limiter settings.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LimiterConfigError {
    /// Capacity must allow at least one request.
    #[error("capacity must be at least 1")]
    ZeroCapacity,
    /// Refill rate must be a positive finite number.
    #[error("refill rate must be positive, got {0}")]
    InvalidRefillRate(f64),
    /// Idle eviction would forget a bucket before it could refill completely.
    #[error("idle timeout {idle:?} is shorter than the full refill time {refill:?}")]
    IdleTimeoutTooShort {
        /// Configured idle timeout.
        idle: Duration,
        /// Time to refill an empty bucket.
        refill: Duration,
    },
}

/// Settings for [`RateLimiter`].
#[derive(Debug, Clone, PartialEq)]
pub struct LimiterConfig {
    /// Maximum tokens per bucket.
    pub capacity: u32,
    /// Tokens added per second.
    pub refill_per_second: f64,
    /// Buckets untouched for this long are evicted.
    pub idle_timeout: Duration,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            refill_per_second: 10.0,
            idle_timeout: Duration::from_secs(600),
        }
    }
}

impl LimiterConfig {
    /// Time for an empty bucket to refill to capacity.
    pub fn full_refill(&self) -> Duration {
        Duration::try_from_secs_f64(f64::from(self.capacity) / self.refill_per_second)
            .unwrap_or(Duration::MAX)
    }

    /// Checks the settings.
    ///
    /// The idle timeout must cover a full refill, so evicting a bucket and
    /// recreating it at capacity never grants more than the surviving bucket
    /// would have held.
    pub fn validate(&self) -> Result<(), LimiterConfigError> {
        if self.capacity == 0 {
            return Err(LimiterConfigError::ZeroCapacity);
        }
        if !(self.refill_per_second.is_finite() && self.refill_per_second > 0.0) {
            return Err(LimiterConfigError::InvalidRefillRate(self.refill_per_second));
        }
        let refill = self.full_refill();
        if self.idle_timeout < refill {
            return Err(LimiterConfigError::IdleTimeoutTooShort {
                idle: self.idle_timeout,
                refill,
            });
        }
        Ok(())
    }
}

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Admission {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Whole tokens left after this request.
    pub remaining: u32,
    /// Time until one token is available; zero when allowed.
    pub retry_after: Duration,
}

impl Admission {
    /// `retry_after` rounded up to whole seconds, at least 1.
    pub fn retry_after_secs(&self) -> u64 {
        let secs = self.retry_after.as_secs();
        let rounded = if self.retry_after.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        };
        rounded.max(1)
    }
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    last_refill: Timestamp,
}

/// Per-key token-bucket rate limiter.
#[derive(Debug)]
pub struct RateLimiter {
    config: LimiterConfig,
    buckets: DashMap<String, Bucket>,
}

impl RateLimiter {
    /// Creates a limiter after validating `config`.
    pub fn new(config: LimiterConfig) -> Result<Self, LimiterConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            buckets: DashMap::new(),
        })
    }

    /// Returns the limiter settings.
    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// Returns `true` if a request for `key` at `now` is admitted.
    pub fn admit(&self, key: &str, now: Timestamp) -> bool {
        self.check(key, now).allowed
    }

    /// Refills the bucket for `key`, then tries to take one token.
    pub fn check(&self, key: &str, now: Timestamp) -> Admission {
        if let Some(mut bucket) = self.buckets.get_mut(key) {
            return self.take(&mut bucket, now);
        }
        let capacity = f64::from(self.config.capacity);
        let mut bucket = self
            .buckets
            .entry(key.to_owned())
            .or_insert_with(|| Bucket {
                tokens: capacity,
                last_refill: now,
            });
        self.take(&mut bucket, now)
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn take(&self, bucket: &mut Bucket, now: Timestamp) -> Admission {
        let capacity = f64::from(self.config.capacity);
        let rate = self.config.refill_per_second;

        // A clock step backwards refills nothing and does not move the mark back.
        let elapsed = (now - bucket.last_refill).to_std().unwrap_or(Duration::ZERO);
        bucket.tokens = elapsed
            .as_secs_f64()
            .mul_add(rate, bucket.tokens)
            .min(capacity);
        if now > bucket.last_refill {
            bucket.last_refill = now;
        }

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Admission {
                allowed: true,
                remaining: bucket.tokens.floor() as u32,
                retry_after: Duration::ZERO,
            }
        } else {
            let wait = (1.0 - bucket.tokens) / rate;
            Admission {
                allowed: false,
                remaining: 0,
                retry_after: Duration::try_from_secs_f64(wait).unwrap_or(Duration::MAX),
            }
        }
    }

    /// Removes buckets idle for at least the idle timeout. Returns how many
    /// were removed.
    pub fn evict_idle(&self, now: Timestamp) -> usize {
        let before = self.buckets.len();
        let idle = self.config.idle_timeout;
        self.buckets.retain(|_, bucket| {
            (now - bucket.last_refill)
                .to_std()
                .map_or(true, |since| since < idle)
        });
        before.saturating_sub(self.buckets.len())
    }

    /// Number of live buckets.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Returns `true` if no bucket exists.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Spawns a task evicting idle buckets every `every`.
    pub fn spawn_sweeper(self: &Arc<Self>, clock: Arc<dyn Clock>, every: Duration) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let evicted = limiter.evict_idle(clock.now());
                let live = limiter.len();
                if evicted > 0 {
                    debug!(evicted, live, "evicted idle rate limit buckets");
                }
                metrics::gauge!("accessmesh_rate_limit_buckets").set(live as f64);
            }
        })
    }
}
