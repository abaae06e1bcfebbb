//! Requeue delay policies for the work queue
//!
//! The default controller limiter is the maximum of a per-key exponential
//! failure limiter and an overall token bucket: a key that keeps failing backs
//! off on its own, while a burst of distinct failing keys is spread out evenly.

use std::hash::Hash;
use std::num::NonZeroU32;
use std::time::Duration;

use dashmap::DashMap;
use governor::clock::{Clock, DefaultClock};
use governor::{DefaultDirectRateLimiter, Quota};

use crate::config::QueueConfig;

/// Decides how long a key waits before it is re-added after a failure
pub trait RateLimiter<K>: Send + Sync {
    /// Delay before the next attempt for `key`; records one more failure
    fn when(&self, key: &K) -> Duration;

    /// Drop all failure history for `key`
    fn forget(&self, key: &K);

    /// Number of failures recorded for `key` since it was last forgotten
    fn num_requeues(&self, key: &K) -> u32;
}

/// Per-key exponential backoff: `base * 2^failures`, capped at `max`
pub struct ExponentialFailureRateLimiter<K> {
    base: Duration,
    max: Duration,
    failures: DashMap<K, u32>,
}

impl<K: Eq + Hash> ExponentialFailureRateLimiter<K> {
    /// Create a limiter with the given base delay and cap
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: DashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone + Send + Sync> RateLimiter<K> for ExponentialFailureRateLimiter<K> {
    fn when(&self, key: &K) -> Duration {
        let exp = {
            let mut entry = self.failures.entry(key.clone()).or_insert(0);
            let exp = *entry;
            *entry = entry.saturating_add(1);
            exp
        };

        // 2^63 seconds of backoff is already far past any sane cap
        let exp = exp.min(62) as i32;
        let secs = self.base.as_secs_f64() * 2f64.powi(exp);
        Duration::from_secs_f64(secs.min(self.max.as_secs_f64()))
    }

    fn forget(&self, key: &K) {
        self.failures.remove(key);
    }

    fn num_requeues(&self, key: &K) -> u32 {
        self.failures.get(key).map(|f| *f).unwrap_or(0)
    }
}

/// Overall token bucket shared by every key
///
/// Only the rate is enforced here; per-key history is not tracked.
pub struct BucketRateLimiter {
    limiter: DefaultDirectRateLimiter,
    clock: DefaultClock,
}

impl BucketRateLimiter {
    /// Create a bucket refilling at `qps` tokens per second holding at most `burst`
    pub fn new(qps: NonZeroU32, burst: NonZeroU32) -> Self {
        let clock = DefaultClock::default();
        let quota = Quota::per_second(qps).allow_burst(burst);
        Self {
            limiter: governor::RateLimiter::direct_with_clock(quota, &clock),
            clock,
        }
    }
}

impl<K> RateLimiter<K> for BucketRateLimiter {
    fn when(&self, _key: &K) -> Duration {
        match self.limiter.check() {
            Ok(()) => Duration::ZERO,
            Err(not_until) => not_until.wait_time_from(self.clock.now()),
        }
    }

    fn forget(&self, _key: &K) {}

    fn num_requeues(&self, _key: &K) -> u32 {
        0
    }
}

/// Combines limiters by taking the longest delay
pub struct MaxOfRateLimiter<K> {
    limiters: Vec<Box<dyn RateLimiter<K>>>,
}

impl<K> MaxOfRateLimiter<K> {
    /// Combine the given limiters
    pub fn new(limiters: Vec<Box<dyn RateLimiter<K>>>) -> Self {
        Self { limiters }
    }
}

impl<K> RateLimiter<K> for MaxOfRateLimiter<K> {
    fn when(&self, key: &K) -> Duration {
        // Every limiter must see the failure, so no short-circuiting
        self.limiters
            .iter()
            .map(|l| l.when(key))
            .fold(Duration::ZERO, Duration::max)
    }

    fn forget(&self, key: &K) {
        for limiter in &self.limiters {
            limiter.forget(key);
        }
    }

    fn num_requeues(&self, key: &K) -> u32 {
        self.limiters
            .iter()
            .map(|l| l.num_requeues(key))
            .max()
            .unwrap_or(0)
    }
}

/// The default limiter for controller queues
pub fn default_controller_rate_limiter<K>(config: &QueueConfig) -> MaxOfRateLimiter<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    MaxOfRateLimiter::new(vec![
        Box::new(ExponentialFailureRateLimiter::new(
            config.base_delay,
            config.max_delay,
        )),
        Box::new(BucketRateLimiter::new(config.qps, config.burst)),
    ])
}
