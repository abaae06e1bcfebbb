//! Controller configuration
//!
//! Plain structs with defaults. The binary fills them from CLI flags and
//! environment variables; tests build them directly.

use std::num::NonZeroU32;
use std::time::Duration;

use crate::Error;

/// Default interval between cache-sync checks at startup
pub const DEFAULT_CACHE_SYNC_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default bound on the startup cache-sync wait
pub const DEFAULT_CACHE_SYNC_TIMEOUT: Duration = Duration::from_secs(60);

/// Default period between full resyncs of the store
pub const DEFAULT_RESYNC_PERIOD: Duration = Duration::from_secs(30);

/// Work queue rate-limiting settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueConfig {
    /// Delay before the first retry of a failing key
    pub base_delay: Duration,
    /// Upper bound on the per-key retry delay
    pub max_delay: Duration,
    /// Overall requeue rate across all keys
    pub qps: NonZeroU32,
    /// Requeues allowed in a burst before `qps` applies
    pub burst: NonZeroU32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_secs(1000),
            qps: NonZeroU32::new(10).unwrap_or(NonZeroU32::MIN),
            burst: NonZeroU32::new(100).unwrap_or(NonZeroU32::MIN),
        }
    }
}

/// Settings for one controller instance
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Number of concurrent worker loops
    pub workers: usize,
    /// Namespace to watch; all namespaces when `None`
    pub namespace: Option<String>,
    /// How long startup waits for the store to sync before continuing anyway
    pub cache_sync_timeout: Duration,
    /// How often startup checks whether the store has synced
    pub cache_sync_poll_interval: Duration,
    /// Period between full resyncs of the store (zero disables)
    pub resync_period: Duration,
    /// Work queue settings
    pub queue: QueueConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            namespace: None,
            cache_sync_timeout: DEFAULT_CACHE_SYNC_TIMEOUT,
            cache_sync_poll_interval: DEFAULT_CACHE_SYNC_POLL_INTERVAL,
            resync_period: DEFAULT_RESYNC_PERIOD,
            queue: QueueConfig::default(),
        }
    }
}

impl ControllerConfig {
    /// Check the settings for values the controller cannot run with
    pub fn validate(&self) -> Result<(), Error> {
        if self.workers == 0 {
            return Err(Error::config("workers must be at least 1"));
        }
        if self.cache_sync_poll_interval.is_zero() {
            return Err(Error::config("cache sync poll interval must be non-zero"));
        }
        if self.queue.base_delay > self.queue.max_delay {
            return Err(Error::config(format!(
                "queue base delay {:?} exceeds max delay {:?}",
                self.queue.base_delay, self.queue.max_delay
            )));
        }
        if let Some(ns) = &self.namespace {
            if ns.trim().is_empty() {
                return Err(Error::config("namespace must not be blank"));
            }
        }
        Ok(())
    }
}
