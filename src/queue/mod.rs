//! Deduplicating, single-flight work queue
//!
//! Semantics, per key:
//! - `add` while the key is waiting is a no-op (dedup)
//! - `add` while the key is being processed marks it dirty; `done` puts it
//!   back exactly once (single-flight, nothing lost)
//! - `get` waits for work and returns `None` once the queue is shut down and drained
//!
//! ```text
//!   add ──► [dirty + queue] ──get──► [processing] ──done──► (gone)
//!                ▲                        │
//!                └──── dirty on done ◄────┘
//! ```
//!
//! Rate-limited re-adds sit on a timer outside the queue until their delay
//! expires; shutting the queue down drops them.

mod rate_limiter;

pub use rate_limiter::{
    default_controller_rate_limiter, BucketRateLimiter, ExponentialFailureRateLimiter,
    MaxOfRateLimiter, RateLimiter,
};

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::config::QueueConfig;

struct State<K> {
    /// Keys ready to be handed out, in order
    queue: VecDeque<K>,
    /// Keys that need processing (waiting in `queue` or re-added while processing)
    dirty: HashSet<K>,
    /// Keys currently held by a worker
    processing: HashSet<K>,
    shutting_down: bool,
}

struct Inner<K> {
    name: String,
    state: Mutex<State<K>>,
    notify: Notify,
    shutdown: CancellationToken,
    limiter: Box<dyn RateLimiter<K>>,
}

/// Work queue shared between the store's event handlers and the workers
///
/// Cloning is cheap; clones share the same queue.
pub struct EventQueue<K> {
    inner: Arc<Inner<K>>,
}

impl<K> Clone for EventQueue<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K> EventQueue<K>
where
    K: Clone + Eq + Hash + Send + Sync + std::fmt::Debug + 'static,
{
    /// Create a queue using the default controller rate limiter
    pub fn new(name: impl Into<String>, config: &QueueConfig) -> Self {
        Self::with_rate_limiter(name, Box::new(default_controller_rate_limiter(config)))
    }

    /// Create a queue with a custom rate limiter
    pub fn with_rate_limiter(name: impl Into<String>, limiter: Box<dyn RateLimiter<K>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    shutting_down: false,
                }),
                notify: Notify::new(),
                shutdown: CancellationToken::new(),
                limiter,
            }),
        }
    }

    /// Queue name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Mark `key` as needing processing
    pub fn add(&self, key: K) {
        let mut state = self.inner.state.lock();
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }
        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            trace!(queue = %self.inner.name, ?key, "key is processing, deferring until done");
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Add `key` once `delay` has elapsed
    ///
    /// Must be called from within a Tokio runtime when `delay` is non-zero.
    pub fn add_after(&self, key: K, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(key);
            return;
        }

        let queue = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = queue.inner.shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => queue.add(key),
            }
        });
    }

    /// Add `key` after the rate limiter's delay, recording a failure
    pub fn add_rate_limited(&self, key: K) {
        let delay = self.inner.limiter.when(&key);
        trace!(queue = %self.inner.name, ?key, delay_ms = delay.as_millis(), "rate-limited requeue");
        self.add_after(key, delay);
    }

    /// Clear the failure history of `key`
    pub fn forget(&self, key: &K) {
        self.inner.limiter.forget(key);
    }

    /// Failures recorded for `key` since it was last forgotten
    pub fn num_requeues(&self, key: &K) -> u32 {
        self.inner.limiter.num_requeues(key)
    }

    /// Wait for the next key
    ///
    /// The caller owns the key until it calls [`EventQueue::done`]. Returns
    /// `None` once the queue has been shut down and no keys remain.
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.inner.state.lock();
                if let Some(key) = state.queue.pop_front() {
                    state.processing.insert(key.clone());
                    state.dirty.remove(&key);
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Finish processing `key`
    ///
    /// If the key was added again while it was processing it goes back on the
    /// queue now.
    pub fn done(&self, key: &K) {
        let mut state = self.inner.state.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) {
            state.queue.push_back(key.clone());
            drop(state);
            self.inner.notify.notify_one();
        }
    }

    /// Stop accepting keys and wake every waiting `get`
    ///
    /// Keys already queued are still handed out; delayed adds are dropped.
    pub fn shut_down(&self) {
        self.inner.state.lock().shutting_down = true;
        self.inner.shutdown.cancel();
        self.inner.notify.notify_waiters();
    }

    /// True once [`EventQueue::shut_down`] has been called
    pub fn is_shutting_down(&self) -> bool {
        self.inner.state.lock().shutting_down
    }

    /// Number of keys waiting to be handed out
    pub fn len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// True when no keys are waiting
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> EventQueue<String> {
        EventQueue::new("test", &QueueConfig::default())
    }

    fn key(s: &str) -> String {
        s.to_string()
    }

    mod dedup {
        use super::*;

        #[tokio::test]
        async fn identical_keys_collapse_into_one_item() {
            let q = queue();
            q.add(key("default/a"));
            q.add(key("default/a"));
            q.add(key("default/b"));
            assert_eq!(q.len(), 2);

            assert_eq!(q.get().await, Some(key("default/a")));
            assert_eq!(q.get().await, Some(key("default/b")));
            assert!(q.is_empty());
        }

        #[tokio::test]
        async fn keys_are_handed_out_in_insertion_order() {
            let q = queue();
            for k in ["c", "a", "b"] {
                q.add(key(k));
            }
            assert_eq!(q.get().await, Some(key("c")));
            assert_eq!(q.get().await, Some(key("a")));
            assert_eq!(q.get().await, Some(key("b")));
        }
    }

    mod single_flight {
        use super::*;

        #[tokio::test]
        async fn key_added_while_processing_is_not_handed_out_twice() {
            let q = queue();
            q.add(key("a"));
            let held = q.get().await.unwrap();

            // Two notifications arrive while the first attempt is running
            q.add(key("a"));
            q.add(key("a"));
            assert!(q.is_empty(), "processing key must not be queued again");

            q.done(&held);
            assert_eq!(q.len(), 1, "exactly one follow-up attempt");
            assert_eq!(q.get().await, Some(key("a")));
            q.done(&key("a"));
            assert!(q.is_empty());
        }

        #[tokio::test]
        async fn done_without_readd_removes_the_key() {
            let q = queue();
            q.add(key("a"));
            let held = q.get().await.unwrap();
            q.done(&held);
            assert!(q.is_empty());

            // Eligible again afterwards
            q.add(key("a"));
            assert_eq!(q.len(), 1);
        }
    }

    mod blocking_get {
        use super::*;

        #[tokio::test]
        async fn get_waits_for_add() {
            let q = queue();
            let q2 = q.clone();
            let waiter = tokio::spawn(async move { q2.get().await });

            tokio::task::yield_now().await;
            assert!(!waiter.is_finished());

            q.add(key("late"));
            assert_eq!(waiter.await.unwrap(), Some(key("late")));
        }

        #[tokio::test]
        async fn shutdown_wakes_blocked_getters() {
            let q = queue();
            let mut waiters = Vec::new();
            for _ in 0..3 {
                let q2 = q.clone();
                waiters.push(tokio::spawn(async move { q2.get().await }));
            }
            tokio::task::yield_now().await;

            q.shut_down();
            for w in waiters {
                assert_eq!(w.await.unwrap(), None);
            }
        }

        #[tokio::test]
        async fn shutdown_drains_remaining_keys_first() {
            let q = queue();
            q.add(key("a"));
            q.add(key("b"));
            q.shut_down();

            q.add(key("ignored"));
            assert_eq!(q.get().await, Some(key("a")));
            assert_eq!(q.get().await, Some(key("b")));
            assert_eq!(q.get().await, None);
            assert_eq!(q.get().await, None);
        }
    }

    mod delayed {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn add_after_waits_for_the_delay() {
            let q = queue();
            q.add_after(key("a"), Duration::from_secs(5));
            tokio::task::yield_now().await;
            assert!(q.is_empty());

            tokio::time::sleep(Duration::from_secs(6)).await;
            assert_eq!(q.len(), 1);
        }

        #[tokio::test]
        async fn zero_delay_adds_immediately() {
            let q = queue();
            q.add_after(key("a"), Duration::ZERO);
            assert_eq!(q.len(), 1);
        }

        #[tokio::test(start_paused = true)]
        async fn shutdown_drops_pending_delayed_adds() {
            let q = queue();
            q.add_after(key("a"), Duration::from_secs(5));
            q.shut_down();
            tokio::time::sleep(Duration::from_secs(6)).await;
            assert_eq!(q.get().await, None);
        }

        #[tokio::test(start_paused = true)]
        async fn rate_limited_requeues_back_off_until_forgotten() {
            let config = QueueConfig {
                base_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(60),
                ..QueueConfig::default()
            };
            let q: EventQueue<String> = EventQueue::new("test", &config);

            q.add_rate_limited(key("a"));
            q.add_rate_limited(key("a"));
            assert_eq!(q.num_requeues(&key("a")), 2);

            // First re-add lands after 1s, the second (2s) dedups against it
            tokio::time::sleep(Duration::from_millis(1500)).await;
            assert_eq!(q.len(), 1);
            tokio::time::sleep(Duration::from_secs(1)).await;
            assert_eq!(q.len(), 1);

            q.forget(&key("a"));
            assert_eq!(q.num_requeues(&key("a")), 0);
        }
    }
}
