//! Store notifications to work keys
//!
//! Runs on the informer loop, so it does nothing beyond extracting the key and
//! handing it to the queue.

use k8s_openapi::api::core::v1::ConfigMap;
use tracing::{trace, warn};

use crate::metrics::record_queue_add;
use crate::queue::EventQueue;
use crate::resource::WorkKey;
use crate::store::EventHandler;

/// Enqueues the key of every added, updated or deleted ConfigMap
pub struct QueueEventHandler {
    queue: EventQueue<WorkKey>,
}

impl QueueEventHandler {
    /// Create a handler feeding `queue`
    pub fn new(queue: EventQueue<WorkKey>) -> Self {
        Self { queue }
    }

    fn enqueue(&self, obj: &ConfigMap, event: &'static str) {
        match WorkKey::from_object(obj) {
            Ok(key) => {
                trace!(key = %key, event, "enqueueing");
                self.queue.add(key);
                record_queue_add(self.queue.name(), event);
            }
            Err(e) => warn!(error = %e, event, "dropping notification"),
        }
    }
}

impl EventHandler for QueueEventHandler {
    fn on_add(&self, obj: &ConfigMap) {
        self.enqueue(obj, "add");
    }

    fn on_update(&self, _old: &ConfigMap, new: &ConfigMap) {
        self.enqueue(new, "update");
    }

    fn on_delete(&self, obj: &ConfigMap) {
        self.enqueue(obj, "delete");
    }
}
