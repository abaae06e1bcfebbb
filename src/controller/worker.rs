//! Worker loop
//!
//! Each worker pulls one key at a time from the queue, reconciles it, and
//! settles the key: success forgets its failure history, failure schedules a
//! rate-limited retry. Either way the key is marked done so a change that
//! arrived mid-reconcile gets its follow-up attempt.

use std::sync::Arc;

use tracing::{debug, error, warn};

use super::reconciler::reconcile;
use super::Context;
use crate::error::ErrorKind;
use crate::metrics::{record_requeue, ReconcileTimer};
use crate::resource::WorkKey;
use crate::Error;

/// Run a worker until the queue shuts down and drains
pub async fn run_worker(id: usize, ctx: Arc<Context>) {
    debug!(worker = id, "worker started");
    while process_next_item(&ctx).await {}
    debug!(worker = id, "worker stopped");
}

/// Process one key from the queue
///
/// Returns `false` once the queue has shut down and there is nothing left.
pub async fn process_next_item(ctx: &Context) -> bool {
    let Some(key) = ctx.queue.get().await else {
        return false;
    };

    let timer = ReconcileTimer::start();
    match reconcile(&key, ctx).await {
        Ok(outcome) => {
            timer.success(outcome.as_str());
            debug!(key = %key, outcome = outcome.as_str(), "reconcile succeeded");
            ctx.queue.forget(&key);
        }
        Err(e) => {
            timer.error(e.kind());
            error_policy(&key, &e, ctx);
        }
    }

    ctx.queue.done(&key);
    true
}

/// Report a failed reconcile and schedule a retry with backoff
///
/// Every failure is retried; validation errors are unlikely to heal without
/// an edit to the ConfigMap, which will also re-enqueue the key.
pub fn error_policy(key: &WorkKey, error: &Error, ctx: &Context) {
    let retries = ctx.queue.num_requeues(key);
    match error.kind() {
        ErrorKind::Validation => warn!(
            key = %key,
            error = %error,
            retries,
            "ConfigMap has an invalid deployment request"
        ),
        ErrorKind::Transient | ErrorKind::Conflict => error!(
            key = %key,
            error = %error,
            retries,
            "reconciliation failed, requeueing"
        ),
    }

    ctx.queue.add_rate_limited(key.clone());
    record_requeue(ctx.queue.name());
}
