//! Control loop for ConfigMap-driven Deployments
//!
//! Store notifications become work keys ([`QueueEventHandler`]), workers pull
//! keys from the queue ([`run_worker`]), and each key is reconciled against
//! the current cache snapshot ([`reconcile`]). [`Controller`] ties the workers
//! to startup gating and shutdown.

mod handler;
mod reconciler;
mod runner;
mod worker;

use std::sync::Arc;

pub use handler::QueueEventHandler;
pub use reconciler::{reconcile, ReconcileOutcome};
pub use runner::{run_controller, Controller};
pub use worker::{error_policy, process_next_item, run_worker};

use crate::client::TargetResourceClient;
use crate::queue::EventQueue;
use crate::resource::WorkKey;
use crate::store::ResourceStore;

/// Dependencies shared by every worker of one controller instance
///
/// Built explicitly and passed down, so several controllers (or tests with
/// fakes) can run side by side.
pub struct Context {
    /// Read access to the ConfigMap cache
    pub store: Arc<dyn ResourceStore>,
    /// Creates Deployments (trait object for testability)
    pub client: Arc<dyn TargetResourceClient>,
    /// Work queue fed by store notifications
    pub queue: EventQueue<WorkKey>,
}

impl Context {
    /// Create a context from its parts
    pub fn new(
        store: Arc<dyn ResourceStore>,
        client: Arc<dyn TargetResourceClient>,
        queue: EventQueue<WorkKey>,
    ) -> Self {
        Self {
            store,
            client,
            queue,
        }
    }
}
