//! Controller runner
//!
//! Gates startup on the cache sync, runs the worker pool, and tears it down
//! when the shutdown token fires.

use std::sync::Arc;
use std::time::Duration;

use kube::Client;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::handler::QueueEventHandler;
use super::worker::run_worker;
use super::Context;
use crate::client::DeploymentClient;
use crate::config::ControllerConfig;
use crate::queue::EventQueue;
use crate::store::{ConfigMapInformer, ResourceStore};
use crate::{Error, QUEUE_NAME};

/// Result of waiting for the store at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CacheSync {
    Synced,
    TimedOut,
    Cancelled,
}

/// Runs a pool of workers against a [`Context`]
pub struct Controller {
    ctx: Arc<Context>,
    config: ControllerConfig,
}

impl Controller {
    /// Create a controller over an already wired context
    pub fn new(ctx: Arc<Context>, config: ControllerConfig) -> Self {
        Self { ctx, config }
    }

    /// Run until `shutdown` is cancelled
    ///
    /// No key is dispatched before the store reports synced, or before
    /// `cache_sync_timeout` expires. On shutdown the queue stops accepting
    /// keys, workers finish what is already queued, and this returns once
    /// every worker has exited.
    pub async fn run(self, shutdown: CancellationToken) {
        match wait_for_cache_sync(
            self.ctx.store.as_ref(),
            self.config.cache_sync_timeout,
            self.config.cache_sync_poll_interval,
            &shutdown,
        )
        .await
        {
            CacheSync::Synced => info!("cache synced"),
            CacheSync::TimedOut => warn!(
                timeout = ?self.config.cache_sync_timeout,
                "timed out waiting for cache sync, starting workers against a partial cache"
            ),
            CacheSync::Cancelled => {
                info!("shutdown requested before cache sync");
                self.ctx.queue.shut_down();
                return;
            }
        }

        info!(workers = self.config.workers, "starting workers");
        let mut workers = JoinSet::new();
        for id in 0..self.config.workers {
            workers.spawn(run_worker(id, self.ctx.clone()));
        }

        shutdown.cancelled().await;
        info!("shutting down workers");
        self.ctx.queue.shut_down();

        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "worker task failed");
            }
        }
        info!("all workers stopped");
    }
}

async fn wait_for_cache_sync(
    store: &dyn ResourceStore,
    timeout: Duration,
    poll_interval: Duration,
    shutdown: &CancellationToken,
) -> CacheSync {
    let deadline = Instant::now() + timeout;
    loop {
        if store.has_synced() {
            return CacheSync::Synced;
        }
        if Instant::now() >= deadline {
            return CacheSync::TimedOut;
        }
        tokio::select! {
            _ = shutdown.cancelled() => return CacheSync::Cancelled,
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }
}

/// Watch ConfigMaps and create the Deployments they request until `shutdown`
///
/// Wires the informer, its store, the Deployment client, the queue and the
/// worker pool together.
pub async fn run_controller(
    client: Client,
    config: ControllerConfig,
    shutdown: CancellationToken,
) -> Result<(), Error> {
    config.validate()?;

    let (mut informer, store) = ConfigMapInformer::new(
        client.clone(),
        config.namespace.as_deref(),
        config.resync_period,
    );
    let queue = EventQueue::new(QUEUE_NAME, &config.queue);
    informer.subscribe(Arc::new(QueueEventHandler::new(queue.clone())));

    let ctx = Arc::new(Context::new(
        Arc::new(store),
        Arc::new(DeploymentClient::new(client)),
        queue,
    ));

    info!(
        namespace = config.namespace.as_deref().unwrap_or("<all>"),
        workers = config.workers,
        "starting konfig-deployer controller"
    );

    let informer_task = tokio::spawn(informer.run(shutdown.clone()));
    Controller::new(ctx, config).run(shutdown).await;

    if let Err(e) = informer_task.await {
        error!(error = %e, "informer task failed");
    }
    Ok(())
}
