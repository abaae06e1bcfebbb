//! konfig-deployer - creates Deployments requested by labelled ConfigMaps

use std::num::NonZeroU32;
use std::time::Duration;

use clap::Parser;
use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use konfig_deployer::config::{ControllerConfig, QueueConfig};
use konfig_deployer::controller::run_controller;
use konfig_deployer::telemetry::{init_telemetry, LogFormat, TelemetryConfig};

/// konfig-deployer - watches ConfigMaps labelled app=auto-deployment and
/// creates the Deployments they describe
#[derive(Parser, Debug)]
#[command(name = "konfig-deployer", version, about, long_about = None)]
struct Cli {
    /// Number of concurrent reconcile workers
    #[arg(long, env = "KONFIG_WORKERS", default_value_t = 1)]
    workers: usize,

    /// Namespace to watch (all namespaces when unset)
    #[arg(long, env = "KONFIG_NAMESPACE")]
    namespace: Option<String>,

    /// Seconds between full resyncs of the ConfigMap cache (0 disables)
    #[arg(long, env = "KONFIG_RESYNC_SECS", default_value_t = 30)]
    resync_secs: u64,

    /// Seconds to wait for the initial ConfigMap listing before starting anyway
    #[arg(long, env = "KONFIG_CACHE_SYNC_TIMEOUT_SECS", default_value_t = 60)]
    cache_sync_timeout_secs: u64,

    /// Overall requeue rate after failures, per second
    #[arg(long, env = "KONFIG_REQUEUE_QPS", default_value = "10")]
    requeue_qps: NonZeroU32,

    /// Requeue burst allowed before the rate applies
    #[arg(long, env = "KONFIG_REQUEUE_BURST", default_value = "100")]
    requeue_burst: NonZeroU32,

    /// Log format: json or plain
    #[arg(long, env = "KONFIG_LOG_FORMAT", default_value = "json")]
    log_format: LogFormat,

    /// OTLP endpoint for metric export
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    otlp_endpoint: Option<String>,
}

impl Cli {
    fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            workers: self.workers,
            namespace: self.namespace.clone(),
            cache_sync_timeout: Duration::from_secs(self.cache_sync_timeout_secs),
            resync_period: Duration::from_secs(self.resync_secs),
            queue: QueueConfig {
                qps: self.requeue_qps,
                burst: self.requeue_burst,
                ..QueueConfig::default()
            },
            ..ControllerConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_telemetry(TelemetryConfig {
        service_name: "konfig-deployer".to_string(),
        otlp_endpoint: cli.otlp_endpoint.clone(),
        log_format: cli.log_format,
    })
    .map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))?;

    let config = cli.controller_config();
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    run_controller(client, config, shutdown)
        .await
        .map_err(|e| anyhow::anyhow!("Controller failed: {}", e))?;

    info!("konfig-deployer stopped");
    Ok(())
}

/// Cancel `shutdown` on SIGINT or SIGTERM
async fn cancel_on_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => info!("Received SIGINT"),
                Err(e) => {
                    error!(error = %e, "Failed to listen for SIGINT");
                    return;
                }
            },
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            return;
        }
        info!("Received Ctrl-C");
    }

    shutdown.cancel();
}
