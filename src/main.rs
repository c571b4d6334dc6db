use futures::StreamExt;
use k8s_openapi::api::core::v1::ReplicationController;
use kube::runtime::{controller, watcher, Controller};
use kube::{Api, Client};
use std::sync::Arc;
use tracing::{error, info, warn};
use versio::config::ControllerConfig;
use versio::controller::{error_policy, reconcile, Context};
use versio::crd::deployment_config::DeploymentConfig;
use versio::server::{create_metrics, run_health_server, shutdown_channel, wait_for_signal, ReadinessState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting versio DeploymentConfig controller");

    let config = ControllerConfig::from_env()?;
    info!(
        health_port = config.health_port,
        namespace = ?config.watch_namespace,
        concurrency = config.concurrency,
        max_retries = config.max_retries,
        "Loaded controller configuration"
    );

    let (shutdown_controller, shutdown_signal) = shutdown_channel();
    let readiness = ReadinessState::new();

    let metrics = create_metrics()?;
    info!("Prometheus metrics registry initialized");

    let client = match Client::try_default().await {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "Failed to create Kubernetes client");
            return Err(e.into());
        }
    };
    info!("Connected to Kubernetes cluster");

    let health_readiness = readiness.clone();
    let health_metrics = metrics.clone();
    let health_port = config.health_port;
    let health_handle = tokio::spawn(async move {
        if let Err(e) = run_health_server(health_port, health_readiness, health_metrics).await {
            warn!(error = %e, "Health server failed");
        }
    });

    let (configs, deployments) = match config.watch_namespace.as_deref() {
        Some(ns) => (
            Api::<DeploymentConfig>::namespaced(client.clone(), ns),
            Api::<ReplicationController>::namespaced(client.clone(), ns),
        ),
        None => (
            Api::<DeploymentConfig>::all(client.clone()),
            Api::<ReplicationController>::all(client.clone()),
        ),
    };

    let ctx = Arc::new(Context::from_client(
        client.clone(),
        Some(metrics.clone()),
        config.max_retries,
    ));

    readiness.set_ready();
    info!("Controller ready, starting reconciliation loop");

    // Deployments changed by the deployer wake up their owning config
    let controller = Controller::new(configs, watcher::Config::default())
        .owns(deployments, watcher::Config::default())
        .with_config(controller::Config::default().concurrency(config.concurrency))
        .graceful_shutdown_on(shutdown_signal.wait())
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            if let Ok((obj, _)) = res {
                info!(config = %obj.name, "Reconciled");
            }
            // Errors are logged in error_policy
        });

    tokio::pin!(controller);
    let interrupted = tokio::select! {
        _ = &mut controller => {
            info!("Controller stream ended");
            false
        }
        signal = wait_for_signal() => {
            match signal {
                Ok(name) => info!(signal = name, "Initiating graceful shutdown"),
                Err(e) => error!(error = %e, "Failed to listen for termination signals"),
            }
            true
        }
    };

    if interrupted {
        readiness.set_not_ready();
        shutdown_controller.shutdown();
        // In-flight reconciles finish before the stream ends
        controller.await;
    }

    health_handle.abort();

    info!("versio controller shut down");
    Ok(())
}
