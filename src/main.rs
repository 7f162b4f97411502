//! OSO ExposureClass Kubernetes Operator
//!
//! Main entry point for the operator. Loads configuration, sets up the
//! Kubernetes client, and runs the ExposureClass controller until shutdown.

use std::sync::Arc;

use kube::{api::ListParams, Api, Client};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use exposure_class_operator::{
    adapters::KubeStore,
    config::OperatorConfig,
    controllers::{self, Context},
    crd::{ExposureClass, Shoot},
    metrics,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    init_tracing();

    info!("Starting OSO ExposureClass Operator");

    let config = OperatorConfig::load()?;
    info!(?config, "Loaded configuration");

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes API server");

    ensure_crds_installed(&client).await?;

    let store = Arc::new(KubeStore::new(client, config.dependent_page_size));
    let context = Arc::new(Context::new(store, config.clone()));
    let shutdown = CancellationToken::new();

    // Start metrics server
    let metrics_handle = tokio::spawn(metrics::serve(config.metrics_port));
    info!("Metrics server starting on port {}", config.metrics_port);

    let mut controller = tokio::spawn(controllers::run_exposure_class_controller(
        context,
        shutdown.clone(),
    ));

    // Handle graceful shutdown
    tokio::select! {
        _ = &mut controller => {
            error!("ExposureClass controller exited unexpectedly");
        }
        result = metrics_handle => {
            error!(?result, "Metrics server exited unexpectedly");
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, stopping operator");
            metrics::OPERATOR_HEALTH.set(0.0);
            shutdown.cancel();
            if let Err(e) = controller.await {
                error!(error = %e, "ExposureClass controller task failed");
            }
        }
    }

    info!("OSO ExposureClass Operator stopped");
    Ok(())
}

/// Fail fast when the custom resources are missing from the cluster
async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    let classes: Api<ExposureClass> = Api::all(client.clone());
    if let Err(e) = classes.list(&ListParams::default().limit(1)).await {
        error!("ExposureClass CRD not installed: {}", e);
        return Err(e.into());
    }

    let shoots: Api<Shoot> = Api::all(client.clone());
    if let Err(e) = shoots.list(&ListParams::default().limit(1)).await {
        error!("Shoot CRD not installed: {}", e);
        return Err(e.into());
    }
    Ok(())
}

/// Initialize tracing subscriber
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kube=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install CTRL+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received CTRL+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
