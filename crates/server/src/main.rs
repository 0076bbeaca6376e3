//! ezkonnect server - instrumentation control surface for Kubernetes
//!
//! Runs as a Deployment next to the instrumentation operator and serves the
//! state and annotate endpoints used by the ezkonnect UI.

use anyhow::{Context, Result};
use ezkonnect_server::{api, config::ServerConfig};
use server_lib::{
    cluster,
    health::{components, HealthRegistry},
    Annotator, KubeInstrumentedApplications, KubeWorkloads, StateReader, StructuredLogger,
};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting ezkonnect-server");

    let config = ServerConfig::load()?;
    info!(
        port = config.server_port,
        request_timeout_seconds = config.request_timeout_seconds,
        "Server configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::KUBE_API).await;

    let client = cluster::connect()
        .await
        .context("Failed to create Kubernetes client")?;

    let logger = StructuredLogger::new(&config.pod_name);
    let workloads = Arc::new(KubeWorkloads::new(client.clone()));
    let applications = Arc::new(KubeInstrumentedApplications::new(client));

    let annotator = Annotator::new(
        workloads.clone(),
        applications.clone(),
        config.request_timeout(),
        logger.clone(),
    );
    let state_reader = StateReader::new(workloads, applications, logger.clone());
    let app_state = Arc::new(api::AppState::new(
        annotator,
        state_reader,
        health_registry.clone(),
    ));

    health_registry.set_ready(true).await;
    logger.log_startup(SERVER_VERSION, config.server_port, config.request_timeout());

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let mut server = tokio::spawn(api::serve(config.server_port, app_state, async move {
        let _ = shutdown_rx.await;
    }));

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            logger.log_shutdown("SIGINT received");
            let _ = shutdown_tx.send(());
            server.await??;
        }
        result = &mut server => {
            // Server exited on its own, e.g. the port could not be bound
            let result = result?;
            if let Err(e) = &result {
                error!(error = %e, "API server stopped");
            }
            logger.log_shutdown("API server stopped");
            result?;
        }
    }

    info!("Shutting down");
    Ok(())
}
