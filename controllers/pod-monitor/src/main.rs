//! Pod Monitor
//!
//! Streams Kubernetes pod changes to WebSocket clients in real time.
//!
//! Clients connect to `/api/v1/ws?namespace=<ns>`, receive the namespace's
//! current pods, then every add, update, and delete as it happens. One pod
//! watch per namespace is shared by all clients of that namespace.

mod config;
mod error;
mod logging;
mod server;
mod transport;

use crate::config::MonitorConfig;
use crate::error::MonitorError;
use crate::server::AppState;
use anyhow::Result;
use kube::Client;
use pod_source::PodWatchSource;
use std::sync::Arc;
use tracing::{error, info};
use watch_hub::{Hub, spawn_heartbeat};

#[tokio::main]
async fn main() -> Result<()> {
    let config = MonitorConfig::load()?;
    logging::init(&config.logging);

    info!("Starting Pod Monitor");

    // Configure rustls crypto provider before any TLS client is built
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        info!("rustls crypto provider already installed");
    }

    info!("Configuration:");
    info!("  Listen address: {}", config.listen_addr());
    info!("  Default namespace: {}", config.namespaces.default);
    if !config.namespaces.allowed.is_empty() {
        info!("  Allowed namespaces: {}", config.namespaces.allowed.join(", "));
    }
    if !config.namespaces.exclude.is_empty() {
        info!("  Excluded namespaces: {}", config.namespaces.exclude.join(", "));
    }

    let client = Client::try_default().await.map_err(MonitorError::from)?;
    let version = client.apiserver_version().await.map_err(|e| {
        error!("Failed to reach the Kubernetes API server: {}", e);
        MonitorError::from(e)
    })?;
    info!("Connected to Kubernetes {}.{} ({})", version.major, version.minor, version.git_version);

    let hub = Hub::new(PodWatchSource::new(client), config.hub.hub_config()).map_err(MonitorError::from)?;
    let heartbeat = spawn_heartbeat(Arc::clone(&hub), config.hub.heartbeat_interval());

    let listener = tokio::net::TcpListener::bind(config.listen_addr())
        .await
        .map_err(MonitorError::from)?;
    info!("Listening on {}", config.listen_addr());

    let app = server::router(AppState {
        hub: Arc::clone(&hub),
        config: Arc::new(config),
    });

    // Closing the hub ends every WebSocket, which lets the server drain
    let draining = Arc::clone(&hub);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            server::shutdown_signal().await;
            info!("Shutting down");
            draining.shutdown().await;
        })
        .await
        .map_err(MonitorError::from)?;

    hub.shutdown().await;
    if let Err(e) = heartbeat.await {
        error!("Heartbeat task failed: {}", e);
    }

    info!("Pod Monitor stopped");
    Ok(())
}
