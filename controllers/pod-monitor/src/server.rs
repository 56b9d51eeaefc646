//! HTTP server: routes, health and metrics endpoints, shutdown signal handling.

use crate::config::MonitorConfig;
use crate::transport::ws_handler;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use watch_hub::{Hub, WatchSource};

/// Shared state handed to every request handler.
pub struct AppState<S: WatchSource> {
    /// Hub serving WebSocket subscribers
    pub hub: Arc<Hub<S>>,
    /// Loaded configuration
    pub config: Arc<MonitorConfig>,
}

// Manual impl: a derive would require `S: Clone`
impl<S: WatchSource> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            hub: Arc::clone(&self.hub),
            config: Arc::clone(&self.config),
        }
    }
}

/// Builds the HTTP router with request tracing.
pub fn router<S: WatchSource>(state: AppState<S>) -> Router {
    Router::new()
        .route("/api/v1/ws", get(ws_handler::<S>))
        .route("/healthz", get(healthz::<S>))
        .route("/metrics", get(metrics::<S>))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Liveness endpoint reporting hub registry counts.
async fn healthz<S: WatchSource>(State(state): State<AppState<S>>) -> Response {
    let stats = state.hub.stats();
    if state.hub.shutdown_token().is_cancelled() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "shutting_down", "hub": stats})),
        )
            .into_response();
    }
    Json(json!({"status": "ok", "hub": stats})).into_response()
}

/// Prometheus text exposition of the hub metrics.
async fn metrics<S: WatchSource>(State(state): State<AppState<S>>) -> Response {
    match state.hub.metrics().encode() {
        Ok(body) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
