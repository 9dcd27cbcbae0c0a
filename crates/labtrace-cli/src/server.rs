//! HTTP server for health and metrics endpoints.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use labtrace_core::health::{ComponentStatus, HealthCheck, HealthStatus};
use labtrace_core::metrics::CollectorMetrics;
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

/// Shared state for HTTP endpoints.
pub struct ServerState {
    pub health: Arc<HealthCheck>,
    pub metrics: Arc<CollectorMetrics>,
}

/// Health response structure.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub running: bool,
    pub uptime_seconds: u64,
    pub components: HashMap<String, ComponentStatusResponse>,
}

/// Component status response.
#[derive(Debug, Serialize)]
pub struct ComponentStatusResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<&ComponentStatus> for ComponentStatusResponse {
    fn from(status: &ComponentStatus) -> Self {
        let (status, message) = match status {
            ComponentStatus::Healthy => ("healthy", None),
            ComponentStatus::Degraded(msg) => ("degraded", Some(msg.clone())),
            ComponentStatus::Unhealthy(msg) => ("unhealthy", Some(msg.clone())),
            ComponentStatus::Unknown => ("unknown", None),
        };
        ComponentStatusResponse {
            status: status.to_string(),
            message,
        }
    }
}

/// Build the router serving `/health`, `/healthz`, `/readyz` and `/metrics`.
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Serve health and metrics until `shutdown_rx` fires.
pub async fn start_server(
    state: Arc<ServerState>,
    port: u16,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, port, "Failed to bind monitoring server");
            return;
        }
    };

    info!(port, "Monitoring server started");

    let shutdown = async move {
        let _ = shutdown_rx.recv().await;
        info!("Monitoring server shutting down");
    };

    if let Err(e) = axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
    {
        error!(error = %e, "Monitoring server error");
    }
}

/// Health endpoint handler.
async fn health_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let overall = state.health.overall_status();

    let components = state
        .health
        .all_statuses()
        .iter()
        .map(|(component, status)| {
            (
                component.as_str().to_string(),
                ComponentStatusResponse::from(status),
            )
        })
        .collect();

    let response = HealthResponse {
        status: overall.as_str().to_string(),
        running: state.health.is_running(),
        uptime_seconds: state.health.uptime_seconds(),
        components,
    };

    let status_code = match overall {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(response))
}

/// Liveness probe handler.
async fn healthz_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    if state.health.overall_status() != HealthStatus::Unhealthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Readiness probe handler: ready once a collector is running.
async fn readyz_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    if state.health.is_running() && state.health.is_operational() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Prometheus metrics endpoint handler.
async fn metrics_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.metrics.export_prometheus_text(),
    )
}
