//! HTTP API: instrumentation state, annotate endpoints, health and metrics

use crate::error::{ApiError, ApiResult};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use server_lib::{
    annotate::AnnotateRequest,
    health::{components, ComponentStatus, HealthRegistry},
    AnnotateError, AnnotateResponse, Annotator, LogsRequest, ProjectedRecord, StateReader,
    TracesRequest,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub annotator: Annotator,
    pub state_reader: StateReader,
    pub health_registry: HealthRegistry,
}

impl AppState {
    pub fn new(
        annotator: Annotator,
        state_reader: StateReader,
        health_registry: HealthRegistry,
    ) -> Self {
        Self {
            annotator,
            state_reader,
            health_registry,
        }
    }

    /// Track the Kubernetes API component from the outcome of a cluster call
    async fn record_cluster_outcome(&self, failure: Option<String>) {
        match failure {
            Some(message) => {
                self.health_registry
                    .set_unhealthy(components::KUBE_API, message)
                    .await
            }
            None => self.health_registry.set_healthy(components::KUBE_API).await,
        }
    }
}

/// `GET /api/v1/state`
async fn get_state(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<ProjectedRecord>>> {
    match state.state_reader.read_state().await {
        Ok(records) => {
            state.record_cluster_outcome(None).await;
            Ok(Json(records))
        }
        Err(e) => {
            warn!(error = %e, "Failed to read instrumentation state");
            state.record_cluster_outcome(Some(e.to_string())).await;
            Err(e.into())
        }
    }
}

async fn annotate<R: AnnotateRequest>(
    state: &AppState,
    body: Result<Json<Vec<R>>, JsonRejection>,
) -> ApiResult<Json<Vec<AnnotateResponse>>> {
    let Json(items) = body?;
    match state.annotator.annotate(&items).await {
        Ok(responses) => {
            state.record_cluster_outcome(None).await;
            Ok(Json(responses))
        }
        Err(e) => {
            warn!(feature = R::FEATURE.as_str(), error = %e, "Annotate request failed");
            match &e {
                AnnotateError::Cluster(cluster) => {
                    state.record_cluster_outcome(Some(cluster.to_string())).await
                }
                AnnotateError::ConfirmationTimeout { .. } => {
                    state.record_cluster_outcome(None).await
                }
                AnnotateError::Validation(_) => {}
            }
            Err(e.into())
        }
    }
}

/// `POST /api/v1/annotate/traces`
async fn annotate_traces(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Vec<TracesRequest>>, JsonRejection>,
) -> ApiResult<Json<Vec<AnnotateResponse>>> {
    annotate(&state, body).await
}

/// `POST /api/v1/annotate/logs`
async fn annotate_logs(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Vec<LogsRequest>>, JsonRejection>,
) -> ApiResult<Json<Vec<AnnotateResponse>>> {
    annotate(&state, body).await
}

async fn method_not_allowed() -> ApiError {
    ApiError::method_not_allowed()
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> ApiResult<impl IntoResponse> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| ApiError::internal(format!("Failed to encode metrics: {}", e)))?;

    Ok((
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    ))
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/api/v1/state",
            get(get_state).fallback(method_not_allowed),
        )
        .route(
            "/api/v1/annotate/traces",
            post(annotate_traces).fallback(method_not_allowed),
        )
        .route(
            "/api/v1/annotate/logs",
            post(annotate_logs).fallback(method_not_allowed),
        )
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Start the API server and run until `shutdown` resolves
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
