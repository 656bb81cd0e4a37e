//! REST endpoints for queueing scans and watching them run.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use tracing::{info, warn};

use super::service::ScanService;
use super::worker::ScanRequest;

#[derive(Debug, Serialize)]
struct ScanProgress {
    id: i64,
    percent: f64,
}

/// Build the Axum router for the scan API.
pub fn scan_routes(service: Arc<ScanService>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/scans", post(queue_scan))
        .route("/api/v1/scans/running", get(running_scans))
        .route("/api/v1/scans/{id}/progress", get(scan_progress))
        .route("/api/v1/scans/{id}/logs", get(scan_logs))
        .with_state(service)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "scan-runner"
    }))
}

async fn queue_scan(
    State(service): State<Arc<ScanService>>,
    Json(request): Json<ScanRequest>,
) -> impl IntoResponse {
    let scan_id = request.scan_id;
    match service.queue(request).await {
        Ok(()) => {
            info!(scan_id, "Scan accepted");
            (
                StatusCode::ACCEPTED,
                Json(serde_json::json!({"id": scan_id, "status": "queued"})),
            )
        }
        Err(e) => {
            warn!(scan_id, error = %e, "Scan rejected");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({"error": e.to_string()})),
            )
        }
    }
}

async fn running_scans(State(service): State<Arc<ScanService>>) -> impl IntoResponse {
    let scans: Vec<ScanProgress> = service
        .running()
        .into_iter()
        .filter_map(|id| service.progress(id).map(|percent| ScanProgress { id, percent }))
        .collect();
    Json(scans)
}

async fn scan_progress(
    State(service): State<Arc<ScanService>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    match service.progress(id) {
        Some(percent) => (
            StatusCode::OK,
            Json(serde_json::json!({"id": id, "percent": percent})),
        ),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "Scan not running"})),
        ),
    }
}

async fn scan_logs(State(service): State<Arc<ScanService>>, Path(id): Path<i64>) -> Response {
    match service.logs(id).await {
        Ok(Some(text)) => (StatusCode::OK, text).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "No log for scan"})),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(scan_id = id, error = %e, "Failed to read scan log");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": e.to_string()})),
            )
                .into_response()
        }
    }
}
