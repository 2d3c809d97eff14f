//! Liveness and metrics endpoints.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

/// `GET /health`: the process is up and serving.
pub async fn health_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}

/// `GET /metrics`: Prometheus text exposition of every registered metric.
pub async fn metrics() -> (StatusCode, String) {
    (StatusCode::OK, folio_service::metrics::export_prometheus())
}
