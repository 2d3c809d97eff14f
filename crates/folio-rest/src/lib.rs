//! HTTP adapter over the Folio versioned store.

pub mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use folio_service::VersionedStore;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Builds the API router over `store`.
pub fn router(store: Arc<VersionedStore>) -> Router {
    Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/metrics", get(handlers::metrics))
        // Cache administration
        .route("/api/v1/cache/stats/:namespace", get(handlers::cache_stats))
        .route("/api/v1/cache/clear", post(handlers::clear_cache))
        .route("/api/v1/cache/disk-usage", get(handlers::disk_usage))
        // Version history and retention
        .route("/api/v1/prune", post(handlers::prune))
        .route(
            "/api/v1/resources/:resource_type/:resource_id/versions",
            get(handlers::list_versions),
        )
        .route(
            "/api/v1/resources/:resource_type/:resource_id/latest",
            get(handlers::get_latest),
        )
        .with_state(store)
}

/// [`router`] with request tracing and a per-request deadline. Requests that
/// run past `request_timeout` are answered with `408 Request Timeout`.
pub fn app(store: Arc<VersionedStore>, request_timeout: Duration) -> Router {
    router(store).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(TimeoutLayer::new(request_timeout)),
    )
}
