//! Cache administration endpoints
//!
//! - GET /api/v1/cache/stats/:namespace - hit/miss/eviction counters
//! - POST /api/v1/cache/clear - clear one namespace or all, optionally as a dry run
//! - GET /api/v1/cache/disk-usage - persistent tier bytes and item counts

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use folio_service::VersionedStore;
use folio_storage::{CacheStats, ClearReport, DiskUsage};
use serde::Deserialize;
use std::sync::Arc;

use super::error::api_error;

/// Clear cache request
#[derive(Debug, Default, Deserialize)]
pub struct ClearCacheRequest {
    /// Namespace to clear; every namespace when absent
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub dry_run: bool,
}

/// Disk usage query parameters
#[derive(Debug, Default, Deserialize)]
pub struct DiskUsageQuery {
    pub namespace: Option<String>,
}

#[tracing::instrument(skip(store))]
pub async fn cache_stats(
    Path(namespace): Path<String>,
    State(store): State<Arc<VersionedStore>>,
) -> Result<Json<CacheStats>, (StatusCode, String)> {
    store.cache_stats(&namespace).await.map(Json).map_err(api_error)
}

/// Pinned entries are never cleared; the report only counts evictable ones.
#[tracing::instrument(skip(store, req), fields(namespace = ?req.namespace, dry_run = req.dry_run))]
pub async fn clear_cache(
    State(store): State<Arc<VersionedStore>>,
    Json(req): Json<ClearCacheRequest>,
) -> Result<Json<ClearReport>, (StatusCode, String)> {
    let report = store
        .clear_cache(req.namespace.as_deref(), req.dry_run)
        .await
        .map_err(api_error)?;
    tracing::info!(
        l1_items = report.total_l1_items(),
        l2_items = report.total_l2_items(),
        bytes = report.total_bytes(),
        dry_run = req.dry_run,
        "cache clear requested"
    );
    Ok(Json(report))
}

#[tracing::instrument(skip(store))]
pub async fn disk_usage(
    Query(query): Query<DiskUsageQuery>,
    State(store): State<Arc<VersionedStore>>,
) -> Result<Json<DiskUsage>, (StatusCode, String)> {
    store
        .disk_usage(query.namespace.as_deref())
        .await
        .map(Json)
        .map_err(api_error)
}
