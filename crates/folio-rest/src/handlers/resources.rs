//! Version history and retention endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use folio_core::{ResourceType, VersionedResource};
use folio_service::{PruneReport, ResolvedResource, VersionedStore};
use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;

use super::error::api_error;

/// Prune request. Omitted limits fall back to the configured retention policy.
#[derive(Debug, Default, Deserialize)]
pub struct PruneRequest {
    #[serde(default)]
    pub max_age_days: Option<u32>,
    #[serde(default)]
    pub keep_minimum: Option<usize>,
    #[serde(default)]
    pub dry_run: bool,
}

fn parse_resource_type(resource_type: &str) -> Result<ResourceType, (StatusCode, String)> {
    ResourceType::from_str(resource_type).map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))
}

/// All versions of a resource, newest first.
#[tracing::instrument(skip(store))]
pub async fn list_versions(
    Path((resource_type, resource_id)): Path<(String, String)>,
    State(store): State<Arc<VersionedStore>>,
) -> Result<Json<Vec<VersionedResource>>, (StatusCode, String)> {
    let resource_type = parse_resource_type(&resource_type)?;
    let versions = store
        .list_versions(&resource_id, resource_type)
        .await
        .map_err(api_error)?;
    if versions.is_empty() {
        return Err((
            StatusCode::NOT_FOUND,
            format!("resource `{resource_type}/{resource_id}` was not found"),
        ));
    }
    Ok(Json(versions))
}

/// Latest version with its resolved content.
#[tracing::instrument(skip(store))]
pub async fn get_latest(
    Path((resource_type, resource_id)): Path<(String, String)>,
    State(store): State<Arc<VersionedStore>>,
) -> Result<Json<ResolvedResource>, (StatusCode, String)> {
    let resource_type = parse_resource_type(&resource_type)?;
    store
        .get_latest_version(&resource_id, resource_type)
        .await
        .map(Json)
        .map_err(api_error)
}

#[tracing::instrument(skip(store, req), fields(dry_run = req.dry_run))]
pub async fn prune(
    State(store): State<Arc<VersionedStore>>,
    Json(req): Json<PruneRequest>,
) -> Result<Json<PruneReport>, (StatusCode, String)> {
    let retention = &store.config().retention;
    let max_age_days = req.max_age_days.unwrap_or(retention.max_age_days);
    let keep_minimum = req.keep_minimum.unwrap_or(retention.keep_minimum);

    store
        .prune_old_versions_with_timeout(
            max_age_days,
            keep_minimum,
            req.dry_run,
            retention.prune_timeout(),
        )
        .await
        .map(Json)
        .map_err(api_error)
}
