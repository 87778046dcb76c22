use crate::error::AppError;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use backup_core::models::{BackupVersion, VersionComparison, VersionFilter, VersionTag};
use backup_core::versioning::{RollbackOptions, RollbackOutcome};
use serde::Deserialize;
use std::sync::Arc;

pub fn router(_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_versions))
        .route("/compare", get(compare_versions))
        .route("/{id}", get(get_version))
        .route("/{id}/tags", post(tag_version))
        .route("/{id}/rollback", post(rollback))
}

async fn list_versions(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<VersionFilter>,
) -> Result<Json<Vec<BackupVersion>>, AppError> {
    Ok(Json(state.service.versions.list_versions(&filter).await?))
}

async fn get_version(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<BackupVersion>, AppError> {
    Ok(Json(state.service.versions.get_version(&id).await?))
}

#[derive(Deserialize)]
pub struct TagRequest {
    pub tag: VersionTag,
}

async fn tag_version(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<TagRequest>,
) -> Result<Json<BackupVersion>, AppError> {
    Ok(Json(state.service.versions.tag_version(&id, req.tag).await?))
}

#[derive(Deserialize)]
pub struct CompareQuery {
    pub v1: String,
    pub v2: String,
}

async fn compare_versions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CompareQuery>,
) -> Result<Json<VersionComparison>, AppError> {
    let comparison = state
        .service
        .versions
        .compare_versions(&query.v1, &query.v2)
        .await?;
    Ok(Json(comparison))
}

async fn rollback(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    options: Option<Json<RollbackOptions>>,
) -> Result<Json<RollbackOutcome>, AppError> {
    let options = options.map(|Json(o)| o).unwrap_or_default();
    let outcome = state.service.versions.rollback_to_version(&id, options).await?;
    if !outcome.restore.success {
        return Err(AppError::Unprocessable(
            outcome
                .restore
                .error
                .unwrap_or_else(|| "Rollback failed".into()),
        ));
    }
    Ok(Json(outcome))
}
