use crate::error::AppError;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use backup_core::models::{BackupCategory, BackupMetadata, BackupTier, EntityRef, RestoreMode, RestoreResult};
use backup_core::monitoring::BackupHealth;
use serde::Deserialize;
use std::sync::Arc;

pub fn router(_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_backups).post(create_backup))
        .route("/health", get(health))
        .route("/restore", post(restore))
        .route("/{id}", get(get_backup).delete(delete_backup))
}

#[derive(Deserialize)]
pub struct BackupsQuery {
    pub category: Option<BackupCategory>,
}

async fn list_backups(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BackupsQuery>,
) -> Result<Json<Vec<BackupMetadata>>, AppError> {
    let backups = state.service.engine.list_backups(query.category).await?;
    Ok(Json(backups))
}

#[derive(Deserialize)]
pub struct CreateBackupRequest {
    #[serde(rename = "type", default = "default_category")]
    pub category: BackupCategory,
    pub tier: Option<BackupTier>,
}

fn default_category() -> BackupCategory {
    BackupCategory::Full
}

async fn create_backup(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateBackupRequest>,
) -> Result<(StatusCode, Json<BackupMetadata>), AppError> {
    let tier = req.tier.unwrap_or(match req.category {
        BackupCategory::Full => BackupTier::Daily,
        _ => BackupTier::Manual,
    });
    let backup = state.service.engine.create_backup(req.category, tier).await?;
    Ok((StatusCode::CREATED, Json(backup)))
}

async fn health(State(state): State<Arc<AppState>>) -> Result<Json<BackupHealth>, AppError> {
    Ok(Json(state.service.monitor.check_health().await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreRequest {
    pub backup_id: String,
    #[serde(default = "default_mode")]
    pub mode: RestoreMode,
    #[serde(default)]
    pub items: Vec<EntityRef>,
}

fn default_mode() -> RestoreMode {
    RestoreMode::Full
}

/// Dry run first; a backup that fails it is never applied
async fn restore(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RestoreRequest>,
) -> Result<(StatusCode, Json<RestoreResult>), AppError> {
    let service = &state.service;
    service.engine.get_backup(&req.backup_id).await?;
    if !service.restore.test_restore(&req.backup_id).await {
        return Err(AppError::Unprocessable(format!(
            "Backup {} failed the restore test, aborting",
            req.backup_id
        )));
    }

    let result = service.restore.restore(&req.backup_id, req.mode, &req.items).await;
    let status = if result.success {
        StatusCode::OK
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };
    Ok((status, Json(result)))
}

async fn get_backup(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<BackupMetadata>, AppError> {
    Ok(Json(state.service.engine.get_backup(&id).await?))
}

async fn delete_backup(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.service.engine.delete_backup(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
