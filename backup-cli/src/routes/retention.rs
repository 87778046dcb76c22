use crate::error::AppError;
use crate::state::AppState;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use backup_core::engine::PruneReport;
use std::sync::Arc;

pub fn router(_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new().route("/enforce", post(enforce))
}

async fn enforce(State(state): State<Arc<AppState>>) -> Result<Json<PruneReport>, AppError> {
    Ok(Json(state.service.versions.enforce_retention_policy().await?))
}
