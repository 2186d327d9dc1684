use crate::error::AppError;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use datasaver_core::{BackupRecord, ValidationResult};
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_backups))
        .route("/{id}", get(get_backup))
        .route("/{id}/validate", get(validate_backup))
}

async fn list_backups(State(state): State<Arc<AppState>>) -> Result<Json<Vec<BackupRecord>>, AppError> {
    let records = state.engine.list_backups(&state.shutdown).await?;
    Ok(Json(records))
}

async fn get_backup(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<BackupRecord>, AppError> {
    let record = state.engine.get_backup(&state.shutdown, &id).await?;
    Ok(Json(record))
}

async fn validate_backup(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ValidationResult>, AppError> {
    let record = state.engine.get_backup(&state.shutdown, &id).await?;
    let result = state.engine.validator().validate(&record).await?;
    Ok(Json(result))
}
