//! /history handlers — an owner's past analyses.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Serialize;

use cropsight_core::PersistedAnalysis;

use super::{api_error, owner_id, parse_task, ApiError, ApiState};

#[derive(Serialize)]
pub struct HistoryResponse {
    pub success: bool,
    pub count: usize,
    pub history: Vec<PersistedAnalysis>,
}

#[derive(Serialize)]
pub struct DeleteResponse {
    pub success: bool,
    pub message: String,
}

pub async fn handle_history(
    State(state): State<ApiState>,
    Path(task): Path<String>,
    headers: HeaderMap,
) -> Result<Json<HistoryResponse>, ApiError> {
    let task = parse_task(&task)?;
    let owner_id = owner_id(&headers)?;
    let records = state
        .orchestrator
        .records()
        .ok_or_else(|| api_error(StatusCode::SERVICE_UNAVAILABLE, "analysis history is disabled"))?;

    let history = records
        .history(&owner_id, task, state.history_limit)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, %task, "failed to fetch history");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch history")
        })?;

    Ok(Json(HistoryResponse {
        success: true,
        count: history.len(),
        history,
    }))
}

pub async fn handle_history_delete(
    State(state): State<ApiState>,
    Path((task, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<DeleteResponse>, ApiError> {
    parse_task(&task)?;
    let owner_id = owner_id(&headers)?;
    let records = state
        .orchestrator
        .records()
        .ok_or_else(|| api_error(StatusCode::SERVICE_UNAVAILABLE, "analysis history is disabled"))?;

    let deleted = records.delete(&owner_id, &id).await.map_err(|e| {
        tracing::error!(error = %e, analysis_id = %id, "failed to delete analysis");
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to delete analysis")
    })?;

    if !deleted {
        return Err(api_error(StatusCode::NOT_FOUND, "Analysis not found"));
    }
    tracing::info!(analysis_id = %id, "analysis deleted");
    Ok(Json(DeleteResponse {
        success: true,
        message: "Analysis deleted successfully".to_string(),
    }))
}
