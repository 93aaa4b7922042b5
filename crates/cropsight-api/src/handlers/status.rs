//! /status, /health handlers.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use cropsight_services::StatsSnapshot;

use super::ApiState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub pipeline: StatsSnapshot,
    pub primary_enabled: bool,
    pub primary_healthy: bool,
    pub worker_slots_available: usize,
    pub staged_files: usize,
    pub history_enabled: bool,
}

pub async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let orch = &state.orchestrator;
    let primary_enabled = orch.primary().enabled();
    let primary_healthy = primary_enabled && orch.primary().healthy().await;

    Json(StatusResponse {
        pipeline: orch.stats(),
        primary_enabled,
        primary_healthy,
        worker_slots_available: orch.fallback().available_slots(),
        staged_files: orch.staging().outstanding(),
        history_enabled: orch.records().is_some(),
    })
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

pub async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}
