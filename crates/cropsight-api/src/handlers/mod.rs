//! HTTP API handlers.

pub mod history;
pub mod predict;
pub mod status;

use std::path::PathBuf;
use std::sync::Arc;

use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Serialize;

use cropsight_core::TaskKind;
use cropsight_services::Orchestrator;

/// Header carrying the authenticated caller's id, set by the fronting gateway.
pub const OWNER_HEADER: &str = "x-owner-id";

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
    pub history_limit: usize,
    pub max_upload_bytes: usize,
    /// Served under `/assets` when persistence writes locally.
    pub asset_dir: Option<PathBuf>,
}

// ── Shared helpers ────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

pub type ApiError = (StatusCode, Json<ErrorBody>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            success: false,
            error: message.into(),
            request_id: None,
        }),
    )
}

fn owner_id(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get(OWNER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| api_error(StatusCode::UNAUTHORIZED, "User not authenticated"))
}

fn parse_task(raw: &str) -> Result<TaskKind, ApiError> {
    raw.parse()
        .map_err(|_| api_error(StatusCode::NOT_FOUND, format!("unknown task: {raw}")))
}

// Re-export handler functions for use in router setup.
pub use history::{handle_history, handle_history_delete};
pub use predict::handle_predict;
pub use status::{handle_health, handle_status};
