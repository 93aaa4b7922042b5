//! Caller-facing response envelope and the durable analysis record.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::result::{Detection, InferenceResult};
use crate::task::TaskKind;

/// Which path produced the answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceSource {
    Primary,
    Fallback,
}

/// JSON body returned for every predict request that got past input checks.
///
/// Classification fields are flattened next to the metadata; pass-through
/// worker fields from `InferenceResult::raw` sit at the top level too.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    pub success: bool,
    pub request_id: String,
    pub task: TaskKind,
    pub processing_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub detections: Vec<Detection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Null unless the analysis record was written.
    #[serde(default)]
    pub analysis_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inference_source: Option<InferenceSource>,
    #[serde(flatten)]
    pub raw: Map<String, Value>,
}

impl ResponseEnvelope {
    pub fn from_result(
        request_id: impl Into<String>,
        task: TaskKind,
        processing_time_ms: u64,
        result: InferenceResult,
        source: InferenceSource,
    ) -> Self {
        Self {
            success: result.success,
            request_id: request_id.into(),
            task,
            processing_time_ms,
            label: result.label,
            confidence: result.confidence,
            detections: result.detections,
            error: result.error,
            analysis_id: None,
            inference_source: Some(source),
            raw: result.raw,
        }
    }

    pub fn failure(
        request_id: impl Into<String>,
        task: TaskKind,
        processing_time_ms: u64,
        error: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            request_id: request_id.into(),
            task,
            processing_time_ms,
            label: None,
            confidence: None,
            detections: Vec::new(),
            error: Some(error.into()),
            analysis_id: None,
            inference_source: None,
            raw: Map::new(),
        }
    }

    pub fn with_analysis_id(mut self, analysis_id: Option<String>) -> Self {
        self.analysis_id = analysis_id;
        self
    }
}

/// Uploaded source image in the asset store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAsset {
    pub id: String,
    pub url: String,
}

/// Immutable history record, written once per successful analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedAnalysis {
    pub id: String,
    pub owner_id: String,
    pub task: TaskKind,
    pub image_asset: ImageAsset,
    pub result_snapshot: InferenceResult,
    pub processing_time_ms: u64,
    /// Unix ms.
    pub created_at: u64,
}
