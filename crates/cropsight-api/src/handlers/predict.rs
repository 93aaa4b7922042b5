//! POST /predict/{task} — run one image through the pipeline.

use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use bytes::Bytes;
use serde::Deserialize;

use cropsight_core::ResponseEnvelope;
use cropsight_services::{InferenceRequest, RequestError};

use super::{api_error, owner_id, parse_task, ApiError, ApiState};

const NO_IMAGE: &str = "No image provided. Please upload an image.";

#[derive(Debug, Deserialize)]
pub struct PredictQuery {
    #[serde(rename = "requestId")]
    pub request_id: Option<String>,
}

/// Multipart body: one file part (any field name) plus an optional
/// `requestId` text part, which overrides `?requestId=`.
pub async fn handle_predict(
    State(state): State<ApiState>,
    Path(task): Path<String>,
    Query(query): Query<PredictQuery>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ResponseEnvelope>, ApiError> {
    let task = parse_task(&task)?;
    let owner_id = owner_id(&headers)?;
    let mut multipart = multipart.map_err(|_| api_error(StatusCode::BAD_REQUEST, NO_IMAGE))?;

    let mut request_id = query.request_id;
    let mut image: Option<(Bytes, Option<String>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| api_error(e.status(), e.body_text()))?
    {
        if field.name() == Some("requestId") {
            let text = field
                .text()
                .await
                .map_err(|e| api_error(e.status(), e.body_text()))?;
            request_id = Some(text);
            continue;
        }
        if image.is_some() {
            continue;
        }

        let content_type = field.content_type().map(str::to_string);
        let data = field
            .bytes()
            .await
            .map_err(|e| api_error(e.status(), e.body_text()))?;
        if data.len() > state.max_upload_bytes {
            return Err(api_error(
                StatusCode::PAYLOAD_TOO_LARGE,
                format!("image exceeds {} byte limit", state.max_upload_bytes),
            ));
        }
        if !data.is_empty() {
            image = Some((data, content_type));
        }
    }

    let (image, mime_type) = image.ok_or_else(|| api_error(StatusCode::BAD_REQUEST, NO_IMAGE))?;
    let request = InferenceRequest {
        task,
        owner_id,
        request_id,
        image,
        mime_type,
    };

    state
        .orchestrator
        .handle(request)
        .await
        .map(Json)
        .map_err(request_error)
}

fn request_error(e: RequestError) -> ApiError {
    match e {
        RequestError::NoInput => api_error(StatusCode::BAD_REQUEST, NO_IMAGE),
        RequestError::UnsupportedMediaType(mime) => api_error(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            format!("unsupported image type {mime}, expected JPEG, PNG or WebP"),
        ),
        RequestError::UnknownTask(task) => api_error(StatusCode::NOT_FOUND, format!("unknown task: {task}")),
        RequestError::Staging(err) => {
            tracing::error!(error = %err, "failed to stage upload");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to store upload")
        }
    }
}
