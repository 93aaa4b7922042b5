//! Per-request inference pipeline.
//!
//! ```text
//! validate ─▶ stage ─▶ primary ──ok──────────────┐
//!                         │                      ▼
//!                       error ─▶ fallback ─▶ envelope ─▶ persist? ─▶ release
//! ```
//!
//! The staged file is released on every path. The `StagedImage` guard
//! covers early returns and panics; the happy path releases explicitly
//! before returning so the file is gone by the time the caller sees the
//! envelope.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use cropsight_core::{media, InferenceResult, InferenceSource, ResponseEnvelope, TaskKind};
use tracing::Instrument;

use crate::analysis_store::AnalysisStore;
use crate::error::{FallbackError, PrimaryError, RequestError};
use crate::fallback::FallbackBackend;
use crate::persist::{PersistJob, ResultPersister};
use crate::primary::PrimaryBackend;
use crate::staging::{generate_request_id, sanitize_request_id, StagingArea};
use crate::stats::{PipelineStats, StatsSnapshot};
use crate::task::{TaskRegistry, TaskSpec};

#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub task: TaskKind,
    pub owner_id: String,
    /// Caller-supplied id, sanitized before use. Generated when absent.
    pub request_id: Option<String>,
    pub image: Bytes,
    /// Declared content type. Sniffed from the bytes when missing or unknown.
    pub mime_type: Option<String>,
}

/// D1 for the resident service, D2 for a batch worker. D2 > D1.
#[derive(Debug, Clone, Copy)]
pub struct Deadlines {
    pub primary: Duration,
    pub fallback: Duration,
}

pub struct Orchestrator {
    staging: StagingArea,
    tasks: TaskRegistry,
    primary: Arc<dyn PrimaryBackend>,
    fallback: Arc<dyn FallbackBackend>,
    persister: Option<ResultPersister>,
    deadlines: Deadlines,
    stats: PipelineStats,
}

impl Orchestrator {
    pub fn new(
        staging: StagingArea,
        tasks: TaskRegistry,
        primary: Arc<dyn PrimaryBackend>,
        fallback: Arc<dyn FallbackBackend>,
        deadlines: Deadlines,
    ) -> Self {
        Self {
            staging,
            tasks,
            primary,
            fallback,
            persister: None,
            deadlines,
            stats: PipelineStats::default(),
        }
    }

    pub fn with_persister(mut self, persister: ResultPersister) -> Self {
        self.persister = Some(persister);
        self
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    pub fn primary(&self) -> &Arc<dyn PrimaryBackend> {
        &self.primary
    }

    pub fn fallback(&self) -> &Arc<dyn FallbackBackend> {
        &self.fallback
    }

    /// History store, when persistence is configured.
    pub fn records(&self) -> Option<&Arc<dyn AnalysisStore>> {
        self.persister.as_ref().map(ResultPersister::records)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Run one request end to end.
    ///
    /// `Err` only for input the pipeline never started on (or could not
    /// stage). Inference failures come back as an envelope with
    /// `success: false`.
    pub async fn handle(&self, req: InferenceRequest) -> Result<ResponseEnvelope, RequestError> {
        let started = Instant::now();

        if req.image.is_empty() {
            return Err(RequestError::NoInput);
        }
        let mime = media::resolve(req.mime_type.as_deref(), &req.image).ok_or_else(|| {
            RequestError::UnsupportedMediaType(req.mime_type.clone().unwrap_or_else(|| "unknown".to_string()))
        })?;
        let spec = self.tasks.get(req.task).ok_or(RequestError::UnknownTask(req.task))?;

        let request_id = req
            .request_id
            .as_deref()
            .and_then(sanitize_request_id)
            .unwrap_or_else(|| generate_request_id(req.task));

        let span = tracing::info_span!("predict", request_id = %request_id, task = %req.task);
        self.run(req, spec, request_id, mime, started).instrument(span).await
    }

    async fn run(
        &self,
        req: InferenceRequest,
        spec: &TaskSpec,
        request_id: String,
        mime: &'static str,
        started: Instant,
    ) -> Result<ResponseEnvelope, RequestError> {
        self.stats.record_request();

        let ext = media::extension_for(mime).unwrap_or("bin");
        let mut staged = self
            .staging
            .stage(&request_id, &req.image, ext)
            .await
            .map_err(RequestError::Staging)?;
        tracing::debug!(path = %staged.path().display(), bytes = req.image.len(), "image staged");

        let outcome = self.infer(staged.path(), spec).await;
        let processing_time_ms = started.elapsed().as_millis() as u64;

        let envelope = match outcome {
            Ok((result, source)) if result.success => {
                tracing::info!(
                    label = result.label.as_deref().unwrap_or(""),
                    confidence = result.confidence.unwrap_or(0.0),
                    ?source,
                    processing_time_ms,
                    "prediction completed"
                );
                let analysis_id = self.persist(&req, mime, &result, processing_time_ms).await;
                ResponseEnvelope::from_result(&request_id, req.task, processing_time_ms, result, source)
                    .with_analysis_id(analysis_id)
            }
            Ok((result, source)) => {
                self.stats.record_failure();
                tracing::info!(
                    error = result.error.as_deref().unwrap_or(""),
                    ?source,
                    processing_time_ms,
                    "worker found nothing to classify"
                );
                ResponseEnvelope::from_result(&request_id, req.task, processing_time_ms, result, source)
            }
            Err(e) => {
                self.stats.record_failure();
                tracing::error!(error = %e, processing_time_ms, "prediction failed");
                ResponseEnvelope::failure(&request_id, req.task, processing_time_ms, e.public_message())
            }
        };

        staged.release();
        Ok(envelope)
    }

    /// Primary once, then at most one batch worker.
    async fn infer(&self, staged: &Path, spec: &TaskSpec) -> Result<(InferenceResult, InferenceSource), FallbackError> {
        match self.primary.try_fast(staged, spec, self.deadlines.primary).await {
            Ok(result) if result.success => {
                self.stats.record_primary_hit();
                return Ok((result, InferenceSource::Primary));
            }
            Ok(_) => tracing::warn!("resident service returned a failed result, falling back"),
            Err(PrimaryError::Disabled) => tracing::debug!("resident service disabled, using batch worker"),
            Err(e) => tracing::warn!(error = %e, "resident service unavailable, falling back"),
        }

        self.stats.record_fallback_run();
        let result = self
            .fallback
            .run_batch(staged, spec, self.deadlines.fallback)
            .await?;
        Ok((result, InferenceSource::Fallback))
    }

    async fn persist(
        &self,
        req: &InferenceRequest,
        mime: &str,
        result: &InferenceResult,
        processing_time_ms: u64,
    ) -> Option<String> {
        let persister = self.persister.as_ref()?;
        let id = persister
            .persist(PersistJob {
                owner_id: req.owner_id.clone(),
                task: req.task,
                image: req.image.clone(),
                mime_type: mime.to_string(),
                result: result.clone(),
                processing_time_ms,
            })
            .await;
        if id.is_some() {
            self.stats.record_persisted();
        }
        id
    }
}
