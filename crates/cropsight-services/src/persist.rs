//! Best-effort persistence of successful analyses.
//!
//! Upload the source image, then append the analysis record. Nothing here
//! can fail a request: errors, timeouts and panics in a store all end as a
//! logged warning and a null `analysisId`.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use cropsight_core::{now_ms, InferenceResult, PersistedAnalysis, TaskKind};

use crate::analysis_store::AnalysisStore;
use crate::asset_store::AssetStore;
use crate::error::PersistError;

/// Everything needed to persist one analysis, owned so the work can run on
/// its own task.
#[derive(Debug, Clone)]
pub struct PersistJob {
    pub owner_id: String,
    pub task: TaskKind,
    pub image: Bytes,
    pub mime_type: String,
    pub result: InferenceResult,
    pub processing_time_ms: u64,
}

#[derive(Clone)]
pub struct ResultPersister {
    assets: Arc<dyn AssetStore>,
    records: Arc<dyn AnalysisStore>,
    timeout: Duration,
}

impl ResultPersister {
    pub fn new(assets: Arc<dyn AssetStore>, records: Arc<dyn AnalysisStore>, timeout: Duration) -> Self {
        Self {
            assets,
            records,
            timeout,
        }
    }

    pub fn records(&self) -> &Arc<dyn AnalysisStore> {
        &self.records
    }

    /// Returns the new record id, or `None` if nothing was saved.
    pub async fn persist(&self, job: PersistJob) -> Option<String> {
        if !job.result.is_persistable() {
            return None;
        }

        let this = self.clone();
        let handle = tokio::spawn(async move {
            match tokio::time::timeout(this.timeout, this.write(&job)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(PersistError::Timeout(this.timeout)),
            }
        });

        match handle.await {
            Ok(Ok(id)) => {
                tracing::debug!(analysis_id = %id, "analysis saved");
                Some(id)
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "analysis not saved, returning result anyway");
                None
            }
            Err(e) => {
                tracing::error!(error = %e, "persistence task aborted, returning result anyway");
                None
            }
        }
    }

    async fn write(&self, job: &PersistJob) -> Result<String, PersistError> {
        let image_asset = self
            .assets
            .upload(&job.image, &job.mime_type)
            .await
            .map_err(PersistError::Upload)?;

        let record = PersistedAnalysis {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: job.owner_id.clone(),
            task: job.task,
            image_asset,
            result_snapshot: job.result.clone(),
            processing_time_ms: job.processing_time_ms,
            created_at: now_ms(),
        };
        self.records.insert(&record).await.map_err(PersistError::Record)?;
        Ok(record.id)
    }
}
