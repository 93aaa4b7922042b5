//! Client for the resident inference service.
//!
//! The resident service keeps models warm and answers in well under a
//! second when it is up. Any failure here is recovered by the caller, so
//! every error is returned rather than logged.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use cropsight_core::config::PrimaryConfig;
use cropsight_core::{InferenceResult, TaskKind};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::PrimaryError;
use crate::task::TaskSpec;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(2);

#[async_trait]
pub trait PrimaryBackend: Send + Sync {
    /// One attempt, bounded by `deadline`. `Ok` always carries `success: true`.
    async fn try_fast(
        &self,
        staged: &Path,
        task: &TaskSpec,
        deadline: Duration,
    ) -> Result<InferenceResult, PrimaryError>;

    async fn healthy(&self) -> bool;

    fn enabled(&self) -> bool {
        true
    }
}

/// Body posted to `{base_url}{route}`. The service shares our filesystem,
/// so it receives the staged path rather than the bytes.
#[derive(Serialize)]
struct FastRequest<'a> {
    image_path: &'a Path,
    /// Name the leaf route reads.
    file_path: &'a Path,
    task: TaskKind,
}

#[derive(Clone)]
pub struct PrimaryClient {
    http: reqwest::Client,
    base_url: Option<String>,
}

impl PrimaryClient {
    pub fn new(config: &PrimaryConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config
                .enabled
                .then(|| config.base_url.trim_end_matches('/').to_string()),
        }
    }

    pub fn disabled() -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: None,
        }
    }

    async fn call(&self, base: &str, staged: &Path, task: &TaskSpec) -> Result<InferenceResult, PrimaryError> {
        let url = format!("{}{}", base, task.primary_route);
        let resp = self
            .http
            .post(&url)
            .json(&FastRequest {
                image_path: staged,
                file_path: staged,
                task: task.kind,
            })
            .send()
            .await
            .map_err(|e| PrimaryError::Unreachable(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(PrimaryError::Status(status.as_u16()));
        }

        let body: Map<String, Value> = resp
            .json()
            .await
            .map_err(|e| PrimaryError::Schema(e.to_string()))?;
        let result = task
            .shape
            .normalize(body)
            .map_err(|e| PrimaryError::Schema(e.to_string()))?;

        if !result.success {
            return Err(PrimaryError::Declined(result.error.unwrap_or_default()));
        }
        Ok(result)
    }
}

#[async_trait]
impl PrimaryBackend for PrimaryClient {
    async fn try_fast(
        &self,
        staged: &Path,
        task: &TaskSpec,
        deadline: Duration,
    ) -> Result<InferenceResult, PrimaryError> {
        let base = self.base_url.as_deref().ok_or(PrimaryError::Disabled)?;
        tokio::time::timeout(deadline, self.call(base, staged, task))
            .await
            .map_err(|_| PrimaryError::Timeout(deadline))?
    }

    async fn healthy(&self) -> bool {
        let Some(base) = self.base_url.as_deref() else {
            return false;
        };
        let probe = self.http.get(format!("{base}/health")).send();
        matches!(
            tokio::time::timeout(HEALTH_TIMEOUT, probe).await,
            Ok(Ok(resp)) if resp.status().is_success()
        )
    }

    fn enabled(&self) -> bool {
        self.base_url.is_some()
    }
}
