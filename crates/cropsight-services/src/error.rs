//! Error taxonomy for the inference pipeline.
//!
//! Only `RequestError` and `FallbackError` ever reach a caller. Primary and
//! persistence failures are absorbed where they happen.

use std::time::Duration;

use cropsight_core::TaskKind;

/// Resident service could not answer. Always recovered by falling back.
#[derive(Debug, thiserror::Error)]
pub enum PrimaryError {
    #[error("resident service disabled")]
    Disabled,
    #[error("resident service unreachable: {0}")]
    Unreachable(String),
    #[error("resident service returned HTTP {0}")]
    Status(u16),
    #[error("resident service response did not match the expected shape: {0}")]
    Schema(String),
    #[error("resident service declined the image: {0}")]
    Declined(String),
    #[error("resident service timed out after {0:?}")]
    Timeout(Duration),
}

/// Batch worker failed. Fatal for the request.
#[derive(Debug, thiserror::Error)]
pub enum FallbackError {
    #[error("no worker slot freed up within {0:?}")]
    Busy(Duration),
    #[error("failed to spawn worker {executable}: {source}")]
    Spawn {
        executable: String,
        #[source]
        source: std::io::Error,
    },
    #[error("worker exceeded {0:?} and was killed")]
    Timeout(Duration),
    #[error("worker {}: {stderr}", describe_exit(.code))]
    NonZeroExit { code: Option<i32>, stderr: String },
    #[error("worker printed no structured output")]
    NoStructuredOutput { stdout: String },
    #[error("worker output could not be decoded: {reason}")]
    MalformedOutput { reason: String, output: String },
    #[error("failed to collect worker output: {0}")]
    Io(#[source] std::io::Error),
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("exited with code {c}"),
        None => "was terminated by a signal".to_string(),
    }
}

impl FallbackError {
    /// Message safe to show a client. Worker stderr, paths and raw output
    /// stay in the logs.
    pub fn public_message(&self) -> &'static str {
        match self {
            FallbackError::Busy(_) => "inference workers are busy, please try again",
            FallbackError::Timeout(_) => "analysis timed out, please try again",
            FallbackError::Spawn { .. } => "failed to start prediction service",
            FallbackError::NonZeroExit { .. } => "prediction failed",
            FallbackError::NoStructuredOutput { .. } | FallbackError::MalformedOutput { .. } => {
                "invalid prediction output"
            }
            FallbackError::Io(_) => "prediction failed",
        }
    }
}

/// Storage backend failure.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
    #[error("asset I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("storage task failed: {0}")]
    Join(String),
}

/// Best-effort persistence failed. Only ever logged.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("asset upload failed: {0}")]
    Upload(#[source] StoreError),
    #[error("analysis record write failed: {0}")]
    Record(#[source] StoreError),
    #[error("persistence exceeded {0:?}")]
    Timeout(Duration),
}

/// Request rejected before or while staging, i.e. before inference ran.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("no image provided")]
    NoInput,
    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),
    #[error("task {0} is not configured")]
    UnknownTask(TaskKind),
    #[error("failed to stage image: {0}")]
    Staging(#[source] std::io::Error),
}
