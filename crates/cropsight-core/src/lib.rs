//! cropsight-core — shared data model, result normalization and configuration.
//! Every other cropsight crate depends on this one.

pub mod config;
pub mod envelope;
pub mod grade;
pub mod media;
pub mod result;
pub mod task;

pub use envelope::{ImageAsset, InferenceSource, PersistedAnalysis, ResponseEnvelope};
pub use grade::{ClassGrade, MarketGrade};
pub use result::{Detection, InferenceResult, ResultShape, ShapeError};
pub use task::TaskKind;

/// Unix milliseconds, saturating to 0 if the clock is before the epoch.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
