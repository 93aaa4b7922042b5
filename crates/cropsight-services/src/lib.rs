//! cropsight-services — the inference request pipeline.
//!
//! One uploaded image flows through `Orchestrator::handle`: it is staged to
//! disk, sent to the resident service, handed to a batch worker process if
//! the resident service cannot answer, persisted on a best-effort basis and
//! finally removed from the staging area.

pub mod analysis_store;
pub mod asset_store;
pub mod error;
pub mod fallback;
pub mod orchestrator;
pub mod payload;
pub mod persist;
pub mod primary;
pub mod staging;
pub mod stats;
pub mod task;

pub use analysis_store::{AnalysisStore, MemoryAnalysisStore, SqliteAnalysisStore};
pub use asset_store::{AssetStore, LocalAssetStore};
pub use error::{FallbackError, PersistError, PrimaryError, RequestError, StoreError};
pub use fallback::{FallbackBackend, FallbackRunner};
pub use orchestrator::{Deadlines, InferenceRequest, Orchestrator};
pub use persist::{PersistJob, ResultPersister};
pub use primary::{PrimaryBackend, PrimaryClient};
pub use staging::{StagedImage, StagingArea};
pub use stats::{PipelineStats, StatsSnapshot};
pub use task::{TaskRegistry, TaskSpec};
