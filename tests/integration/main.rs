//! Cropsight integration test harness.
//!
//! Tests run the real pipeline end to end: a stub resident service served by
//! axum on an ephemeral port, batch workers as `sh` scripts, real staging,
//! asset and analysis stores under a per-test temp directory.
//!
//!   cargo test --test integration
//!
//! Worker scripts need a POSIX `sh` on PATH.

mod api;
mod pipeline;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;

use cropsight_core::config::{PrimaryConfig, TasksConfig};
use cropsight_core::{ImageAsset, InferenceResult};
use cropsight_services::{
    AssetStore, Deadlines, FallbackBackend, FallbackError, FallbackRunner, LocalAssetStore,
    MemoryAnalysisStore, Orchestrator, PrimaryClient, ResultPersister, StagingArea, StoreError,
    TaskRegistry, TaskSpec,
};

// ── Harness ───────────────────────────────────────────────────────────────────

pub const D1: Duration = Duration::from_millis(300);
pub const D2: Duration = Duration::from_secs(2);

/// A JPEG magic prefix is all the pipeline looks at.
pub const JPEG: &[u8] = b"\xFF\xD8\xFF\xE0\x00\x10JFIF";

static NEXT_ID: AtomicUsize = AtomicUsize::new(0);

fn unique() -> usize {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Per-test directory, removed on drop.
pub struct Scratch(pub PathBuf);

impl Scratch {
    pub fn new(tag: &str) -> Self {
        let dir = std::env::temp_dir().join(format!(
            "cropsight-it-{}-{}-{}",
            tag,
            std::process::id(),
            unique()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).expect("create scratch dir");
        Self(dir)
    }

    pub fn staging(&self) -> PathBuf {
        self.0.join("staging")
    }

    /// Files currently in the staging directory.
    pub fn staged_files(&self) -> usize {
        std::fs::read_dir(self.staging()).map(|d| d.count()).unwrap_or(0)
    }

    /// Write a worker script. It is run as `sh <script> <image> <model>`.
    pub fn worker(&self, body: &str) -> PathBuf {
        let path = self.0.join(format!("worker-{}.sh", unique()));
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write worker script");
        path
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

/// Serve `app` on an ephemeral port, returning its base URL.
pub async fn spawn_server(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind stub");
    let addr = listener.local_addr().expect("stub addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("stub server");
    });
    format!("http://{addr}")
}

/// A base URL nothing listens on.
pub fn dead_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind probe");
    let addr = listener.local_addr().expect("probe addr");
    drop(listener);
    format!("http://{addr}")
}

/// Counts batch worker runs on top of the real runner.
pub struct CountingFallback {
    inner: FallbackRunner,
    pub runs: AtomicUsize,
}

impl CountingFallback {
    pub fn new(slots: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: FallbackRunner::with_executable("sh", slots, Duration::from_secs(5)),
            runs: AtomicUsize::new(0),
        })
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FallbackBackend for CountingFallback {
    async fn run_batch(
        &self,
        staged: &Path,
        task: &TaskSpec,
        deadline: Duration,
    ) -> Result<InferenceResult, FallbackError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.inner.run_batch(staged, task, deadline).await
    }

    fn available_slots(&self) -> usize {
        self.inner.available_slots()
    }
}

/// Asset store that is always down.
pub struct FailingAssets;

#[async_trait]
impl AssetStore for FailingAssets {
    async fn upload(&self, _bytes: &[u8], _mime: &str) -> Result<ImageAsset, StoreError> {
        Err(StoreError::Io(std::io::Error::other("object storage unavailable")))
    }
}

/// Orchestrator wiring shared by every test.
pub struct Pipeline {
    pub orchestrator: Arc<Orchestrator>,
    pub fallback: Arc<CountingFallback>,
    pub records: MemoryAnalysisStore,
}

pub struct PipelineOptions {
    pub primary_url: String,
    pub worker: PathBuf,
    pub slots: usize,
    pub assets: Option<Arc<dyn AssetStore>>,
    pub asset_base_url: String,
}

impl PipelineOptions {
    pub fn new(primary_url: String, worker: PathBuf) -> Self {
        Self {
            primary_url,
            worker,
            slots: 4,
            assets: None,
            asset_base_url: "http://127.0.0.1/assets".to_string(),
        }
    }
}

pub fn pipeline(scratch: &Scratch, opts: PipelineOptions) -> Pipeline {
    let mut tasks = TasksConfig::default();
    tasks.leaf.script = opts.worker.clone();
    tasks.leaf.model_path = scratch.0.join("leaf.pt");
    tasks.bunga.script = opts.worker;
    tasks.bunga.model_path = scratch.0.join("bunga.pt");

    let primary = PrimaryClient::new(&PrimaryConfig {
        enabled: true,
        base_url: opts.primary_url,
        timeout_ms: D1.as_millis() as u64,
    });
    let fallback = CountingFallback::new(opts.slots);
    let records = MemoryAnalysisStore::new();
    let assets = opts.assets.unwrap_or_else(|| {
        Arc::new(
            LocalAssetStore::new(scratch.0.join("assets"), &opts.asset_base_url)
                .expect("open asset store"),
        )
    });

    let orchestrator = Orchestrator::new(
        StagingArea::new(scratch.staging()),
        TaskRegistry::from_config(&tasks),
        Arc::new(primary),
        fallback.clone(),
        Deadlines {
            primary: D1,
            fallback: D2,
        },
    )
    .with_persister(ResultPersister::new(
        assets,
        Arc::new(records.clone()),
        Duration::from_secs(2),
    ));

    Pipeline {
        orchestrator: Arc::new(orchestrator),
        fallback,
        records,
    }
}
