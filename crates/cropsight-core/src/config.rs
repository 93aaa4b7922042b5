//! Configuration system for cropsight.
//!
//! Resolution order: environment variables → config file → defaults.
//! The environment is read once, in `load()`; request handling never
//! consults it.
//!
//! Config file location:
//!   1. $CROPSIGHT_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/cropsight/config.toml
//!   3. ~/.config/cropsight/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::result::ResultShape;
use crate::task::TaskKind;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CropsightConfig {
    pub server: ServerConfig,
    pub primary: PrimaryConfig,
    pub worker: WorkerConfig,
    pub storage: StorageConfig,
    pub tasks: TasksConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub port: u16,
    /// Where uploads are staged while a request is in flight.
    pub staging_dir: PathBuf,
    pub max_upload_bytes: usize,
}

/// Resident inference service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrimaryConfig {
    pub enabled: bool,
    pub base_url: String,
    /// Deadline for one fast-path call.
    pub timeout_ms: u64,
}

/// Batch worker process used when the resident service cannot answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Interpreter or binary to spawn.
    pub executable: PathBuf,
    /// Deadline for one spawn, including model load.
    pub timeout_ms: u64,
    /// Max concurrent worker processes. 0 = num_cpus.
    pub max_concurrent: u32,
    /// How long a request waits for a free worker slot.
    pub queue_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Persist source images and analysis records.
    pub enabled: bool,
    pub asset_dir: PathBuf,
    /// Public prefix for asset URLs.
    pub asset_base_url: String,
    pub database_path: PathBuf,
    /// Records returned by a history query.
    pub history_limit: usize,
    /// Budget for upload + record write.
    pub persist_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TasksConfig {
    pub leaf: TaskSettings,
    pub bunga: TaskSettings,
}

/// One task variant. A `[tasks.*]` section replaces the built-in one
/// wholesale, so `script`, `model_path` and `primary_route` are required;
/// an omitted `shape` means the generic `label` / `confidence` / `detections`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSettings {
    /// Script handed to the worker executable. Empty = none.
    pub script: PathBuf,
    pub model_path: PathBuf,
    /// Path on the resident service, e.g. "/predict/leaf".
    pub primary_route: String,
    #[serde(default)]
    pub shape: ResultShape,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for CropsightConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            primary: PrimaryConfig::default(),
            worker: WorkerConfig::default(),
            storage: StorageConfig::default(),
            tasks: TasksConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".to_string(),
            port: 9100,
            staging_dir: std::env::temp_dir().join("cropsight-staging"),
            max_upload_bytes: 20 * 1024 * 1024,
        }
    }
}

impl Default for PrimaryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "http://127.0.0.1:5000".to_string(),
            timeout_ms: 10_000,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("python3"),
            timeout_ms: 120_000,
            max_concurrent: 0,
            queue_timeout_ms: 30_000,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            asset_dir: data_dir().join("assets"),
            asset_base_url: "http://127.0.0.1:9100/assets".to_string(),
            database_path: data_dir().join("analyses.db"),
            history_limit: 50,
            persist_timeout_ms: 15_000,
        }
    }
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            leaf: TaskSettings {
                script: PathBuf::from("workers/predict_disease_yolov8.py"),
                model_path: PathBuf::from("ml_models/leaf/train/weights/best.pt"),
                primary_route: "/predict/leaf".to_string(),
                shape: ResultShape::leaf(),
            },
            bunga: TaskSettings {
                script: PathBuf::from("workers/predict_bunga_dual_models.py"),
                model_path: PathBuf::from("ml_models/bunga/train/weights/best.pt"),
                primary_route: "/predict/bunga".to_string(),
                shape: ResultShape::bunga(),
            },
        }
    }
}

// ── Accessors ─────────────────────────────────────────────────────────────────

impl PrimaryConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl WorkerConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn queue_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_timeout_ms)
    }

    /// Effective worker slot count.
    pub fn slots(&self) -> usize {
        if self.max_concurrent == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.max_concurrent as usize
        }
    }
}

impl StorageConfig {
    pub fn persist_timeout(&self) -> Duration {
        Duration::from_millis(self.persist_timeout_ms)
    }
}

impl TasksConfig {
    pub fn get(&self, kind: TaskKind) -> &TaskSettings {
        match kind {
            TaskKind::Leaf => &self.leaf,
            TaskKind::Bunga => &self.bunga,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("cropsight")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("cropsight")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl CropsightConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            CropsightConfig::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("CROPSIGHT_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&CropsightConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.primary.timeout_ms == 0 || self.worker.timeout_ms == 0 {
            return Err(ConfigError::Invalid("deadlines must be non-zero".into()));
        }
        if self.worker.timeout_ms <= self.primary.timeout_ms {
            return Err(ConfigError::Invalid(format!(
                "worker.timeout_ms ({}) must exceed primary.timeout_ms ({})",
                self.worker.timeout_ms, self.primary.timeout_ms
            )));
        }
        if self.storage.enabled && self.storage.history_limit == 0 {
            return Err(ConfigError::Invalid("storage.history_limit must be > 0".into()));
        }
        Ok(())
    }

    /// Apply CROPSIGHT_* overrides. `lookup` is `std::env::var` in production.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let flag = |v: &str| v == "true" || v == "1";

        if let Some(v) = lookup("CROPSIGHT_SERVER__BIND_ADDR") {
            self.server.bind_addr = v;
        }
        if let Some(p) = lookup("CROPSIGHT_SERVER__PORT").and_then(|v| v.parse().ok()) {
            self.server.port = p;
        }
        if let Some(v) = lookup("CROPSIGHT_SERVER__STAGING_DIR") {
            self.server.staging_dir = PathBuf::from(v);
        }
        if let Some(n) = lookup("CROPSIGHT_SERVER__MAX_UPLOAD_BYTES").and_then(|v| v.parse().ok()) {
            self.server.max_upload_bytes = n;
        }
        if let Some(v) = lookup("CROPSIGHT_PRIMARY__ENABLED") {
            self.primary.enabled = flag(&v);
        }
        if let Some(v) = lookup("CROPSIGHT_PRIMARY__BASE_URL") {
            self.primary.base_url = v;
        }
        if let Some(ms) = lookup("CROPSIGHT_PRIMARY__TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.primary.timeout_ms = ms;
        }
        if let Some(v) = lookup("CROPSIGHT_WORKER__EXECUTABLE") {
            self.worker.executable = PathBuf::from(v);
        }
        if let Some(ms) = lookup("CROPSIGHT_WORKER__TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.worker.timeout_ms = ms;
        }
        if let Some(n) = lookup("CROPSIGHT_WORKER__MAX_CONCURRENT").and_then(|v| v.parse().ok()) {
            self.worker.max_concurrent = n;
        }
        if let Some(ms) = lookup("CROPSIGHT_WORKER__QUEUE_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.worker.queue_timeout_ms = ms;
        }
        if let Some(v) = lookup("CROPSIGHT_STORAGE__ENABLED") {
            self.storage.enabled = flag(&v);
        }
        if let Some(v) = lookup("CROPSIGHT_STORAGE__ASSET_DIR") {
            self.storage.asset_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("CROPSIGHT_STORAGE__ASSET_BASE_URL") {
            self.storage.asset_base_url = v;
        }
        if let Some(v) = lookup("CROPSIGHT_STORAGE__DATABASE_PATH") {
            self.storage.database_path = PathBuf::from(v);
        }
        if let Some(n) = lookup("CROPSIGHT_STORAGE__HISTORY_LIMIT").and_then(|v| v.parse().ok()) {
            self.storage.history_limit = n;
        }
        if let Some(ms) = lookup("CROPSIGHT_STORAGE__PERSIST_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.storage.persist_timeout_ms = ms;
        }
    }
}
