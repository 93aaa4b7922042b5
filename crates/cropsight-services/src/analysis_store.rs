//! Append-only analysis history.
//!
//! Records are written once and never updated. Deletion is by owner and id.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cropsight_core::{ImageAsset, InferenceResult, PersistedAnalysis, TaskKind};
use dashmap::DashMap;
use rusqlite::{params, Connection};

use crate::error::StoreError;

#[async_trait]
pub trait AnalysisStore: Send + Sync {
    async fn insert(&self, record: &PersistedAnalysis) -> Result<(), StoreError>;

    /// Most recent first, at most `limit` records.
    async fn history(&self, owner_id: &str, task: TaskKind, limit: usize) -> Result<Vec<PersistedAnalysis>, StoreError>;

    /// False when no record with that id belongs to `owner_id`.
    async fn delete(&self, owner_id: &str, id: &str) -> Result<bool, StoreError>;
}

// ── SQLite ───────────────────────────────────────────────────────────────────

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS analyses (
    id                 TEXT PRIMARY KEY,
    owner_id           TEXT NOT NULL,
    task               TEXT NOT NULL,
    image_id           TEXT NOT NULL,
    image_url          TEXT NOT NULL,
    result_json        TEXT NOT NULL,
    processing_time_ms INTEGER NOT NULL,
    created_at         INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_analyses_owner_task
    ON analyses (owner_id, task, created_at DESC);
";

#[derive(Clone)]
pub struct SqliteAnalysisStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteAnalysisStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        Self::init(Connection::open(path).map_err(db_err)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory().map_err(db_err)?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| StoreError::Database("connection lock poisoned".to_string()))?;
            f(&*guard).map_err(db_err)
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }
}

fn db_err(e: rusqlite::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

fn conversion_err<E>(column: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<PersistedAnalysis> {
    let task: String = row.get(2)?;
    let result_json: String = row.get(5)?;
    let processing_time_ms: i64 = row.get(6)?;
    let created_at: i64 = row.get(7)?;

    Ok(PersistedAnalysis {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        task: task.parse::<TaskKind>().map_err(|e| conversion_err(2, e))?,
        image_asset: ImageAsset {
            id: row.get(3)?,
            url: row.get(4)?,
        },
        result_snapshot: serde_json::from_str::<InferenceResult>(&result_json).map_err(|e| conversion_err(5, e))?,
        processing_time_ms: processing_time_ms.max(0) as u64,
        created_at: created_at.max(0) as u64,
    })
}

#[async_trait]
impl AnalysisStore for SqliteAnalysisStore {
    async fn insert(&self, record: &PersistedAnalysis) -> Result<(), StoreError> {
        let result_json = serde_json::to_string(&record.result_snapshot)?;
        let record = record.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO analyses
                    (id, owner_id, task, image_id, image_url, result_json, processing_time_ms, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    record.id,
                    record.owner_id,
                    record.task.as_str(),
                    record.image_asset.id,
                    record.image_asset.url,
                    result_json,
                    record.processing_time_ms as i64,
                    record.created_at as i64,
                ],
            )
            .map(|_| ())
        })
        .await
    }

    async fn history(&self, owner_id: &str, task: TaskKind, limit: usize) -> Result<Vec<PersistedAnalysis>, StoreError> {
        let owner_id = owner_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, owner_id, task, image_id, image_url, result_json, processing_time_ms, created_at
                 FROM analyses
                 WHERE owner_id = ?1 AND task = ?2
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?3",
            )?;
            let records = stmt
                .query_map(params![owner_id, task.as_str(), limit as i64], row_to_record)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(records)
        })
        .await
    }

    async fn delete(&self, owner_id: &str, id: &str) -> Result<bool, StoreError> {
        let (owner_id, id) = (owner_id.to_string(), id.to_string());
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM analyses WHERE id = ?1 AND owner_id = ?2",
                params![id, owner_id],
            )
            .map(|n| n > 0)
        })
        .await
    }
}

// ── In-memory ────────────────────────────────────────────────────────────────

/// History for the lifetime of the process.
#[derive(Clone, Default)]
pub struct MemoryAnalysisStore {
    /// owner_id → records in insertion order
    by_owner: Arc<DashMap<String, Vec<PersistedAnalysis>>>,
}

impl MemoryAnalysisStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_owner.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AnalysisStore for MemoryAnalysisStore {
    async fn insert(&self, record: &PersistedAnalysis) -> Result<(), StoreError> {
        let mut records = self.by_owner.entry(record.owner_id.clone()).or_default();
        if records.iter().any(|r| r.id == record.id) {
            return Err(StoreError::Database(format!("duplicate analysis id {}", record.id)));
        }
        records.push(record.clone());
        Ok(())
    }

    async fn history(&self, owner_id: &str, task: TaskKind, limit: usize) -> Result<Vec<PersistedAnalysis>, StoreError> {
        let Some(records) = self.by_owner.get(owner_id) else {
            return Ok(Vec::new());
        };
        let mut matching: Vec<PersistedAnalysis> = records
            .iter()
            .rev()
            .filter(|r| r.task == task)
            .cloned()
            .collect();
        // Stable sort keeps insertion order (newest first) among equal timestamps.
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching.truncate(limit);
        Ok(matching)
    }

    async fn delete(&self, owner_id: &str, id: &str) -> Result<bool, StoreError> {
        let Some(mut records) = self.by_owner.get_mut(owner_id) else {
            return Ok(false);
        };
        let before = records.len();
        records.retain(|r| r.id != id);
        Ok(records.len() < before)
    }
}
