//! Per-request staging of uploaded images.
//!
//! Each upload is written to `{root}/{request_id}.{ext}` and owned by a
//! `StagedImage` guard. The guard deletes the file on `release()` or on drop,
//! whichever comes first, so unwinding and early returns clean up as well.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use cropsight_core::TaskKind;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

/// Name collisions resolved by suffixing before giving up.
const MAX_NAME_ATTEMPTS: u32 = 16;
const MAX_REQUEST_ID_LEN: usize = 64;

#[derive(Clone)]
pub struct StagingArea {
    root: PathBuf,
    outstanding: Arc<AtomicUsize>,
}

impl StagingArea {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            outstanding: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Staged files not yet released.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Relaxed)
    }

    /// Write `bytes` to a fresh file in the staging directory.
    ///
    /// The file is created with `create_new`, so a concurrent request that
    /// happens to carry the same id gets `{id}-1.{ext}` rather than
    /// overwriting someone else's upload.
    pub async fn stage(&self, request_id: &str, bytes: &[u8], ext: &str) -> io::Result<StagedImage> {
        tokio::fs::create_dir_all(&self.root).await?;

        let mut attempt = 0;
        loop {
            let name = if attempt == 0 {
                format!("{request_id}.{ext}")
            } else {
                format!("{request_id}-{attempt}.{ext}")
            };
            let path = self.root.join(name);

            match OpenOptions::new().write(true).create_new(true).open(&path).await {
                Ok(mut file) => {
                    // Guard exists before the write so a short write still deletes the file.
                    self.outstanding.fetch_add(1, Ordering::Relaxed);
                    let staged = StagedImage {
                        path,
                        released: false,
                        outstanding: Arc::clone(&self.outstanding),
                    };
                    file.write_all(bytes).await?;
                    file.flush().await?;
                    return Ok(staged);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists && attempt < MAX_NAME_ATTEMPTS => {
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Remove files left behind by a previous process. Startup only: running
    /// it while requests are in flight would pull images out from under them.
    pub fn sweep(&self) -> io::Result<usize> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let mut removed = 0;
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_file() && std::fs::remove_file(entry.path()).is_ok() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// A staged image on disk. Deleted exactly once.
#[derive(Debug)]
pub struct StagedImage {
    path: PathBuf,
    released: bool,
    outstanding: Arc<AtomicUsize>,
}

impl StagedImage {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the staged file. Returns true only on the call that did it.
    pub fn release(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;
        self.outstanding.fetch_sub(1, Ordering::Relaxed);
        release(&self.path);
        true
    }
}

impl Drop for StagedImage {
    fn drop(&mut self) {
        self.release();
    }
}

/// Delete a staged file if it still exists. Failures are logged, never raised.
pub fn release(path: &Path) {
    if !path.exists() {
        return;
    }
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "staged image removed"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove staged image"),
    }
}

/// Restrict a caller-supplied request id to `[A-Za-z0-9_-]`, at most 64 chars.
pub fn sanitize_request_id(raw: &str) -> Option<String> {
    let clean: String = raw
        .trim()
        .chars()
        .take(MAX_REQUEST_ID_LEN)
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();

    if clean.chars().all(|c| c == '_') {
        None
    } else {
        Some(clean)
    }
}

pub fn generate_request_id(task: TaskKind) -> String {
    format!("{}_{}", task, uuid::Uuid::new_v4().simple())
}
