//! Batch worker fallback.
//!
//! When the resident service cannot answer, a worker process is spawned for
//! the single request: `<executable> [script] <staged image> <model>`. Its
//! stdout carries one JSON line among arbitrary diagnostics; its stderr is
//! only ever logged.
//!
//! Worker slots are bounded by a semaphore. A request that cannot get a slot
//! within the queue timeout fails with `Busy` instead of piling up processes.
//! The per-request deadline starts once the worker is spawned.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cropsight_core::config::WorkerConfig;
use cropsight_core::InferenceResult;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::Semaphore;

use crate::error::FallbackError;
use crate::payload::{extract_payload, PayloadError};
use crate::task::TaskSpec;

/// Stderr kept on a failure, from the end.
const STDERR_TAIL_BYTES: usize = 4096;

/// How long to keep reading pipes once the worker has exited and its group is gone.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

#[async_trait]
pub trait FallbackBackend: Send + Sync {
    /// Run one worker to completion, bounded by `deadline`.
    async fn run_batch(
        &self,
        staged: &Path,
        task: &TaskSpec,
        deadline: Duration,
    ) -> Result<InferenceResult, FallbackError>;

    /// Worker slots free right now.
    fn available_slots(&self) -> usize;
}

pub struct FallbackRunner {
    executable: PathBuf,
    slots: Arc<Semaphore>,
    queue_timeout: Duration,
}

impl FallbackRunner {
    pub fn new(config: &WorkerConfig) -> Self {
        Self::with_executable(&config.executable, config.slots(), config.queue_timeout())
    }

    pub fn with_executable(executable: impl Into<PathBuf>, slots: usize, queue_timeout: Duration) -> Self {
        Self {
            executable: executable.into(),
            slots: Arc::new(Semaphore::new(slots.max(1))),
            queue_timeout,
        }
    }

    async fn spawn_and_wait(
        &self,
        staged: &Path,
        task: &TaskSpec,
        deadline: Duration,
    ) -> Result<InferenceResult, FallbackError> {
        let mut cmd = Command::new(&self.executable);
        cmd.args(task.worker_args(staged))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so a timeout can take down whatever the worker forked.
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|source| FallbackError::Spawn {
            executable: self.executable.display().to_string(),
            source,
        })?;
        let pid = child.id();
        // Declared after `child` so it drops first, while the leader is unreaped.
        let mut group = ProcessGroup::new(pid);
        tracing::debug!(pid, executable = %self.executable.display(), "worker spawned");

        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();
        let mut out = Vec::new();
        let mut err = Vec::new();

        // The exit status decides; descendants may hold the pipes open long after.
        let exited = tokio::time::timeout(deadline, async {
            let pipes = async {
                tokio::try_join!(pump(stdout.as_mut(), &mut out), pump(stderr.as_mut(), &mut err))
            };
            tokio::pin!(pipes);
            let mut drained = false;
            loop {
                tokio::select! {
                    status = child.wait() => return status,
                    res = &mut pipes, if !drained => {
                        if let Err(e) = res {
                            return Err(e);
                        }
                        drained = true;
                    }
                }
            }
        })
        .await;

        match exited {
            Ok(Ok(status)) => {
                group.kill();
                let rest = tokio::time::timeout(DRAIN_GRACE, async {
                    tokio::try_join!(pump(stdout.as_mut(), &mut out), pump(stderr.as_mut(), &mut err))
                })
                .await;
                if !matches!(rest, Ok(Ok(_))) {
                    tracing::warn!(pid, "worker pipes still open after exit, using output read so far");
                }
                interpret(status, &out, &err, task)
            }
            Ok(Err(e)) => {
                terminate(&mut child, &mut group).await;
                Err(FallbackError::Io(e))
            }
            Err(_) => {
                tracing::warn!(pid, ?deadline, "worker exceeded its deadline, killing process group");
                terminate(&mut child, &mut group).await;
                Err(FallbackError::Timeout(deadline))
            }
        }
    }
}

#[async_trait]
impl FallbackBackend for FallbackRunner {
    async fn run_batch(
        &self,
        staged: &Path,
        task: &TaskSpec,
        deadline: Duration,
    ) -> Result<InferenceResult, FallbackError> {
        let _permit = match tokio::time::timeout(self.queue_timeout, Arc::clone(&self.slots).acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            _ => return Err(FallbackError::Busy(self.queue_timeout)),
        };
        self.spawn_and_wait(staged, task, deadline).await
    }

    fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }
}

/// Append everything readable from `pipe` into `buf` until EOF.
///
/// Bytes land in `buf` as they arrive, so a cancelled pump keeps what it read.
async fn pump<R: AsyncRead + Unpin>(pipe: Option<&mut R>, buf: &mut Vec<u8>) -> std::io::Result<()> {
    let Some(pipe) = pipe else { return Ok(()) };
    let mut chunk = [0u8; 8192];
    loop {
        let n = pipe.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// SIGKILLs the worker's process group at most once, on `kill` or on drop.
///
/// Dropping the run future (a cancelled request) takes the whole tree down,
/// not only the group leader that `kill_on_drop` reaches.
struct ProcessGroup {
    pgid: Option<u32>,
}

impl ProcessGroup {
    fn new(pgid: Option<u32>) -> Self {
        Self { pgid }
    }

    fn kill(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            kill_process_group(pgid);
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Kill the worker's group, then reap the worker itself.
async fn terminate(child: &mut tokio::process::Child, group: &mut ProcessGroup) {
    group.kill();
    if let Err(e) = child.kill().await {
        tracing::debug!(error = %e, "worker already gone");
    }
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    // The worker leads its own group, so its pid is the pgid.
    let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            tracing::warn!(pid, error = %err, "failed to kill worker process group");
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

fn interpret(
    status: ExitStatus,
    stdout: &[u8],
    stderr: &[u8],
    task: &TaskSpec,
) -> Result<InferenceResult, FallbackError> {
    let stdout = String::from_utf8_lossy(stdout);
    let stderr = String::from_utf8_lossy(stderr);

    for line in stderr.lines().filter(|l| !l.trim().is_empty()) {
        tracing::debug!(task = %task.kind, "worker stderr: {}", line);
    }

    // A signal-killed worker has no exit code and counts as a failure.
    if !status.success() {
        let stderr = tail(&stderr, STDERR_TAIL_BYTES);
        tracing::error!(task = %task.kind, code = ?status.code(), stderr, "worker exited with failure");
        return Err(FallbackError::NonZeroExit {
            code: status.code(),
            stderr: stderr.to_string(),
        });
    }

    let payload = match extract_payload(&stdout) {
        Ok(payload) => payload,
        Err(PayloadError::NoStructuredOutput) => {
            let stdout = tail(&stdout, STDERR_TAIL_BYTES);
            tracing::error!(task = %task.kind, stdout, "worker printed no structured output");
            return Err(FallbackError::NoStructuredOutput {
                stdout: stdout.to_string(),
            });
        }
        Err(PayloadError::Malformed { line, source }) => {
            tracing::error!(task = %task.kind, output = %line, error = %source, "worker printed malformed JSON");
            return Err(FallbackError::MalformedOutput {
                reason: source.to_string(),
                output: line,
            });
        }
    };

    task.shape.normalize(payload).map_err(|e| {
        let output = tail(&stdout, STDERR_TAIL_BYTES);
        tracing::error!(task = %task.kind, output, error = %e, "worker output does not match the task shape");
        FallbackError::MalformedOutput {
            reason: e.to_string(),
            output: output.to_string(),
        }
    })
}

fn tail(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}
