//! Per-project job serialization.
//!
//! Two jobs for the same project must not run the executable or write its
//! output folders at the same time. Within one process an async mutex per
//! project orders the jobs; across processes an exclusive `fs2` lock on the
//! project's lock file does. The lock file is never deleted, only unlocked.

use crate::cancel::CancellationToken;
use chrono::Utc;
use fs2::FileExt;
use serde::Serialize;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::{debug, info};

const RETRY_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum LockError {
    #[error("failed to open lock file {}: {source}", path.display())]
    CreateFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to lock {}: {source}", path.display())]
    AcquireFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("deadline passed while waiting for project '{project}'")]
    DeadlineExceeded { project: String },

    #[error("cancelled while waiting for project '{project}'")]
    Cancelled { project: String },
}

/// Holder record written into the lock file for whoever finds it locked.
#[derive(Serialize)]
struct LockHolder<'a> {
    pid: u32,
    job_id: &'a str,
    since: String,
}

/// Hands out one [`ProjectGuard`] per project at a time.
#[derive(Debug, Default)]
pub struct ProjectLocks {
    local: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// Exclusive right to run a job for one project. Released on drop.
#[derive(Debug)]
pub struct ProjectGuard {
    _local: OwnedMutexGuard<()>,
    _file: File,
    lock_path: PathBuf,
}

impl ProjectGuard {
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for ProjectGuard {
    fn drop(&mut self) {
        // The file lock goes away with the descriptor.
        debug!("Releasing project lock: {}", self.lock_path.display());
    }
}

impl ProjectLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn local_mutex(&self, project_id: &str) -> Arc<AsyncMutex<()>> {
        let mut map = self.local.lock().unwrap_or_else(PoisonError::into_inner);
        map.entry(project_id.to_string()).or_default().clone()
    }

    /// Wait for the project's lock, giving up at `deadline` or on cancellation.
    pub async fn acquire(
        &self,
        project_id: &str,
        lock_path: &Path,
        job_id: &str,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<ProjectGuard, LockError> {
        let local = self.local_mutex(project_id);
        let local_guard = tokio::select! {
            guard = local.lock_owned() => guard,
            _ = tokio::time::sleep_until(deadline) => {
                return Err(LockError::DeadlineExceeded { project: project_id.to_string() });
            }
            _ = cancel.cancelled() => {
                return Err(LockError::Cancelled { project: project_id.to_string() });
            }
        };

        let mut file = open_lock_file(lock_path)?;
        loop {
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => break,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    debug!(project = project_id, "Project locked by another process, waiting");
                }
                Err(source) => {
                    return Err(LockError::AcquireFailed {
                        path: lock_path.to_path_buf(),
                        source,
                    })
                }
            }

            if cancel.is_cancelled() {
                return Err(LockError::Cancelled {
                    project: project_id.to_string(),
                });
            }
            if Instant::now() + RETRY_INTERVAL > deadline {
                return Err(LockError::DeadlineExceeded {
                    project: project_id.to_string(),
                });
            }
            tokio::select! {
                _ = tokio::time::sleep(RETRY_INTERVAL) => {}
                _ = cancel.cancelled() => {}
            }
        }

        record_holder(&mut file, job_id);
        info!(project = project_id, job_id, "Acquired project lock");

        Ok(ProjectGuard {
            _local: local_guard,
            _file: file,
            lock_path: lock_path.to_path_buf(),
        })
    }
}

fn open_lock_file(lock_path: &Path) -> Result<File, LockError> {
    let create_failed = |source| LockError::CreateFailed {
        path: lock_path.to_path_buf(),
        source,
    };
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent).map_err(create_failed)?;
    }
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path)
        .map_err(create_failed)
}

/// Best effort; the lock itself does not depend on the contents.
fn record_holder(file: &mut File, job_id: &str) {
    let holder = LockHolder {
        pid: std::process::id(),
        job_id,
        since: Utc::now().to_rfc3339(),
    };
    let written = serde_json::to_vec(&holder)
        .map_err(io::Error::from)
        .and_then(|payload| {
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&payload)
        });
    if let Err(e) = written {
        debug!("Failed to record lock holder: {}", e);
    }
}
