//! Running the detection executable.
//!
//! [`DetectionExecutor`] is the seam the orchestrator talks to.
//! [`ProcessExecutor`] is the real implementation: it spawns the binary in its
//! own process group, captures stdout and stderr into one buffer in arrival
//! order, and tears the whole group down on deadline or cancellation.

use crate::cancel::CancellationToken;
use crate::defaults::DEFAULT_MAX_OUTPUT_BYTES;
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// How long the output readers may keep draining after the process is gone.
const READER_GRACE: Duration = Duration::from_secs(2);
/// Time between SIGTERM and SIGKILL when tearing down a process group.
#[cfg(unix)]
const TERM_GRACE: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to spawn {}: {source}", path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("executable failed ({})", describe_exit(*exit_code))]
    Failed {
        exit_code: Option<i32>,
        output: String,
    },

    #[error("deadline exceeded after {elapsed:?}")]
    DeadlineExceeded { elapsed: Duration, output: String },

    #[error("cancelled after {elapsed:?}")]
    Cancelled { elapsed: Duration, output: String },

    #[error("failed to wait for executable: {0}")]
    Wait(#[source] io::Error),
}

impl ExecError {
    /// Output captured before the failure, if any.
    pub fn output(&self) -> Option<&str> {
        match self {
            Self::Failed { output, .. }
            | Self::DeadlineExceeded { output, .. }
            | Self::Cancelled { output, .. } => Some(output),
            Self::Spawn { .. } | Self::Wait(_) => None,
        }
    }
}

fn describe_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "terminated by signal".to_string(),
    }
}

/// Output of a successful run, uninterpreted.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecOutput {
    /// stdout and stderr interleaved line by line as they arrived.
    pub output: String,
    pub truncated: bool,
    pub elapsed: Duration,
}

/// Runs the detection executable for one job.
#[async_trait]
pub trait DetectionExecutor: Send + Sync {
    /// Directory the executable runs in. Relative paths it prints are
    /// resolved against this.
    fn working_dir(&self) -> Option<&Path> {
        None
    }

    /// Run once with the given positional arguments.
    ///
    /// Must return `DeadlineExceeded` once `deadline` passes and `Cancelled`
    /// once `cancel` fires, never `Failed` for either.
    async fn run(
        &self,
        args: &[String],
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<ExecOutput, ExecError>;
}

/// Spawns the executable as a child process.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    executable: PathBuf,
    working_dir: PathBuf,
    max_output_bytes: usize,
}

impl ProcessExecutor {
    /// The working directory is pinned to the executable's parent directory.
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        let executable = executable.into();
        let working_dir = executable
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            executable,
            working_dir,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }

    pub fn with_max_output_bytes(mut self, max_output_bytes: usize) -> Self {
        self.max_output_bytes = max_output_bytes;
        self
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    fn spawn(&self, args: &[String]) -> Result<Child, ExecError> {
        let mut cmd = Command::new(&self.executable);
        cmd.args(args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group so helpers the executable starts die with it.
        #[cfg(unix)]
        cmd.process_group(0);

        cmd.spawn().map_err(|source| ExecError::Spawn {
            path: self.executable.clone(),
            source,
        })
    }
}

enum Stop {
    Exited(io::Result<ExitStatus>),
    Deadline,
    Cancelled,
}

#[async_trait]
impl DetectionExecutor for ProcessExecutor {
    fn working_dir(&self) -> Option<&Path> {
        Some(&self.working_dir)
    }

    async fn run(
        &self,
        args: &[String],
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<ExecOutput, ExecError> {
        let start = Instant::now();

        if cancel.is_cancelled() {
            return Err(ExecError::Cancelled {
                elapsed: Duration::ZERO,
                output: String::new(),
            });
        }
        if start >= deadline {
            return Err(ExecError::DeadlineExceeded {
                elapsed: Duration::ZERO,
                output: String::new(),
            });
        }

        let mut child = self.spawn(args)?;
        info!(
            pid = child.id(),
            executable = %self.executable.display(),
            cwd = %self.working_dir.display(),
            "Spawned detection executable"
        );

        let sink = Arc::new(Mutex::new(CombinedOutput::new(self.max_output_bytes)));
        let readers = [
            child.stdout.take().map(|out| spawn_reader(out, sink.clone())),
            child.stderr.take().map(|err| spawn_reader(err, sink.clone())),
        ];

        let stop = tokio::select! {
            status = child.wait() => Stop::Exited(status),
            _ = tokio::time::sleep_until(deadline) => Stop::Deadline,
            _ = cancel.cancelled() => Stop::Cancelled,
        };

        if !matches!(stop, Stop::Exited(_)) {
            terminate_group(&mut child).await;
        }
        join_readers(readers).await;

        let elapsed = start.elapsed();
        let (output, truncated) = sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .render();

        match stop {
            Stop::Exited(Ok(status)) if status.success() => {
                debug!(?elapsed, bytes = output.len(), truncated, "Executable finished");
                Ok(ExecOutput {
                    output,
                    truncated,
                    elapsed,
                })
            }
            Stop::Exited(Ok(status)) => {
                warn!(exit_code = ?status.code(), "Executable failed");
                Err(ExecError::Failed {
                    exit_code: status.code(),
                    output,
                })
            }
            Stop::Exited(Err(e)) => Err(ExecError::Wait(e)),
            Stop::Deadline => {
                warn!(?elapsed, "Executable killed at deadline");
                Err(ExecError::DeadlineExceeded { elapsed, output })
            }
            Stop::Cancelled => {
                info!(?elapsed, "Executable killed on cancellation");
                Err(ExecError::Cancelled { elapsed, output })
            }
        }
    }
}

/// Kill the child's process group and reap the child.
async fn terminate_group(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        let pgid = pid as libc::pid_t;
        // SAFETY: killpg only sends a signal; the group was created at spawn.
        unsafe {
            libc::killpg(pgid, libc::SIGTERM);
        }
        tokio::time::sleep(TERM_GRACE).await;
        unsafe {
            libc::killpg(pgid, libc::SIGKILL);
        }
    }

    if let Err(e) = child.start_kill() {
        debug!("start_kill after group kill: {}", e);
    }
    if let Err(e) = child.wait().await {
        warn!("Failed to reap killed executable: {}", e);
    }
}

async fn join_readers(readers: [Option<JoinHandle<()>>; 2]) {
    for handle in readers.into_iter().flatten() {
        let abort = handle.abort_handle();
        if tokio::time::timeout(READER_GRACE, handle).await.is_err() {
            // A grandchild outside the group still holds the pipe open.
            abort.abort();
        }
    }
}

fn spawn_reader<R>(reader: R, sink: Arc<Mutex<CombinedOutput>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut line = Vec::new();
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    sink.lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(&line);
                }
                Err(e) => {
                    debug!("Output reader stopped: {}", e);
                    break;
                }
            }
        }
    })
}

/// Byte-capped buffer shared by the stdout and stderr readers.
#[derive(Debug)]
struct CombinedOutput {
    buf: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl CombinedOutput {
    fn new(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            limit,
            truncated: false,
        }
    }

    /// Append one line. Past the cap, input is still accepted but dropped so
    /// the pipes keep draining.
    fn push(&mut self, line: &[u8]) {
        if self.truncated {
            return;
        }
        let room = self.limit.saturating_sub(self.buf.len());
        if line.len() <= room {
            self.buf.extend_from_slice(line);
        } else {
            self.buf.extend_from_slice(&line[..room]);
            self.truncated = true;
        }
    }

    fn render(&self) -> (String, bool) {
        let mut text = String::from_utf8_lossy(&self.buf).into_owned();
        if self.truncated {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&format!("[output truncated at {} bytes]\n", self.limit));
        }
        (text, self.truncated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combined_output_caps_and_marks_truncation() {
        let mut out = CombinedOutput::new(10);
        out.push(b"12345\n");
        out.push(b"67890\n");
        out.push(b"dropped\n");

        let (text, truncated) = out.render();
        assert!(truncated);
        assert!(text.starts_with("12345\n6789\n"));
        assert!(text.ends_with("[output truncated at 10 bytes]\n"));
    }

    #[test]
    fn test_combined_output_under_cap_is_verbatim() {
        let mut out = CombinedOutput::new(1024);
        out.push(b"a\n");
        out.push(b"b");
        assert_eq!(out.render(), ("a\nb".to_string(), false));
    }

    #[test]
    fn test_working_dir_is_executable_parent() {
        let exec = ProcessExecutor::new("/opt/detector/build/main");
        assert_eq!(exec.working_dir(), Some(Path::new("/opt/detector/build")));

        let bare = ProcessExecutor::new("main");
        assert_eq!(bare.working_dir(), Some(Path::new(".")));
    }

    #[test]
    fn test_exec_error_exposes_output() {
        let err = ExecError::Failed {
            exit_code: Some(3),
            output: "boom".to_string(),
        };
        assert_eq!(err.output(), Some("boom"));
        assert_eq!(err.to_string(), "executable failed (exit code 3)");
    }
}
