//! Sequencing one detection job from parameters to outcome.
//!
//! ```text
//! Validating -> Running -> Parsing -> Finalizing(Ingest | List) -> Done
//! ```
//!
//! Every stage can fail; the first failure ends the job. The job deadline
//! covers the whole sequence, including the wait for the project lock. The
//! lock is held from `Running` until the outcome is built.

use crate::args::build_arguments;
use crate::artifact::{load_artifact, ArtifactError};
use crate::cancel::CancellationToken;
use crate::config::PipelineConfig;
use crate::executor::{DetectionExecutor, ExecError, ExecOutput, ProcessExecutor};
use crate::ingest::{ingest_artifact, ResultStore, StoreError};
use crate::lister::{list_cameras, CameraSummary, ListingError};
use crate::lock::{LockError, ProjectGuard, ProjectLocks};
use crate::params::{InvalidParameter, JobMode, JobParameters};
use crate::paths::{
    PathError, PathRole, ProjectLayout, ResolvedInputs, BATCH_RESULTS_DIR, LIVE_RESULTS_DIR,
};
use crate::protocol::{parse_output, ParsedOutput, ProtocolError};
use chrono::Local;
use parklearn_db::ResultLevel;
use serde::{Serialize, Serializer};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn, Instrument};

/// What finalizing does with a parsed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finalize {
    Ingest,
    List,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStage {
    Validating,
    Running,
    Parsing,
    Finalizing(Finalize),
    Done,
}

impl JobStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validating => "validating",
            Self::Running => "running",
            Self::Parsing => "parsing",
            Self::Finalizing(Finalize::Ingest) => "finalizing:ingest",
            Self::Finalizing(Finalize::List) => "finalizing:list",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for JobStage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Why a job failed. Each variant belongs to exactly one stage, except the
/// deadline which can run out anywhere.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("invalid parameters: {0}")]
    InvalidParameters(#[from] InvalidParameter),

    #[error("{role} not found: {}", path.display())]
    PathNotFound { role: PathRole, path: PathBuf },

    #[error("could not lock project: {0}")]
    LockFailed(#[source] LockError),

    #[error("could not prepare output folder {}: {source}", path.display())]
    OutputUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("detection executable failed ({})", exit_label(*exit_code))]
    ExecutionFailed {
        exit_code: Option<i32>,
        output: String,
    },

    #[error("job deadline exceeded during {stage}")]
    DeadlineExceeded {
        stage: JobStage,
        session_name: Option<String>,
        /// Executable output captured before the kill, when it was running.
        output: Option<String>,
    },

    #[error("job cancelled during {stage}")]
    Cancelled {
        stage: JobStage,
        output: Option<String>,
    },

    #[error("executable output has no artifact marker")]
    MarkerNotFound { output: String },

    #[error("no session folder after '{anchor}' in {path}")]
    AnchorNotFound { path: String, anchor: String },

    #[error("session {session_name}: {source}")]
    ArtifactUnreadable {
        session_name: String,
        #[source]
        source: ArtifactError,
    },

    #[error("session {session_name}: {source}")]
    ArtifactMalformed {
        session_name: String,
        #[source]
        source: ArtifactError,
    },

    #[error("session {session_name}: failed to persist {level} row #{index}: {message}")]
    PersistenceFailed {
        session_name: String,
        level: ResultLevel,
        index: usize,
        message: String,
    },

    #[error("session {session_name}: {source}")]
    ListingFailed {
        session_name: String,
        #[source]
        source: ListingError,
    },
}

fn exit_label(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code".to_string(),
    }
}

impl JobError {
    /// Stage the job was in when it failed.
    pub fn stage(&self) -> JobStage {
        match self {
            Self::InvalidParameters(_) | Self::PathNotFound { .. } => JobStage::Validating,
            Self::LockFailed(_) | Self::OutputUnavailable { .. } | Self::ExecutionFailed { .. } => {
                JobStage::Running
            }
            Self::DeadlineExceeded { stage, .. } | Self::Cancelled { stage, .. } => *stage,
            Self::MarkerNotFound { .. } | Self::AnchorNotFound { .. } => JobStage::Parsing,
            Self::ArtifactUnreadable { .. }
            | Self::ArtifactMalformed { .. }
            | Self::PersistenceFailed { .. } => JobStage::Finalizing(Finalize::Ingest),
            Self::ListingFailed { .. } => JobStage::Finalizing(Finalize::List),
        }
    }

    /// Session name, when the failure happened after it was derived.
    pub fn session_name(&self) -> Option<&str> {
        match self {
            Self::DeadlineExceeded { session_name, .. } => session_name.as_deref(),
            Self::ArtifactUnreadable { session_name, .. }
            | Self::ArtifactMalformed { session_name, .. }
            | Self::PersistenceFailed { session_name, .. }
            | Self::ListingFailed { session_name, .. } => Some(session_name),
            _ => None,
        }
    }

    /// Captured executable output carried as diagnostic context.
    pub fn output(&self) -> Option<&str> {
        match self {
            Self::ExecutionFailed { output, .. } | Self::MarkerNotFound { output } => Some(output),
            Self::DeadlineExceeded { output, .. } | Self::Cancelled { output, .. } => {
                output.as_deref().filter(|o| !o.is_empty())
            }
            _ => None,
        }
    }
}

impl From<PathError> for JobError {
    fn from(err: PathError) -> Self {
        match err {
            PathError::Invalid(invalid) => Self::InvalidParameters(invalid),
            PathError::NotFound { role, path } => Self::PathNotFound { role, path },
        }
    }
}

impl From<LockError> for JobError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::DeadlineExceeded { .. } => Self::DeadlineExceeded {
                stage: JobStage::Running,
                session_name: None,
                output: None,
            },
            LockError::Cancelled { .. } => Self::Cancelled {
                stage: JobStage::Running,
                output: None,
            },
            other => Self::LockFailed(other),
        }
    }
}

impl From<ExecError> for JobError {
    fn from(err: ExecError) -> Self {
        match err {
            ExecError::Failed { exit_code, output } => Self::ExecutionFailed { exit_code, output },
            ExecError::DeadlineExceeded { output, .. } => Self::DeadlineExceeded {
                stage: JobStage::Running,
                session_name: None,
                output: Some(output),
            },
            ExecError::Cancelled { output, .. } => Self::Cancelled {
                stage: JobStage::Running,
                output: Some(output),
            },
            other @ (ExecError::Spawn { .. } | ExecError::Wait(_)) => Self::ExecutionFailed {
                exit_code: None,
                output: other.to_string(),
            },
        }
    }
}

fn protocol_error(err: ProtocolError, output: &str) -> JobError {
    match err {
        ProtocolError::MarkerNotFound => JobError::MarkerNotFound {
            output: output.to_string(),
        },
        ProtocolError::AnchorNotFound { path, anchor } => JobError::AnchorNotFound { path, anchor },
    }
}

fn artifact_error(err: ArtifactError, session_name: &str) -> JobError {
    let session_name = session_name.to_string();
    match err {
        source @ ArtifactError::Unreadable { .. } => JobError::ArtifactUnreadable {
            session_name,
            source,
        },
        source @ ArtifactError::Malformed { .. } => JobError::ArtifactMalformed {
            session_name,
            source,
        },
    }
}

fn store_error(err: StoreError, session_name: &str) -> JobError {
    JobError::PersistenceFailed {
        session_name: session_name.to_string(),
        level: err.level,
        index: err.index,
        message: err.message,
    }
}

/// Result of a successful batch job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchOutcome {
    pub job_id: String,
    pub session_name: String,
    pub session_id: i64,
    pub session_dir: PathBuf,
    pub camera_count: usize,
    pub region_count: usize,
}

/// Result of a successful live job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveOutcome {
    pub job_id: String,
    pub session_name: String,
    /// Live output folder; each subfolder is one camera.
    pub session_dir: PathBuf,
    pub cameras: Vec<CameraSummary>,
}

/// A run that got through `Parsing`, with the project lock still held.
struct ParsedRun {
    parsed: ParsedOutput,
    /// Folder passed to the executable as its output argument.
    output_dir: PathBuf,
    _guard: ProjectGuard,
}

/// Runs detection jobs. One job per call; calls for the same project queue
/// on the project lock.
pub struct JobOrchestrator {
    layout: ProjectLayout,
    executable: PathBuf,
    executor: Arc<dyn DetectionExecutor>,
    store: Arc<dyn ResultStore>,
    locks: Arc<ProjectLocks>,
    deadline: Duration,
    job_log_dir: Option<PathBuf>,
}

impl JobOrchestrator {
    pub fn new(
        layout: ProjectLayout,
        executable: impl Into<PathBuf>,
        executor: Arc<dyn DetectionExecutor>,
        store: Arc<dyn ResultStore>,
    ) -> Self {
        Self {
            layout,
            executable: executable.into(),
            executor,
            store,
            locks: Arc::new(ProjectLocks::new()),
            deadline: Duration::from_secs(crate::defaults::DEFAULT_DEADLINE_SECS),
            job_log_dir: None,
        }
    }

    /// Orchestrator that spawns the configured executable.
    pub fn from_config(config: &PipelineConfig, store: Arc<dyn ResultStore>) -> Self {
        let executor = ProcessExecutor::new(&config.executable)
            .with_max_output_bytes(config.max_output_bytes);
        let mut orchestrator =
            Self::new(config.layout(), &config.executable, Arc::new(executor), store)
                .with_deadline(config.deadline);
        orchestrator.job_log_dir = config.job_log_dir.clone();
        orchestrator
    }

    /// Budget for a whole job, from validation to outcome.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Keep each job's executable output in `<dir>/<job_id>.log`.
    pub fn with_job_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.job_log_dir = Some(dir.into());
        self
    }

    /// Share project locks with other orchestrators in this process.
    pub fn with_locks(mut self, locks: Arc<ProjectLocks>) -> Self {
        self.locks = locks;
        self
    }

    pub fn layout(&self) -> &ProjectLayout {
        &self.layout
    }

    pub async fn run_batch_job(&self, params: JobParameters) -> Result<BatchOutcome, JobError> {
        self.run_batch_job_with_cancel(params, &CancellationToken::new())
            .await
    }

    pub async fn run_live_job(&self, params: JobParameters) -> Result<LiveOutcome, JobError> {
        self.run_live_job_with_cancel(params, &CancellationToken::new())
            .await
    }

    /// Run a batch job: execute, parse, then persist the result tree.
    pub async fn run_batch_job_with_cancel(
        &self,
        params: JobParameters,
        cancel: &CancellationToken,
    ) -> Result<BatchOutcome, JobError> {
        let job_id = new_job_id();
        let span = tracing::info_span!(
            "parklearn.job",
            job_id = %job_id,
            project = %params.project_id,
            mode = "batch"
        );
        self.batch(job_id, params, cancel).instrument(span).await
    }

    /// Run a live job: execute, parse, then list the cameras it produced.
    pub async fn run_live_job_with_cancel(
        &self,
        params: JobParameters,
        cancel: &CancellationToken,
    ) -> Result<LiveOutcome, JobError> {
        let job_id = new_job_id();
        let span = tracing::info_span!(
            "parklearn.job",
            job_id = %job_id,
            project = %params.project_id,
            mode = "live"
        );
        self.live(job_id, params, cancel).instrument(span).await
    }

    async fn batch(
        &self,
        job_id: String,
        params: JobParameters,
        cancel: &CancellationToken,
    ) -> Result<BatchOutcome, JobError> {
        let deadline = Instant::now() + self.deadline;
        if !params.is_batch() {
            return Err(InvalidParameter::new("mode", "a batch job needs a test image folder").into());
        }
        let inputs = self.validate(&params)?;

        let run = self
            .execute(&job_id, &params, &inputs, deadline, cancel)
            .await?;
        let session_name = run.parsed.session_name.clone();

        let stage = JobStage::Finalizing(Finalize::Ingest);
        info!(%stage, session = %session_name, "Ingesting artifact");
        let ingest = async {
            let artifact = load_artifact(&run.parsed.artifact_path)
                .await
                .map_err(|e| artifact_error(e, &session_name))?;
            ingest_artifact(self.store.as_ref(), &params, &session_name, &artifact)
                .await
                .map_err(|e| store_error(e, &session_name))
        };
        let inserted = tokio::time::timeout_at(deadline, ingest)
            .await
            .map_err(|_| JobError::DeadlineExceeded {
                stage,
                session_name: Some(session_name.clone()),
                output: None,
            })??;

        info!(stage = %JobStage::Done, session = %session_name, "Batch job finished");
        Ok(BatchOutcome {
            job_id,
            session_name,
            session_id: inserted.session_id,
            session_dir: run.parsed.session_dir.clone(),
            camera_count: inserted.cctv_result_ids.len(),
            region_count: inserted.roi_result_count,
        })
    }

    async fn live(
        &self,
        job_id: String,
        params: JobParameters,
        cancel: &CancellationToken,
    ) -> Result<LiveOutcome, JobError> {
        let deadline = Instant::now() + self.deadline;
        if params.is_batch() {
            return Err(InvalidParameter::new("mode", "a live job takes no test image folder").into());
        }
        let inputs = self.validate(&params)?;

        let run = self
            .execute(&job_id, &params, &inputs, deadline, cancel)
            .await?;
        let session_name = run.parsed.session_name.clone();

        let stage = JobStage::Finalizing(Finalize::List);
        info!(%stage, session = %session_name, "Listing live cameras");
        let cameras = tokio::time::timeout_at(deadline, list_cameras(&run.output_dir))
            .await
            .map_err(|_| JobError::DeadlineExceeded {
                stage,
                session_name: Some(session_name.clone()),
                output: None,
            })?
            .map_err(|source| JobError::ListingFailed {
                session_name: session_name.clone(),
                source,
            })?;

        info!(
            stage = %JobStage::Done,
            session = %session_name,
            cameras = cameras.len(),
            "Live job finished"
        );
        Ok(LiveOutcome {
            job_id,
            session_name,
            session_dir: run.output_dir.clone(),
            cameras,
        })
    }

    fn validate(&self, params: &JobParameters) -> Result<ResolvedInputs, JobError> {
        info!(stage = %JobStage::Validating, "Validating job");
        let inputs = self.layout.resolve(params, &self.executable)?;
        Ok(inputs)
    }

    /// `Running` and `Parsing`. The returned run keeps the project locked.
    async fn execute(
        &self,
        job_id: &str,
        params: &JobParameters,
        inputs: &ResolvedInputs,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<ParsedRun, JobError> {
        let project = params.project_id.as_str();
        info!(stage = %JobStage::Running, "Waiting for project lock");
        let guard = self
            .locks
            .acquire(
                project,
                &self.layout.lock_file(project),
                job_id,
                deadline,
                cancel,
            )
            .await?;

        let (output_dir, anchor) = match params.mode {
            JobMode::Batch { .. } => (
                self.layout.create_batch_output(project, Local::now()),
                BATCH_RESULTS_DIR,
            ),
            JobMode::Live => (self.layout.create_live_output(project), LIVE_RESULTS_DIR),
        };
        let output_dir = output_dir.map_err(|source| JobError::OutputUnavailable {
            path: self.layout.project_dir(project),
            source,
        })?;

        let parsed = match self
            .run_and_parse(job_id, params, inputs, &output_dir, anchor, deadline, cancel)
            .await
        {
            Ok(parsed) => parsed,
            Err(e) => {
                if params.is_batch() {
                    discard_if_empty(&output_dir).await;
                }
                return Err(e);
            }
        };

        Ok(ParsedRun {
            parsed,
            output_dir,
            _guard: guard,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_and_parse(
        &self,
        job_id: &str,
        params: &JobParameters,
        inputs: &ResolvedInputs,
        output_dir: &Path,
        anchor: &str,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<ParsedOutput, JobError> {
        let args = build_arguments(params, inputs, output_dir);
        info!(
            stage = %JobStage::Running,
            output_dir = %output_dir.display(),
            "Running detection executable"
        );
        let result = self.executor.run(&args, deadline, cancel).await;
        self.write_job_log(job_id, params, &args, &result).await;
        let exec = result?;

        info!(stage = %JobStage::Parsing, "Parsing executable output");
        let parsed = parse_output(&exec.output, anchor, self.executor.working_dir())
            .map_err(|e| protocol_error(e, &exec.output))?;
        if !parsed.session_dir.starts_with(output_dir) && params.is_batch() {
            warn!(
                session_dir = %parsed.session_dir.display(),
                expected = %output_dir.display(),
                "Artifact is outside the folder allocated for this job"
            );
        }
        Ok(parsed)
    }

    /// Best effort: a job never fails because its log could not be written.
    async fn write_job_log(
        &self,
        job_id: &str,
        params: &JobParameters,
        args: &[String],
        result: &Result<ExecOutput, ExecError>,
    ) {
        let Some(dir) = &self.job_log_dir else {
            return;
        };
        let path = dir.join(format!("{}.log", job_id));

        let status = match result {
            Ok(exec) => format!("ok in {:?}", exec.elapsed),
            Err(e) => e.to_string(),
        };
        let output = match result {
            Ok(exec) => Some(exec.output.as_str()),
            Err(e) => e.output(),
        };
        let text = format!(
            "job: {}\nproject: {}\nmode: {}\nargs: {:?}\nstatus: {}\n\n{}",
            job_id,
            params.project_id,
            params.mode.as_str(),
            args,
            status,
            output.unwrap_or_default()
        );

        if let Err(e) = write_file(dir, &path, text).await {
            warn!("Failed to write job log {}: {}", path.display(), e);
        }
    }
}

/// Remove a batch output folder the failed run left empty. A folder with
/// anything in it is kept for inspection.
async fn discard_if_empty(dir: &Path) {
    match tokio::fs::remove_dir(dir).await {
        Ok(()) => debug!(path = %dir.display(), "Removed empty output folder"),
        Err(e) => debug!(path = %dir.display(), "Keeping output folder: {}", e),
    }
}

async fn write_file(dir: &Path, path: &Path, text: String) -> io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(path, text).await
}

fn new_job_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_every_error_reports_its_stage() {
        let cases: Vec<(JobError, JobStage)> = vec![
            (
                InvalidParameter::new("iterations", "0").into(),
                JobStage::Validating,
            ),
            (
                JobError::PathNotFound {
                    role: PathRole::RoiDefinition,
                    path: PathBuf::from("/x"),
                },
                JobStage::Validating,
            ),
            (
                JobError::ExecutionFailed {
                    exit_code: Some(1),
                    output: String::new(),
                },
                JobStage::Running,
            ),
            (
                JobError::MarkerNotFound {
                    output: String::new(),
                },
                JobStage::Parsing,
            ),
            (
                JobError::PersistenceFailed {
                    session_name: "T1".to_string(),
                    level: ResultLevel::Region,
                    index: 2,
                    message: "boom".to_string(),
                },
                JobStage::Finalizing(Finalize::Ingest),
            ),
            (
                JobError::DeadlineExceeded {
                    stage: JobStage::Finalizing(Finalize::List),
                    session_name: Some("L1".to_string()),
                    output: None,
                },
                JobStage::Finalizing(Finalize::List),
            ),
        ];

        for (err, stage) in cases {
            assert_eq!(err.stage(), stage, "{err}");
        }
    }

    #[test]
    fn test_session_name_only_after_parsing() {
        let err = JobError::PersistenceFailed {
            session_name: "T1".to_string(),
            level: ResultLevel::Camera,
            index: 0,
            message: "x".to_string(),
        };
        assert_eq!(err.session_name(), Some("T1"));

        let err = JobError::MarkerNotFound {
            output: "noise".to_string(),
        };
        assert_eq!(err.session_name(), None);
        assert_eq!(err.output(), Some("noise"));
    }

    #[test]
    fn test_exec_errors_keep_their_class() {
        let cancelled: JobError = ExecError::Cancelled {
            elapsed: Duration::ZERO,
            output: String::new(),
        }
        .into();
        assert!(matches!(cancelled, JobError::Cancelled { .. }));
        assert_eq!(cancelled.output(), None);

        let timed_out: JobError = ExecError::DeadlineExceeded {
            elapsed: Duration::ZERO,
            output: "frame 1\nframe 2\n".to_string(),
        }
        .into();
        assert!(matches!(timed_out, JobError::DeadlineExceeded { .. }));
        assert_eq!(timed_out.output(), Some("frame 1\nframe 2\n"));

        let spawn: JobError = ExecError::Spawn {
            path: PathBuf::from("/nope"),
            source: io::Error::from(io::ErrorKind::NotFound),
        }
        .into();
        assert!(matches!(
            spawn,
            JobError::ExecutionFailed {
                exit_code: None,
                ..
            }
        ));
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(JobStage::Finalizing(Finalize::Ingest).to_string(), "finalizing:ingest");
        assert_eq!(
            serde_json::to_value(JobStage::Parsing).unwrap(),
            serde_json::json!("parsing")
        );
    }
}
