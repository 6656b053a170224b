//! Detection job pipeline for parking ROI learning.
//!
//! A job resolves its inputs under the shared project root, runs the external
//! detection executable with a fixed positional argument list, finds the
//! artifact the executable announces on its output, and then either persists
//! the per-camera, per-region results (batch) or lists the cameras found in
//! the live output folder (live).

pub mod args;
pub mod artifact;
pub mod cancel;
pub mod config;
pub mod defaults;
pub mod executor;
pub mod ingest;
pub mod lister;
pub mod lock;
pub mod orchestrator;
pub mod params;
pub mod paths;
pub mod protocol;

pub use cancel::CancellationToken;
pub use config::{ConfigError, PipelineConfig};
pub use executor::{DetectionExecutor, ExecError, ExecOutput, ProcessExecutor};
pub use ingest::{ResultStore, StoreError};
pub use lister::CameraSummary;
pub use orchestrator::{BatchOutcome, Finalize, JobError, JobOrchestrator, JobStage, LiveOutcome};
pub use params::{InvalidParameter, JobMode, JobParameters};
pub use paths::{PathRole, ProjectLayout};
