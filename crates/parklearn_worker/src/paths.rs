//! Project directory layout and input path resolution.
//!
//! ```text
//! <shared_root>/<project>/
//!   uploads/learningImages/<ref>
//!   uploads/testImages/<ref>
//!   uploads/roi/<ref>
//!   results/<YYYYMMDDhhmmss>/     batch output, one folder per job
//!   liveResults/                  live output
//!   .parklearn.lock
//! ```

use crate::defaults::LOCK_FILE_NAME;
use crate::params::{InvalidParameter, JobParameters};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Anchor segment that precedes a batch session folder.
pub const BATCH_RESULTS_DIR: &str = "results";
/// Anchor segment that precedes a live session folder.
pub const LIVE_RESULTS_DIR: &str = "liveResults";

const UPLOADS_DIR: &str = "uploads";
const LEARNING_IMAGES_DIR: &str = "learningImages";
const TEST_IMAGES_DIR: &str = "testImages";
const ROI_DIR: &str = "roi";
const SESSION_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// What a resolved path is used for. Reported on failed precondition checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PathRole {
    Executable,
    LearningImages,
    TestImages,
    LiveImages,
    RoiDefinition,
}

impl PathRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Executable => "executable",
            Self::LearningImages => "learning images",
            Self::TestImages => "test images",
            Self::LiveImages => "live images",
            Self::RoiDefinition => "ROI definition",
        }
    }
}

impl fmt::Display for PathRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum PathError {
    #[error(transparent)]
    Invalid(#[from] InvalidParameter),

    #[error("{role} not found: {}", path.display())]
    NotFound { role: PathRole, path: PathBuf },
}

/// Where a project's inputs and outputs live under the shared root.
#[derive(Debug, Clone)]
pub struct ProjectLayout {
    shared_root: PathBuf,
    live_images_dir: PathBuf,
}

impl ProjectLayout {
    pub fn new(shared_root: impl Into<PathBuf>, live_images_dir: impl Into<PathBuf>) -> Self {
        Self {
            shared_root: shared_root.into(),
            live_images_dir: live_images_dir.into(),
        }
    }

    pub fn shared_root(&self) -> &Path {
        &self.shared_root
    }

    /// Directory the live camera frames are read from, shared by all projects.
    pub fn live_images_dir(&self) -> &Path {
        &self.live_images_dir
    }

    pub fn project_dir(&self, project_id: &str) -> PathBuf {
        self.shared_root.join(project_id)
    }

    pub fn learning_images(&self, project_id: &str, reference: &str) -> PathBuf {
        self.uploads(project_id, LEARNING_IMAGES_DIR).join(reference)
    }

    pub fn test_images(&self, project_id: &str, reference: &str) -> PathBuf {
        self.uploads(project_id, TEST_IMAGES_DIR).join(reference)
    }

    pub fn roi_file(&self, project_id: &str, reference: &str) -> PathBuf {
        self.uploads(project_id, ROI_DIR).join(reference)
    }

    pub fn batch_results_root(&self, project_id: &str) -> PathBuf {
        self.project_dir(project_id).join(BATCH_RESULTS_DIR)
    }

    pub fn batch_session_dir(&self, project_id: &str, session_name: &str) -> PathBuf {
        self.batch_results_root(project_id).join(session_name)
    }

    pub fn live_results_dir(&self, project_id: &str) -> PathBuf {
        self.project_dir(project_id).join(LIVE_RESULTS_DIR)
    }

    pub fn lock_file(&self, project_id: &str) -> PathBuf {
        self.project_dir(project_id).join(LOCK_FILE_NAME)
    }

    fn uploads(&self, project_id: &str, kind: &str) -> PathBuf {
        self.project_dir(project_id).join(UPLOADS_DIR).join(kind)
    }

    /// Resolve and check every input of a job. Only stats the filesystem.
    pub fn resolve(
        &self,
        params: &JobParameters,
        executable: &Path,
    ) -> Result<ResolvedInputs, PathError> {
        params.validate()?;

        let project = params.project_id.as_str();
        let learning = self.learning_images(project, &params.learning_path);
        let test = match params.test_path() {
            Some(reference) => self.test_images(project, reference),
            None => self.live_images_dir.clone(),
        };
        let roi = self.roi_file(project, &params.roi_path);

        let test_role = if params.is_batch() {
            PathRole::TestImages
        } else {
            PathRole::LiveImages
        };

        require_exists(PathRole::Executable, executable)?;
        require_exists(PathRole::LearningImages, &learning)?;
        require_exists(test_role, &test)?;
        require_exists(PathRole::RoiDefinition, &roi)?;

        Ok(ResolvedInputs {
            executable: executable.to_path_buf(),
            learning,
            test,
            roi,
        })
    }

    /// Create the output folder of a new batch session.
    ///
    /// The folder is named after `now`; when a folder with that name already
    /// exists a numeric suffix is appended so two jobs never share one.
    pub fn create_batch_output(
        &self,
        project_id: &str,
        now: DateTime<Local>,
    ) -> io::Result<PathBuf> {
        let root = self.batch_results_root(project_id);
        std::fs::create_dir_all(&root)?;

        let stamp = now.format(SESSION_TIMESTAMP_FORMAT).to_string();
        let mut attempt = 1u32;
        loop {
            let name = if attempt == 1 {
                stamp.clone()
            } else {
                format!("{}_{}", stamp, attempt)
            };
            let dir = root.join(name);
            match std::fs::create_dir(&dir) {
                Ok(()) => return Ok(dir),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(e),
            }
        }
    }

    /// Create (if needed) the project's live output folder.
    pub fn create_live_output(&self, project_id: &str) -> io::Result<PathBuf> {
        let dir = self.live_results_dir(project_id);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

/// Absolute locations of a job's inputs, all known to exist.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedInputs {
    pub executable: PathBuf,
    pub learning: PathBuf,
    /// Test-image folder in batch mode, live frame folder in live mode.
    pub test: PathBuf,
    pub roi: PathBuf,
}

fn require_exists(role: PathRole, path: &Path) -> Result<(), PathError> {
    if path.exists() {
        Ok(())
    } else {
        Err(PathError::NotFound {
            role,
            path: path.to_path_buf(),
        })
    }
}
