//! Pipeline configuration.
//!
//! Read from `<home>/parklearn.toml`; every key is optional and a missing
//! file means all defaults. Relative paths in the file are taken relative to
//! the home directory.
//!
//! ```toml
//! shared_root = "/srv/parking/shared"
//! executable = "/srv/parking/opencv/build/main"
//! deadline_secs = 900
//! job_logs = false
//! ```

use crate::defaults::{
    CONFIG_FILE_NAME, DEFAULT_DEADLINE_SECS, DEFAULT_MAX_OUTPUT_BYTES, LIVE_IMAGES_DIR,
    SHARED_ROOT_DIR, STATE_STORE_FILE_NAME,
};
use crate::paths::ProjectLayout;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
}

/// Raw contents of `parklearn.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub shared_root: Option<PathBuf>,
    pub executable: Option<PathBuf>,
    pub state_store: Option<PathBuf>,
    pub deadline_secs: Option<u64>,
    pub live_images_dir: Option<PathBuf>,
    pub max_output_bytes: Option<usize>,
    pub job_logs: Option<bool>,
}

impl ConfigFile {
    /// Parse `path`; a missing file yields the empty config.
    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Fully resolved settings for running jobs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineConfig {
    pub home: PathBuf,
    pub shared_root: PathBuf,
    pub executable: PathBuf,
    pub state_store: PathBuf,
    pub live_images_dir: PathBuf,
    #[serde(with = "secs")]
    pub deadline: Duration,
    pub max_output_bytes: usize,
    /// Where captured executable output is kept, one file per job.
    pub job_log_dir: Option<PathBuf>,
}

impl PipelineConfig {
    pub fn config_path(home: &Path) -> PathBuf {
        home.join(CONFIG_FILE_NAME)
    }

    /// Load `<home>/parklearn.toml` and fill in defaults.
    pub fn load(home: &Path) -> Result<Self, ConfigError> {
        let file = ConfigFile::read(&Self::config_path(home))?;
        Self::resolve(home, file)
    }

    /// Fill in defaults for everything `file` leaves out.
    pub fn resolve(home: &Path, file: ConfigFile) -> Result<Self, ConfigError> {
        let under_home = |p: PathBuf| if p.is_absolute() { p } else { home.join(p) };

        let shared_root = file
            .shared_root
            .map(under_home)
            .unwrap_or_else(|| home.join(SHARED_ROOT_DIR));
        let live_images_dir = file
            .live_images_dir
            .map(under_home)
            .unwrap_or_else(|| shared_root.join(LIVE_IMAGES_DIR));
        let executable = file
            .executable
            .map(under_home)
            .unwrap_or_else(|| home.join("opencv").join("build").join("main"));
        let state_store = file
            .state_store
            .map(under_home)
            .unwrap_or_else(|| home.join(STATE_STORE_FILE_NAME));

        let deadline_secs = file.deadline_secs.unwrap_or(DEFAULT_DEADLINE_SECS);
        if deadline_secs == 0 {
            return Err(ConfigError::Zero {
                field: "deadline_secs",
            });
        }
        let max_output_bytes = file.max_output_bytes.unwrap_or(DEFAULT_MAX_OUTPUT_BYTES);
        if max_output_bytes == 0 {
            return Err(ConfigError::Zero {
                field: "max_output_bytes",
            });
        }

        let job_log_dir = file
            .job_logs
            .unwrap_or(true)
            .then(|| home.join("logs").join("jobs"));

        Ok(Self {
            home: home.to_path_buf(),
            shared_root,
            executable,
            state_store,
            live_images_dir,
            deadline: Duration::from_secs(deadline_secs),
            max_output_bytes,
            job_log_dir,
        })
    }

    pub fn layout(&self) -> ProjectLayout {
        ProjectLayout::new(&self.shared_root, &self.live_images_dir)
    }
}

mod secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }
}
