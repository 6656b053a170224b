//! Canonical default values shared by the pipeline and the CLI.

/// Whole-job budget when neither the config file nor the caller sets one.
pub const DEFAULT_DEADLINE_SECS: u64 = 600;

/// Cap on the combined stdout/stderr kept from one executable run.
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 16 * 1024 * 1024;

pub const CONFIG_FILE_NAME: &str = "parklearn.toml";
pub const STATE_STORE_FILE_NAME: &str = "state.sqlite";

/// Shared data root relative to the parklearn home.
pub const SHARED_ROOT_DIR: &str = "shared";

/// Live camera frames relative to the shared root.
pub const LIVE_IMAGES_DIR: &str = "live/currentImages";

/// Per-project lock file, placed in the project directory.
pub const LOCK_FILE_NAME: &str = ".parklearn.lock";

/// Headline shown when a job stops because the user interrupted it.
pub const CANCELLED_BY_USER_MESSAGE: &str = "Cancelled by user";
