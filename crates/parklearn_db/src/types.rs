//! Row types for experiment sessions and their per-camera / per-region results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Write-side types
// ============================================================================

/// A session row to insert. Holds the job parameters exactly as submitted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewExperimentSession {
    pub project_id: String,
    pub var_threshold: f64,
    pub learning_rate: f64,
    pub iterations: i64,
    pub learning_path: String,
    pub test_image_path: String,
    pub roi_path: String,
    /// Session/folder name taken from the artifact path.
    pub name: String,
}

/// A camera row to insert, together with its region rows.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCctvResult {
    pub cctv_id: String,
    pub learning_data_size: i64,
    pub rois: Vec<NewRoiResult>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewRoiResult {
    pub roi_id: i64,
    pub rate: f64,
}

/// Generated ids of a freshly committed result tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertedTree {
    pub session_id: i64,
    /// One id per camera, in input order.
    pub cctv_result_ids: Vec<i64>,
    pub roi_result_count: usize,
}

/// Level of the session → camera → region hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultLevel {
    Session,
    Camera,
    Region,
}

impl ResultLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Camera => "camera",
            Self::Region => "region",
        }
    }
}

impl fmt::Display for ResultLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Read-side types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExperimentSession {
    pub id: i64,
    pub project_id: String,
    pub name: String,
    pub var_threshold: f64,
    pub learning_rate: f64,
    pub iterations: i64,
    pub learning_path: String,
    pub test_image_path: String,
    pub roi_path: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CctvResult {
    pub id: i64,
    pub experiment_session_id: i64,
    pub cctv_id: String,
    pub learning_data_size: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoiResult {
    pub id: i64,
    pub cctv_result_id: i64,
    pub roi_id: i64,
    pub rate: f64,
}

/// One line of a project's learning history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    #[serde(flatten)]
    pub session: ExperimentSession,
    pub cctv_ids: Vec<String>,
}

/// A session with its full result tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionDetail {
    #[serde(flatten)]
    pub session: ExperimentSession,
    pub cameras: Vec<CameraDetail>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CameraDetail {
    #[serde(flatten)]
    pub result: CctvResult,
    pub rois: Vec<RoiResult>,
}
