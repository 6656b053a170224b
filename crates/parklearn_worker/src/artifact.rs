//! JSON artifact written by the detection executable.

use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionArtifact {
    pub project_id: String,
    #[serde(default)]
    pub results: Vec<CameraEntry>,
    #[serde(default)]
    pub total_tests: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraEntry {
    pub cctv_id: String,
    pub learning_data_size: i64,
    #[serde(default)]
    pub roi_results: Vec<RegionEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionEntry {
    pub roi_id: i64,
    /// Not range-checked; stored as reported.
    pub foreground_ratio: f64,
}

impl DetectionArtifact {
    pub fn region_count(&self) -> usize {
        self.results.iter().map(|c| c.roi_results.len()).sum()
    }

    pub fn camera(&self, cctv_id: &str) -> Option<&CameraEntry> {
        self.results.iter().find(|c| c.cctv_id == cctv_id)
    }
}

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("cannot read artifact {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed artifact {}: {source}", path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Read and decode the artifact at `path`.
pub async fn load_artifact(path: &Path) -> Result<DetectionArtifact, ArtifactError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| ArtifactError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
    serde_json::from_slice(&bytes).map_err(|source| ArtifactError::Malformed {
        path: path.to_path_buf(),
        source,
    })
}
