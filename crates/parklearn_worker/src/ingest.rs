//! Turning a decoded artifact into persisted result rows.

use crate::artifact::DetectionArtifact;
use crate::params::JobParameters;
use async_trait::async_trait;
use parklearn_db::{
    DbError, InsertedTree, NewCctvResult, NewExperimentSession, NewRoiResult, ParkDb, ResultLevel,
};
use thiserror::Error;
use tracing::info;

/// A write to the result store failed. Names the row that broke.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("failed to persist {level} row #{index}: {message}")]
pub struct StoreError {
    pub level: ResultLevel,
    /// Position among its siblings (always 0 for the session).
    pub index: usize,
    pub message: String,
}

/// Destination of batch results.
///
/// Implementations write the session, its cameras and their regions
/// parent-first and either keep all of it or none of it.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn insert_result_tree(
        &self,
        session: &NewExperimentSession,
        cameras: &[NewCctvResult],
    ) -> Result<InsertedTree, StoreError>;
}

#[async_trait]
impl ResultStore for ParkDb {
    async fn insert_result_tree(
        &self,
        session: &NewExperimentSession,
        cameras: &[NewCctvResult],
    ) -> Result<InsertedTree, StoreError> {
        self.insert_session_tree(session, cameras)
            .await
            .map_err(|e| match e {
                DbError::Insert {
                    level,
                    index,
                    source,
                } => StoreError {
                    level,
                    index,
                    message: source.to_string(),
                },
                // Transaction begin/commit failures leave no rows behind either.
                other => StoreError {
                    level: ResultLevel::Session,
                    index: 0,
                    message: other.to_string(),
                },
            })
    }
}

/// Map job parameters and an artifact onto rows to insert.
pub fn build_result_tree(
    params: &JobParameters,
    session_name: &str,
    artifact: &DetectionArtifact,
) -> (NewExperimentSession, Vec<NewCctvResult>) {
    let session = NewExperimentSession {
        project_id: params.project_id.clone(),
        var_threshold: params.var_threshold,
        learning_rate: params.learning_rate,
        iterations: i64::from(params.iterations),
        learning_path: params.learning_path.clone(),
        test_image_path: params.test_path().unwrap_or_default().to_string(),
        roi_path: params.roi_path.clone(),
        name: session_name.to_string(),
    };

    let cameras = artifact
        .results
        .iter()
        .map(|camera| NewCctvResult {
            cctv_id: camera.cctv_id.clone(),
            learning_data_size: camera.learning_data_size,
            rois: camera
                .roi_results
                .iter()
                .map(|roi| NewRoiResult {
                    roi_id: roi.roi_id,
                    rate: roi.foreground_ratio,
                })
                .collect(),
        })
        .collect();

    (session, cameras)
}

/// Persist one batch result tree.
pub async fn ingest_artifact(
    store: &dyn ResultStore,
    params: &JobParameters,
    session_name: &str,
    artifact: &DetectionArtifact,
) -> Result<InsertedTree, StoreError> {
    let (session, cameras) = build_result_tree(params, session_name, artifact);
    let inserted = store.insert_result_tree(&session, &cameras).await?;

    info!(
        session = session_name,
        session_id = inserted.session_id,
        cameras = inserted.cctv_result_ids.len(),
        regions = inserted.roi_result_count,
        "Persisted detection results"
    );
    Ok(inserted)
}
