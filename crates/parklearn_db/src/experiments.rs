//! Experiment session operations (result tree writes and history reads)

use crate::error::{DbError, Result};
use crate::types::*;
use crate::ParkDb;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::debug;

impl ParkDb {
    // ========================================================================
    // Writes
    // ========================================================================

    /// Insert a session with all of its camera and region rows.
    ///
    /// Rows are written parent-first inside one transaction. If any insert
    /// fails the transaction is dropped uncommitted and the error names the
    /// level and the index of the failing row among its siblings.
    pub async fn insert_session_tree(
        &self,
        session: &NewExperimentSession,
        cameras: &[NewCctvResult],
    ) -> Result<InsertedTree> {
        let mut tx = self.pool.begin().await?;

        let session_id = sqlx::query(
            r#"
            INSERT INTO experiment_sessions (
                project_id, name, var_threshold, learning_rate, iterations,
                learning_path, test_image_path, roi_path, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.project_id)
        .bind(&session.name)
        .bind(session.var_threshold)
        .bind(session.learning_rate)
        .bind(session.iterations)
        .bind(&session.learning_path)
        .bind(&session.test_image_path)
        .bind(&session.roi_path)
        .bind(Self::now_millis())
        .execute(&mut *tx)
        .await
        .map_err(|e| DbError::insert(ResultLevel::Session, 0, e))?
        .last_insert_rowid();

        let mut cctv_result_ids = Vec::with_capacity(cameras.len());
        let mut roi_result_count = 0;

        for (camera_index, camera) in cameras.iter().enumerate() {
            let cctv_result_id = sqlx::query(
                r#"
                INSERT INTO cctv_results (experiment_session_id, cctv_id, learning_data_size)
                VALUES (?, ?, ?)
                "#,
            )
            .bind(session_id)
            .bind(&camera.cctv_id)
            .bind(camera.learning_data_size)
            .execute(&mut *tx)
            .await
            .map_err(|e| DbError::insert(ResultLevel::Camera, camera_index, e))?
            .last_insert_rowid();

            for (roi_index, roi) in camera.rois.iter().enumerate() {
                sqlx::query("INSERT INTO roi_results (cctv_result_id, roi_id, rate) VALUES (?, ?, ?)")
                    .bind(cctv_result_id)
                    .bind(roi.roi_id)
                    .bind(roi.rate)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| DbError::insert(ResultLevel::Region, roi_index, e))?;
                roi_result_count += 1;
            }

            cctv_result_ids.push(cctv_result_id);
        }

        tx.commit().await?;

        debug!(
            session_id,
            cameras = cctv_result_ids.len(),
            regions = roi_result_count,
            "Committed result tree"
        );

        Ok(InsertedTree {
            session_id,
            cctv_result_ids,
            roi_result_count,
        })
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Get a session by id.
    pub async fn get_session(&self, id: i64) -> Result<Option<ExperimentSession>> {
        let row = sqlx::query("SELECT * FROM experiment_sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_session).transpose()
    }

    /// Learning history of a project, newest first.
    pub async fn list_sessions(&self, project_id: &str) -> Result<Vec<HistoryEntry>> {
        let rows = sqlx::query(
            "SELECT * FROM experiment_sessions WHERE project_id = ? ORDER BY created_at DESC, id DESC",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            let session = row_to_session(row)?;
            let cctv_ids = self
                .list_cctv_results(session.id)
                .await?
                .into_iter()
                .map(|c| c.cctv_id)
                .collect();
            entries.push(HistoryEntry { session, cctv_ids });
        }
        Ok(entries)
    }

    /// Camera rows of one session, in insertion order.
    pub async fn list_cctv_results(&self, session_id: i64) -> Result<Vec<CctvResult>> {
        let rows = sqlx::query(
            "SELECT * FROM cctv_results WHERE experiment_session_id = ? ORDER BY id",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_cctv_result).collect()
    }

    /// Region rows of one camera row, in insertion order.
    pub async fn list_roi_results(&self, cctv_result_id: i64) -> Result<Vec<RoiResult>> {
        let rows = sqlx::query("SELECT * FROM roi_results WHERE cctv_result_id = ? ORDER BY id")
            .bind(cctv_result_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_roi_result).collect()
    }

    /// Full result tree of the most recent session with this name.
    pub async fn get_session_by_name(
        &self,
        project_id: &str,
        name: &str,
    ) -> Result<Option<SessionDetail>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM experiment_sessions
            WHERE project_id = ? AND name = ?
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(project_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        let session = match row {
            Some(row) => row_to_session(&row)?,
            None => return Ok(None),
        };

        let mut cameras = Vec::new();
        for result in self.list_cctv_results(session.id).await? {
            let rois = self.list_roi_results(result.id).await?;
            cameras.push(CameraDetail { result, rois });
        }

        Ok(Some(SessionDetail { session, cameras }))
    }
}

fn row_to_session(row: &SqliteRow) -> Result<ExperimentSession> {
    Ok(ExperimentSession {
        id: row.try_get("id")?,
        project_id: row.try_get("project_id")?,
        name: row.try_get("name")?,
        var_threshold: row.try_get("var_threshold")?,
        learning_rate: row.try_get("learning_rate")?,
        iterations: row.try_get("iterations")?,
        learning_path: row.try_get("learning_path")?,
        test_image_path: row.try_get("test_image_path")?,
        roi_path: row.try_get("roi_path")?,
        created_at: ParkDb::millis_to_datetime(row.try_get("created_at")?),
    })
}

fn row_to_cctv_result(row: &SqliteRow) -> Result<CctvResult> {
    Ok(CctvResult {
        id: row.try_get("id")?,
        experiment_session_id: row.try_get("experiment_session_id")?,
        cctv_id: row.try_get("cctv_id")?,
        learning_data_size: row.try_get("learning_data_size")?,
    })
}

fn row_to_roi_result(row: &SqliteRow) -> Result<RoiResult> {
    Ok(RoiResult {
        id: row.try_get("id")?,
        cctv_result_id: row.try_get("cctv_result_id")?,
        roi_id: row.try_get("roi_id")?,
        rate: row.try_get("rate")?,
    })
}
