//! Table creation. All CREATE TABLE statements live here.

use crate::error::Result;
use crate::ParkDb;
use tracing::info;

impl ParkDb {
    /// Ensure all tables exist.
    pub(crate) async fn ensure_schema(&self) -> Result<()> {
        self.create_experiment_tables().await?;

        info!("Database schema verified");
        Ok(())
    }

    async fn create_experiment_tables(&self) -> Result<()> {
        // One row per batch job execution.
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS experiment_sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                project_id TEXT NOT NULL,
                name TEXT NOT NULL,
                var_threshold REAL NOT NULL,
                learning_rate REAL NOT NULL,
                iterations INTEGER NOT NULL,
                learning_path TEXT NOT NULL,
                test_image_path TEXT NOT NULL,
                roi_path TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS cctv_results (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                experiment_session_id INTEGER NOT NULL
                    REFERENCES experiment_sessions(id) ON DELETE CASCADE,
                cctv_id TEXT NOT NULL,
                learning_data_size INTEGER NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS roi_results (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                cctv_result_id INTEGER NOT NULL
                    REFERENCES cctv_results(id) ON DELETE CASCADE,
                roi_id INTEGER NOT NULL,
                rate REAL NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_sessions_project ON experiment_sessions(project_id, created_at DESC)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_cctv_results_session ON cctv_results(experiment_session_id)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_roi_results_cctv ON roi_results(cctv_result_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
