//! SQLite store for parklearn experiment results.
//!
//! A batch learning job produces one result tree:
//!
//! ```text
//! experiment_sessions 1 ── n cctv_results 1 ── n roi_results
//! ```
//!
//! Trees are written in a single transaction, so readers never observe a
//! camera without its session or a region without its camera.
//!
//! # Usage
//!
//! ```rust,ignore
//! use parklearn_db::ParkDb;
//!
//! let db = ParkDb::open("~/.parklearn/state.sqlite").await?;
//! let history = db.list_sessions("project-a").await?;
//! ```

mod error;
mod experiments;
mod schema;
mod types;

pub use error::{DbError, Result};
pub use types::*;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Handle to the parklearn state store. Cheap to clone.
#[derive(Clone)]
pub struct ParkDb {
    pool: SqlitePool,
}

impl ParkDb {
    /// Open or create a database at the given path.
    ///
    /// Creates all tables if they don't exist.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let pool = Self::connect(path, true).await?;
        let db = Self { pool };
        db.ensure_schema().await?;

        info!(path = %path.display(), "Database opened");
        Ok(db)
    }

    /// Open an existing database (fails if not exists).
    pub async fn open_existing(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(DbError::not_found(format!(
                "Database not found: {}",
                path.display()
            )));
        }

        let pool = Self::connect(path, false).await?;
        Ok(Self { pool })
    }

    async fn connect(path: &Path, create: bool) -> Result<SqlitePool> {
        // Foreign keys are a per-connection setting, so they go on the
        // connect options rather than a one-off PRAGMA.
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(create)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Ok(pool)
    }

    /// Get the underlying connection pool (escape hatch for complex queries).
    ///
    /// Prefer using the typed methods instead.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the database connection.
    pub async fn close(self) {
        self.pool.close().await;
    }
}

// Timestamp utilities
impl ParkDb {
    /// Current time as milliseconds since Unix epoch.
    pub fn now_millis() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// Convert milliseconds to DateTime.
    pub fn millis_to_datetime(millis: i64) -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::from_timestamp_millis(millis).unwrap_or_default()
    }
}
