//! SQLite database handle shared by the job queue and the config store.
//!
//! Every poller process opens its own pool against the same file. WAL mode
//! lets readers proceed while one writer holds the lock, and the busy timeout
//! turns short lock waits into blocking waits instead of immediate errors.

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use tracing::debug;

use super::migrations::MigrationRunner;
use crate::error::StoreError;

/// How long a connection waits on a locked database before giving up.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed store.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (creating if missing) the database file and applies the schema.
    pub async fn connect(path: &Path) -> Result<Self, StoreError> {
        Self::connect_with_busy_timeout(path, DEFAULT_BUSY_TIMEOUT).await
    }

    /// Like [`Database::connect`], with a custom lock wait.
    pub async fn connect_with_busy_timeout(
        path: &Path,
        busy_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let db = Self::open(path, busy_timeout).await?;
        db.run_migrations().await?;
        Ok(db)
    }

    async fn open(path: &Path, busy_timeout: Duration) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::ConnectionFailed(format!("{}: {}", parent.display(), e))
            })?;
        }

        let opts = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(opts)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        debug!(path = %path.display(), "Job store opened");
        Ok(Self { pool })
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Runs database migrations.
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        let runner = MigrationRunner::new(self.pool.clone());
        runner.run_migrations().await?;
        Ok(())
    }

    /// Closes every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_creates_parent_and_schema() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("queue.db");

        let db = Database::connect(&path).await.expect("connect");
        assert!(path.exists());

        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('jobs', 'config')",
        )
        .fetch_one(db.pool())
        .await
        .expect("query");
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_reopen_keeps_data() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("queue.db");

        let db = Database::connect(&path).await.expect("connect");
        sqlx::query("INSERT INTO config (key, value) VALUES ('max-retries', '7')")
            .execute(db.pool())
            .await
            .expect("insert");
        db.close().await;

        let db = Database::connect(&path).await.expect("reconnect");
        let (value,): (String,) = sqlx::query_as("SELECT value FROM config WHERE key = 'max-retries'")
            .fetch_one(db.pool())
            .await
            .expect("select");
        assert_eq!(value, "7");
    }
}
