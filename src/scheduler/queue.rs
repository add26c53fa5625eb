//! SQLite-backed job queue with an atomic claim.
//!
//! The `jobs` table is the single source of truth for job state. Every
//! transition is a guarded `UPDATE … WHERE id = ? AND state = ?`, so a
//! transition from the wrong source state touches no rows and is reported as
//! [`StoreError::InvalidTransition`] instead of silently corrupting the job.
//!
//! # Claim protocol
//!
//! [`JobQueue::claim_next`] selects the oldest pending, non-DLQ job and flips
//! it to `processing` in one statement:
//!
//! ```sql
//! UPDATE jobs SET state = 'processing', …
//! WHERE id = (SELECT id FROM jobs WHERE state = 'pending' … LIMIT 1)
//!   AND state = 'pending'
//! RETURNING …
//! ```
//!
//! SQLite admits one writer at a time, so two pollers in different processes
//! cannot both select and transition the same row. A poller that finds the
//! database locked past the busy timeout gets [`StoreError::ClaimConflict`]
//! and nothing is mutated.
//!
//! # Writes to a claimed job
//!
//! Later transitions also run in their own transaction, so a write that
//! fails is rolled back and never lands afterwards. The claiming poller is
//! the only writer of its job, so a lock conflict there is retried a bounded
//! number of times instead of abandoning the job mid-lifecycle.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::warn;
use uuid::Uuid;

use super::job::{Job, JobState, NewJob};
use crate::error::StoreError;
use crate::storage::schema::JOB_COLUMNS;
use crate::storage::Database;

/// Attempts made for one transition before a lock conflict is returned.
pub const DEFAULT_WRITE_ATTEMPTS: u32 = 5;

/// Pause after the first conflicting attempt; doubles on each retry.
pub const DEFAULT_WRITE_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Upper bound on the pause between conflicting attempts.
const MAX_WRITE_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Job queue over the shared SQLite store.
#[derive(Clone)]
pub struct JobQueue {
    db: Database,
    write_attempts: u32,
    write_retry_delay: Duration,
}

impl JobQueue {
    /// Creates a queue over an open database.
    pub fn new(db: Database) -> Self {
        Self {
            db,
            write_attempts: DEFAULT_WRITE_ATTEMPTS,
            write_retry_delay: DEFAULT_WRITE_RETRY_DELAY,
        }
    }

    /// Sets how often a conflicting transition is attempted, and the
    /// initial pause between attempts.
    pub fn with_write_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.write_attempts = attempts.max(1);
        self.write_retry_delay = delay;
        self
    }

    /// Inserts a new job in the `pending` state with zero attempts.
    pub async fn enqueue(&self, new_job: NewJob) -> Result<Job, StoreError> {
        if new_job.command.trim().is_empty() {
            return Err(StoreError::InvalidJob("command must not be empty".to_string()));
        }
        if new_job.max_retries == 0 {
            return Err(StoreError::InvalidJob(
                "max_retries must be at least 1".to_string(),
            ));
        }

        let now = now_micros();
        let sql = format!(
            "INSERT INTO jobs (id, command, state, attempts, max_retries, created_at, updated_at, is_dlq)
             VALUES (?1, ?2, ?3, 0, ?4, ?5, ?5, 0)
             RETURNING {}",
            JOB_COLUMNS
        );

        let row = sqlx::query(&sql)
            .bind(new_job.id.to_string())
            .bind(&new_job.command)
            .bind(JobState::Pending.as_str())
            .bind(i64::from(new_job.max_retries))
            .bind(now)
            .fetch_one(self.db.pool())
            .await?;

        job_from_row(&row)
    }

    /// Fetches a job by id.
    pub async fn get(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        let sql = format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(self.db.pool())
            .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    /// Atomically claims the oldest pending, non-DLQ job.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(job))` with the job now in `processing`
    /// - `Ok(None)` if nothing was eligible (no row was modified)
    /// - `Err(StoreError::ClaimConflict)` if the store was locked
    pub async fn claim_next(&self) -> Result<Option<Job>, StoreError> {
        let sql = format!(
            "UPDATE jobs
             SET state = ?1, updated_at = MAX(?2, updated_at + 1)
             WHERE id = (
                 SELECT id FROM jobs
                 WHERE state = ?3 AND is_dlq = 0
                 ORDER BY created_at ASC, rowid ASC
                 LIMIT 1
             )
             AND state = ?3 AND is_dlq = 0
             RETURNING {}",
            JOB_COLUMNS
        );

        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .map_err(StoreError::from_claim)?;

        let row = sqlx::query(&sql)
            .bind(JobState::Processing.as_str())
            .bind(now_micros())
            .bind(JobState::Pending.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(StoreError::from_claim)?;

        // Decode before committing so a corrupt row rolls the claim back.
        let job = row.as_ref().map(job_from_row).transpose()?;

        tx.commit().await.map_err(StoreError::from_claim)?;

        Ok(job)
    }

    /// `processing → completed`.
    pub async fn complete(&self, id: Uuid) -> Result<Job, StoreError> {
        self.transition(id, JobState::Processing, JobState::Completed, None, None)
            .await
    }

    /// `processing → failed`, recording the incremented attempt count.
    pub async fn mark_failed(&self, id: Uuid, attempts: u32) -> Result<Job, StoreError> {
        self.transition(
            id,
            JobState::Processing,
            JobState::Failed,
            Some(attempts),
            None,
        )
        .await
    }

    /// `failed → pending`, once the backoff has elapsed.
    pub async fn requeue(&self, id: Uuid) -> Result<Job, StoreError> {
        self.transition(id, JobState::Failed, JobState::Pending, None, None)
            .await
    }

    /// `processing → dead`, moving the job into the dead letter queue.
    pub async fn bury(&self, id: Uuid, attempts: u32) -> Result<Job, StoreError> {
        self.transition(
            id,
            JobState::Processing,
            JobState::Dead,
            Some(attempts),
            Some(true),
        )
        .await
    }

    /// `dead → pending` on operator request: attempts reset, DLQ flag cleared.
    pub async fn retry_dead(&self, id: Uuid) -> Result<Job, StoreError> {
        self.transition(id, JobState::Dead, JobState::Pending, Some(0), Some(false))
            .await
    }

    /// Lists jobs, optionally filtered by state, oldest first.
    pub async fn list(&self, state: Option<JobState>) -> Result<Vec<Job>, StoreError> {
        let rows = match state {
            Some(state) => {
                let sql = format!(
                    "SELECT {} FROM jobs WHERE state = ?1 ORDER BY created_at ASC, rowid ASC",
                    JOB_COLUMNS
                );
                sqlx::query(&sql)
                    .bind(state.as_str())
                    .fetch_all(self.db.pool())
                    .await?
            }
            None => {
                let sql = format!(
                    "SELECT {} FROM jobs ORDER BY created_at ASC, rowid ASC",
                    JOB_COLUMNS
                );
                sqlx::query(&sql).fetch_all(self.db.pool()).await?
            }
        };

        rows.iter().map(job_from_row).collect()
    }

    /// Lists jobs in the dead letter queue, oldest first.
    pub async fn dead_letters(&self) -> Result<Vec<Job>, StoreError> {
        let sql = format!(
            "SELECT {} FROM jobs WHERE is_dlq = 1 ORDER BY created_at ASC, rowid ASC",
            JOB_COLUMNS
        );
        let rows = sqlx::query(&sql).fetch_all(self.db.pool()).await?;

        rows.iter().map(job_from_row).collect()
    }

    /// Returns the number of jobs in each state.
    pub async fn stats(&self) -> Result<QueueStats, StoreError> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT state, COUNT(*) FROM jobs GROUP BY state")
                .fetch_all(self.db.pool())
                .await?;

        let mut stats = QueueStats::default();
        for (state, count) in rows {
            let count = usize::try_from(count).unwrap_or_default();
            match state.parse::<JobState>().map_err(StoreError::Corrupt)? {
                JobState::Pending => stats.pending = count,
                JobState::Processing => stats.processing = count,
                JobState::Completed => stats.completed = count,
                JobState::Failed => stats.failed = count,
                JobState::Dead => stats.dead = count,
            }
        }

        Ok(stats)
    }

    /// Applies one guarded transition and returns the updated job.
    ///
    /// Lock conflicts are retried with a doubling pause; any other error,
    /// and the last conflict, is returned with nothing written.
    async fn transition(
        &self,
        id: Uuid,
        from: JobState,
        to: JobState,
        attempts: Option<u32>,
        is_dlq: Option<bool>,
    ) -> Result<Job, StoreError> {
        debug_assert!(from.can_transition_to(to), "{} -> {}", from, to);

        let mut delay = self.write_retry_delay;
        let mut attempt = 1;
        loop {
            match self.try_transition(id, from, to, attempts, is_dlq).await {
                Err(e) if e.is_conflict() && attempt < self.write_attempts => {
                    warn!(
                        job_id = %id,
                        from = %from,
                        to = %to,
                        attempt = attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "Job store locked, retrying transition"
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2).min(MAX_WRITE_RETRY_DELAY);
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn try_transition(
        &self,
        id: Uuid,
        from: JobState,
        to: JobState,
        attempts: Option<u32>,
        is_dlq: Option<bool>,
    ) -> Result<Job, StoreError> {
        let sql = format!(
            "UPDATE jobs
             SET state = ?1,
                 attempts = COALESCE(?2, attempts),
                 is_dlq = COALESCE(?3, is_dlq),
                 updated_at = MAX(?4, updated_at + 1)
             WHERE id = ?5 AND state = ?6
             RETURNING {}",
            JOB_COLUMNS
        );

        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .map_err(StoreError::from_claim)?;

        let row = sqlx::query(&sql)
            .bind(to.as_str())
            .bind(attempts.map(i64::from))
            .bind(is_dlq)
            .bind(now_micros())
            .bind(id.to_string())
            .bind(from.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(StoreError::from_claim)?;

        let Some(row) = row else {
            tx.rollback().await?;
            return match self.get(id).await? {
                Some(job) => Err(StoreError::InvalidTransition {
                    id,
                    expected: from,
                    actual: job.state,
                }),
                None => Err(StoreError::NotFound(id)),
            };
        };

        let job = job_from_row(&row)?;
        tx.commit().await.map_err(StoreError::from_claim)?;

        Ok(job)
    }
}

/// Statistics about queue state.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub dead: usize,
}

impl QueueStats {
    /// Returns the total number of jobs in all states.
    pub fn total_jobs(&self) -> usize {
        self.pending + self.processing + self.completed + self.failed + self.dead
    }

    /// Returns the count for one state.
    pub fn count(&self, state: JobState) -> usize {
        match state {
            JobState::Pending => self.pending,
            JobState::Processing => self.processing,
            JobState::Completed => self.completed,
            JobState::Failed => self.failed,
            JobState::Dead => self.dead,
        }
    }
}

fn now_micros() -> i64 {
    Utc::now().timestamp_micros()
}

fn micros_to_datetime(column: &str, micros: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| StoreError::Corrupt(format!("{} out of range: {}", column, micros)))
}

fn job_from_row(row: &SqliteRow) -> Result<Job, StoreError> {
    let raw_id: String = row.try_get("id")?;
    let id = Uuid::parse_str(&raw_id)
        .map_err(|e| StoreError::Corrupt(format!("id '{}': {}", raw_id, e)))?;

    let raw_state: String = row.try_get("state")?;
    let state = raw_state.parse::<JobState>().map_err(StoreError::Corrupt)?;

    let attempts: i64 = row.try_get("attempts")?;
    let max_retries: i64 = row.try_get("max_retries")?;

    Ok(Job {
        id,
        command: row.try_get("command")?,
        state,
        attempts: u32::try_from(attempts)
            .map_err(|_| StoreError::Corrupt(format!("attempts {} for job {}", attempts, id)))?,
        max_retries: u32::try_from(max_retries).map_err(|_| {
            StoreError::Corrupt(format!("max_retries {} for job {}", max_retries, id))
        })?,
        created_at: micros_to_datetime("created_at", row.try_get("created_at")?)?,
        updated_at: micros_to_datetime("updated_at", row.try_get("updated_at")?)?,
        is_dlq: row.try_get("is_dlq")?,
    })
}
