//! Error types for queuectl operations.
//!
//! Defines error types for each subsystem:
//! - Job store persistence and the claim protocol
//! - The configuration key-value store
//! - Worker process supervision
//!
//! Command execution failures are not here: they are outcomes
//! (`runner::ExecutionOutcome`) that drive the job state machine.

use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

use crate::scheduler::JobState;

/// Errors that can occur while talking to the job store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Opening the database failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Another writer held the database while a job was being claimed.
    #[error("Claim conflict: {0}")]
    ClaimConflict(#[source] sqlx::Error),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    Query(#[from] sqlx::Error),

    /// The job request was rejected before touching the store.
    #[error("Invalid job: {0}")]
    InvalidJob(String),

    /// No job with the given id exists.
    #[error("Job {0} not found")]
    NotFound(Uuid),

    /// The job was not in the state the transition requires.
    #[error("Invalid state transition for job {id}: expected '{expected}', found '{actual}'")]
    InvalidTransition {
        id: Uuid,
        expected: JobState,
        actual: JobState,
    },

    /// A persisted row could not be decoded.
    #[error("Corrupt job record: {0}")]
    Corrupt(String),

    /// Schema migration failed.
    #[error("Migration error: {0}")]
    Migration(#[from] crate::storage::MigrationError),
}

impl StoreError {
    /// Classifies an error raised while claiming a job.
    ///
    /// SQLite reports lock contention as `SQLITE_BUSY` (5) or
    /// `SQLITE_LOCKED` (6); those become [`StoreError::ClaimConflict`].
    pub fn from_claim(err: sqlx::Error) -> Self {
        let contended = match &err {
            sqlx::Error::Database(db) => db
                .code()
                .map(|code| {
                    let primary = code.parse::<i32>().unwrap_or_default() & 0xff;
                    primary == 5 || primary == 6
                })
                .unwrap_or(false),
            sqlx::Error::PoolTimedOut => true,
            _ => false,
        };

        if contended {
            StoreError::ClaimConflict(err)
        } else {
            StoreError::Query(err)
        }
    }

    /// Returns whether this is a recoverable lock conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::ClaimConflict(_))
    }
}

/// Errors that can occur in the configuration store.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unknown configuration key '{0}' (expected one of: max-retries, backoff-base)")]
    UnknownKey(String),

    #[error("Invalid value '{value}' for '{key}': {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),
}

/// Errors that can occur while supervising worker processes.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// A registry already exists, so a worker set is presumed to be running.
    #[error("Workers already running (registry {} exists); run `queuectl worker stop` first", .0.display())]
    AlreadyRunning(PathBuf),

    #[error("Worker count must be between 1 and {max}")]
    InvalidCount { max: usize },

    #[error("Failed to spawn worker process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Failed to terminate process {pid}: {reason}")]
    Terminate { pid: u32, reason: String },

    #[error("Registry I/O error on {}: {source}", .path.display())]
    Registry {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Workers were signalled but the registry could not be removed.
    #[error("Signalled {stopped} of {requested} workers but could not clean up: {source}")]
    StopIncomplete {
        requested: usize,
        stopped: usize,
        #[source]
        source: Box<SupervisorError>,
    },
}
