//! Job definitions for the scheduler.
//!
//! This module defines the core job types used in the scheduling system:
//!
//! - `Job`: A shell command queued for execution by a poller
//! - `JobState`: The lifecycle state of a job
//! - `NewJob`: A job about to be enqueued

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a job.
///
/// ```text
///              claim                success
///   pending ──────────▶ processing ──────────▶ completed
///    ▲   ▲                 │    │
///    │   └──── failed ◀────┘    │ retries exhausted
///    │      (after backoff)     ▼
///    └────── manual retry ──── dead
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Waiting to be claimed.
    Pending,
    /// Claimed by exactly one poller and executing.
    Processing,
    /// Command exited successfully.
    Completed,
    /// Last attempt failed; the owning poller is waiting out the backoff.
    Failed,
    /// Retries exhausted; parked in the dead letter queue.
    Dead,
}

impl JobState {
    /// All states, in lifecycle order.
    pub const ALL: [JobState; 5] = [
        JobState::Pending,
        JobState::Processing,
        JobState::Completed,
        JobState::Failed,
        JobState::Dead,
    ];

    /// Returns the persisted name of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Dead => "dead",
        }
    }

    /// Returns whether `self → next` is a legal transition.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Pending, JobState::Processing)
                | (JobState::Processing, JobState::Completed)
                | (JobState::Processing, JobState::Failed)
                | (JobState::Processing, JobState::Dead)
                | (JobState::Failed, JobState::Pending)
                | (JobState::Dead, JobState::Pending)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(JobState::Pending),
            "processing" => Ok(JobState::Processing),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "dead" => Ok(JobState::Dead),
            other => Err(format!(
                "unknown job state '{}' (expected pending, processing, completed, failed or dead)",
                other
            )),
        }
    }
}

/// A persisted job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier for this job.
    pub id: Uuid,
    /// Shell command line to run.
    pub command: String,
    /// Current lifecycle state.
    pub state: JobState,
    /// Number of failed attempts so far.
    pub attempts: u32,
    /// Failed attempts allowed before the job is moved to the DLQ.
    pub max_retries: u32,
    /// When this job was enqueued. Never changes.
    pub created_at: DateTime<Utc>,
    /// When this job last changed state.
    pub updated_at: DateTime<Utc>,
    /// Whether the job sits in the dead letter queue.
    pub is_dlq: bool,
}

impl Job {
    /// Returns the attempt number the next execution will be (1-based).
    pub fn next_attempt(&self) -> u32 {
        self.attempts + 1
    }
}

/// A job about to be inserted.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: Uuid,
    pub command: String,
    pub max_retries: u32,
}

impl NewJob {
    /// Creates a new job request with a fresh id.
    pub fn new(command: impl Into<String>, max_retries: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            command: command.into(),
            max_retries,
        }
    }
}
