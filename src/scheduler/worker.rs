//! Poller: claims jobs one at a time and drives them through the lifecycle.
//!
//! Each worker process runs exactly one [`Worker`]. The loop is
//!
//! ```text
//! loop {
//!     claim oldest pending job ──none──▶ sleep poll_interval
//!        │
//!        ▼
//!     execute (blocking) ──▶ success: completed
//!                        └─▶ failure: backoff + requeue, or DLQ
//! }
//! ```
//!
//! There is no concurrency inside a worker; parallelism comes from running
//! several worker processes against the same store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::job::Job;
use super::lifecycle::{FailureDecision, Lifecycle};
use super::queue::JobQueue;
use crate::runner::{CommandExecutor, ExecutionOutcome};
use crate::storage::ConfigStore;

/// Configuration for a poller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// How long to sleep when no job is eligible or the claim failed.
    pub poll_interval: Duration,
    /// Length of one backoff unit.
    pub time_unit: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            time_unit: Duration::from_secs(1),
        }
    }
}

impl WorkerConfig {
    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the backoff time unit.
    pub fn with_time_unit(mut self, unit: Duration) -> Self {
        self.time_unit = unit;
        self
    }
}

/// What a single poll cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// No eligible job.
    Idle,
    /// The claim could not be completed; nothing was mutated.
    ClaimFailed,
    /// The job ran successfully.
    Completed(Uuid),
    /// The job failed and is pending again after its backoff.
    Retried { job_id: Uuid, attempts: u32 },
    /// The job failed for the last time and is in the DLQ.
    Buried { job_id: Uuid, attempts: u32 },
    /// The job ran but its result could not be recorded.
    TransitionFailed(Uuid),
}

impl PollOutcome {
    /// Returns whether the poller should sleep before the next cycle.
    pub fn should_sleep(&self) -> bool {
        matches!(self, PollOutcome::Idle | PollOutcome::ClaimFailed)
    }
}

/// Counters for one worker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Jobs that ran successfully.
    pub jobs_completed: u64,
    /// Failed attempts (retried or buried).
    pub attempts_failed: u64,
    /// Jobs moved to the dead letter queue.
    pub jobs_buried: u64,
    /// Claims aborted because of a store error.
    pub claim_failures: u64,
}

#[derive(Default)]
struct WorkerCounters {
    jobs_completed: AtomicU64,
    attempts_failed: AtomicU64,
    jobs_buried: AtomicU64,
    claim_failures: AtomicU64,
}

impl WorkerCounters {
    fn snapshot(&self) -> WorkerStats {
        WorkerStats {
            jobs_completed: self.jobs_completed.load(Ordering::SeqCst),
            attempts_failed: self.attempts_failed.load(Ordering::SeqCst),
            jobs_buried: self.jobs_buried.load(Ordering::SeqCst),
            claim_failures: self.claim_failures.load(Ordering::SeqCst),
        }
    }
}

/// A single poller.
pub struct Worker {
    /// Identifier used in log lines.
    id: String,
    queue: JobQueue,
    lifecycle: Lifecycle,
    executor: CommandExecutor,
    config: WorkerConfig,
    stats: WorkerCounters,
}

impl Worker {
    /// Creates a new worker.
    pub fn new(
        id: impl Into<String>,
        queue: JobQueue,
        config_store: ConfigStore,
        executor: CommandExecutor,
        config: WorkerConfig,
    ) -> Self {
        let lifecycle = Lifecycle::new(queue.clone(), config_store, config.time_unit);
        Self {
            id: id.into(),
            queue,
            lifecycle,
            executor,
            config,
            stats: WorkerCounters::default(),
        }
    }

    /// Returns the worker's ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the worker's counters.
    pub fn stats(&self) -> WorkerStats {
        self.stats.snapshot()
    }

    /// Main worker loop.
    ///
    /// Runs until a shutdown signal is received or the sender is dropped.
    /// The signal is honoured between jobs and during the idle sleep; a
    /// running command or a backoff wait is never interrupted.
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            worker_id = %self.id,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Worker started"
        );

        loop {
            match shutdown_rx.try_recv() {
                Ok(()) | Err(broadcast::error::TryRecvError::Closed) => {
                    info!(worker_id = %self.id, "Worker received shutdown signal");
                    break;
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(broadcast::error::TryRecvError::Empty) => {}
            }

            let outcome = self.poll_once().await;
            if outcome.should_sleep() {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                    _ = shutdown_rx.recv() => {
                        info!(worker_id = %self.id, "Worker received shutdown signal");
                        break;
                    }
                }
            }
        }

        let stats = self.stats();
        info!(
            worker_id = %self.id,
            completed = stats.jobs_completed,
            failed_attempts = stats.attempts_failed,
            buried = stats.jobs_buried,
            "Worker stopped"
        );
    }

    /// Runs one claim → execute → transition cycle without sleeping.
    pub async fn poll_once(&self) -> PollOutcome {
        match self.queue.claim_next().await {
            Ok(Some(job)) => self.process_job(job).await,
            Ok(None) => {
                debug!(worker_id = %self.id, "No jobs available");
                PollOutcome::Idle
            }
            Err(e) => {
                self.stats.claim_failures.fetch_add(1, Ordering::SeqCst);
                if e.is_conflict() {
                    warn!(worker_id = %self.id, error = %e, "Claim aborted by lock conflict");
                } else {
                    error!(worker_id = %self.id, error = %e, "Failed to claim job");
                }
                PollOutcome::ClaimFailed
            }
        }
    }

    /// Executes a claimed job and records the result.
    async fn process_job(&self, job: Job) -> PollOutcome {
        let job_id = job.id;

        info!(
            worker_id = %self.id,
            job_id = %job_id,
            attempt = job.next_attempt(),
            max_retries = job.max_retries,
            command = %job.command,
            "Processing job"
        );

        let result = self.executor.execute(&job).await;
        let duration_ms = result.duration.as_millis() as u64;

        let recorded = match &result.outcome {
            ExecutionOutcome::Success => {
                debug!(worker_id = %self.id, job_id = %job_id, duration_ms, "Job command succeeded");
                self.lifecycle.on_success(&job).await.map(|_| {
                    self.stats.jobs_completed.fetch_add(1, Ordering::SeqCst);
                    PollOutcome::Completed(job_id)
                })
            }
            ExecutionOutcome::Failure(cause) => {
                warn!(
                    worker_id = %self.id,
                    job_id = %job_id,
                    cause = %cause,
                    duration_ms,
                    log = %result.log_path.display(),
                    "Job attempt failed"
                );
                self.stats.attempts_failed.fetch_add(1, Ordering::SeqCst);

                self.lifecycle
                    .on_failure(&job)
                    .await
                    .map(|(_, decision)| match decision {
                        FailureDecision::Retry { attempts, .. } => {
                            PollOutcome::Retried { job_id, attempts }
                        }
                        FailureDecision::Bury { attempts } => {
                            self.stats.jobs_buried.fetch_add(1, Ordering::SeqCst);
                            PollOutcome::Buried { job_id, attempts }
                        }
                    })
            }
        };

        recorded.unwrap_or_else(|e| {
            error!(
                worker_id = %self.id,
                job_id = %job_id,
                error = %e,
                "Failed to record job result"
            );
            PollOutcome::TransitionFailed(job_id)
        })
    }
}
