//! Job lifecycle engine: retry decisions, exponential backoff, DLQ routing.
//!
//! The decision itself is pure ([`RetryPolicy::decide`]); [`Lifecycle`]
//! applies it to the queue. A failing job goes through
//!
//! ```text
//! processing ─▶ failed(attempts+1) ─ sleep base^(attempts+1) ─▶ pending
//! ```
//!
//! or, when `attempts + 1 >= max_retries`,
//!
//! ```text
//! processing ─▶ dead(attempts = max_retries, is_dlq)
//! ```
//!
//! The backoff sleep runs on the poller that owns the job. Other pollers
//! keep claiming work while it waits.

use std::time::Duration;

use tracing::{info, warn};

use super::job::Job;
use super::queue::JobQueue;
use crate::error::StoreError;
use crate::storage::{ConfigStore, DEFAULT_BACKOFF_BASE};

/// What to do with a job whose attempt just failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDecision {
    /// Record the failure, wait `delay`, then move the job back to pending.
    Retry { attempts: u32, delay: Duration },
    /// Retries exhausted: move the job to the dead letter queue.
    Bury { attempts: u32 },
}

impl FailureDecision {
    /// Attempt count after this failure.
    pub fn attempts(&self) -> u32 {
        match self {
            FailureDecision::Retry { attempts, .. } | FailureDecision::Bury { attempts } => {
                *attempts
            }
        }
    }
}

/// Backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Exponential base; the delay after the n-th failure is `base^n` units.
    pub backoff_base: u32,
    /// Length of one backoff unit (one second in production).
    pub time_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff_base: DEFAULT_BACKOFF_BASE,
            time_unit: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(backoff_base: u32, time_unit: Duration) -> Self {
        Self {
            backoff_base,
            time_unit,
        }
    }

    /// Delay inserted before re-queueing a job that has now failed
    /// `attempts` times. Saturates instead of overflowing.
    pub fn backoff_delay(&self, attempts: u32) -> Duration {
        let units = self.backoff_base.saturating_pow(attempts);
        self.time_unit.saturating_mul(units)
    }

    /// Decides the fate of `job` after a failed attempt.
    pub fn decide(&self, job: &Job) -> FailureDecision {
        let attempts = job.attempts.saturating_add(1);

        if attempts >= job.max_retries {
            FailureDecision::Bury {
                attempts: attempts.min(job.max_retries),
            }
        } else {
            FailureDecision::Retry {
                attempts,
                delay: self.backoff_delay(attempts),
            }
        }
    }
}

/// Applies execution outcomes to the queue.
#[derive(Clone)]
pub struct Lifecycle {
    queue: JobQueue,
    config: ConfigStore,
    time_unit: Duration,
}

impl Lifecycle {
    pub fn new(queue: JobQueue, config: ConfigStore, time_unit: Duration) -> Self {
        Self {
            queue,
            config,
            time_unit,
        }
    }

    /// Reads the current policy. `backoff-base` is read on every failure so
    /// that `config set` takes effect without restarting workers.
    pub async fn current_policy(&self) -> RetryPolicy {
        let backoff_base = match self.config.backoff_base().await {
            Ok(base) => base,
            Err(e) => {
                warn!(error = %e, default = DEFAULT_BACKOFF_BASE, "Failed to read backoff-base, using default");
                DEFAULT_BACKOFF_BASE
            }
        };
        RetryPolicy::new(backoff_base, self.time_unit)
    }

    /// `processing → completed`.
    pub async fn on_success(&self, job: &Job) -> Result<Job, StoreError> {
        let done = self.queue.complete(job.id).await?;
        info!(job_id = %job.id, attempt = job.next_attempt(), "Job completed successfully");
        Ok(done)
    }

    /// Routes a failed attempt: backoff and re-queue, or bury in the DLQ.
    ///
    /// Blocks the calling poller for the backoff delay.
    pub async fn on_failure(&self, job: &Job) -> Result<(Job, FailureDecision), StoreError> {
        let policy = self.current_policy().await;
        let decision = policy.decide(job);

        match decision {
            FailureDecision::Retry { attempts, delay } => {
                self.queue.mark_failed(job.id, attempts).await?;
                warn!(
                    job_id = %job.id,
                    attempts = attempts,
                    max_retries = job.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "Job failed, retrying after backoff"
                );

                tokio::time::sleep(delay).await;

                let requeued = self.queue.requeue(job.id).await?;
                Ok((requeued, decision))
            }
            FailureDecision::Bury { attempts } => {
                let dead = self.queue.bury(job.id, attempts).await?;
                warn!(
                    job_id = %job.id,
                    attempts = attempts,
                    "Job exhausted its retries, moved to dead letter queue"
                );
                Ok((dead, decision))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{JobState, NewJob};
    use crate::storage::{Database, BACKOFF_BASE_KEY};
    use chrono::Utc;
    use uuid::Uuid;

    fn job(attempts: u32, max_retries: u32) -> Job {
        let now = Utc::now();
        Job {
            id: Uuid::new_v4(),
            command: "false".to_string(),
            state: JobState::Processing,
            attempts,
            max_retries,
            created_at: now,
            updated_at: now,
            is_dlq: false,
        }
    }

    #[test]
    fn test_backoff_ladder_base_two() {
        let policy = RetryPolicy::new(2, Duration::from_secs(1));
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(4));
        assert_eq!(policy.backoff_delay(3), Duration::from_secs(8));
    }

    #[test]
    fn test_backoff_saturates() {
        let policy = RetryPolicy::new(u32::MAX, Duration::from_secs(u64::MAX / 2));
        assert_eq!(policy.backoff_delay(10), Duration::MAX);
    }

    #[test]
    fn test_decide_uses_incremented_attempts() {
        let policy = RetryPolicy::new(2, Duration::from_secs(1));

        assert_eq!(
            policy.decide(&job(0, 3)),
            FailureDecision::Retry {
                attempts: 1,
                delay: Duration::from_secs(2)
            }
        );
        assert_eq!(
            policy.decide(&job(1, 3)),
            FailureDecision::Retry {
                attempts: 2,
                delay: Duration::from_secs(4)
            }
        );
        assert_eq!(policy.decide(&job(2, 3)), FailureDecision::Bury { attempts: 3 });
    }

    #[test]
    fn test_single_retry_budget_buries_immediately() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.decide(&job(0, 1)), FailureDecision::Bury { attempts: 1 });
    }

    #[test]
    fn test_bury_never_exceeds_max_retries() {
        let policy = RetryPolicy::default();
        let decision = policy.decide(&job(5, 3));
        assert_eq!(decision, FailureDecision::Bury { attempts: 3 });
        assert_eq!(decision.attempts(), 3);
    }

    #[tokio::test]
    async fn test_on_failure_reads_backoff_base_from_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::connect(&dir.path().join("q.db")).await.expect("db");
        let queue = JobQueue::new(db.clone());
        let config = ConfigStore::new(db.pool().clone());
        config.set(BACKOFF_BASE_KEY, "3").await.expect("set");

        let lifecycle = Lifecycle::new(queue.clone(), config, Duration::from_millis(1));
        assert_eq!(lifecycle.current_policy().await.backoff_base, 3);

        queue.enqueue(NewJob::new("false", 3)).await.expect("enqueue");
        let claimed = queue.claim_next().await.expect("claim").expect("job");

        let (requeued, decision) = lifecycle.on_failure(&claimed).await.expect("failure");
        assert_eq!(
            decision,
            FailureDecision::Retry {
                attempts: 1,
                delay: Duration::from_millis(3)
            }
        );
        assert_eq!(requeued.state, JobState::Pending);
        assert_eq!(requeued.attempts, 1);
    }
}
