//! Integration tests for the job lifecycle: claim, execute, retry, DLQ.
//!
//! Commands run through `sh -c`, so these tests are unix-only. Backoff runs
//! with a millisecond time unit.

#![cfg(unix)]

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use queuectl::runner::CommandExecutor;
use queuectl::scheduler::{
    FailureDecision, JobQueue, JobState, NewJob, PollOutcome, RetryPolicy, Worker, WorkerConfig,
};
use queuectl::storage::{ConfigStore, Database, BACKOFF_BASE_KEY};

async fn open(dir: &Path) -> Database {
    Database::connect(&dir.join("queuectl.db"))
        .await
        .expect("Should open database")
}

fn worker(dir: &Path, db: &Database, time_unit: Duration) -> Worker {
    worker_with(
        JobQueue::new(db.clone()),
        db,
        CommandExecutor::new(dir.join("logs")),
        time_unit,
    )
}

fn worker_with(
    queue: JobQueue,
    db: &Database,
    executor: CommandExecutor,
    time_unit: Duration,
) -> Worker {
    Worker::new(
        "worker-it",
        queue,
        ConfigStore::new(db.pool().clone()),
        executor,
        WorkerConfig::default()
            .with_poll_interval(Duration::from_millis(10))
            .with_time_unit(time_unit),
    )
}

#[tokio::test]
async fn test_successful_job_completes_in_one_cycle() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = open(dir.path()).await;
    let queue = JobQueue::new(db.clone());
    let worker = worker(dir.path(), &db, Duration::from_millis(1));

    let job = queue.enqueue(NewJob::new("true", 1)).await.unwrap();
    assert_eq!(job.state, JobState::Pending);
    assert_eq!(job.attempts, 0);

    assert_eq!(worker.poll_once().await, PollOutcome::Completed(job.id));

    let done = queue.get(job.id).await.unwrap().expect("job exists");
    assert_eq!(done.state, JobState::Completed);
    assert_eq!(done.attempts, 0);
    assert!(!done.is_dlq);
    assert_eq!(worker.poll_once().await, PollOutcome::Idle);
}

#[tokio::test]
async fn test_failing_job_walks_through_failed_to_dead() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = open(dir.path()).await;
    let queue = JobQueue::new(db.clone());
    ConfigStore::new(db.pool().clone())
        .set(BACKOFF_BASE_KEY, "1")
        .await
        .unwrap();

    // One backoff unit is long enough to observe the failed state.
    let worker = worker(dir.path(), &db, Duration::from_millis(300));
    let job = queue.enqueue(NewJob::new("false", 2)).await.unwrap();

    let first = tokio::spawn(async move {
        let outcome = worker.poll_once().await;
        (worker, outcome)
    });

    let mut seen = Vec::new();
    for _ in 0..500 {
        let state = queue.get(job.id).await.unwrap().expect("job exists").state;
        if seen.last() != Some(&state) {
            seen.push(state);
        }
        if first.is_finished() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let (worker, outcome) = first.await.expect("join");

    assert_eq!(
        outcome,
        PollOutcome::Retried {
            job_id: job.id,
            attempts: 1
        }
    );
    assert!(seen.contains(&JobState::Failed), "states seen: {:?}", seen);
    let pending = queue.get(job.id).await.unwrap().expect("job exists");
    assert_eq!(pending.state, JobState::Pending);
    assert_eq!(pending.attempts, 1);

    assert_eq!(
        worker.poll_once().await,
        PollOutcome::Buried {
            job_id: job.id,
            attempts: 2
        }
    );
    let dead = queue.get(job.id).await.unwrap().expect("job exists");
    assert_eq!(dead.state, JobState::Dead);
    assert_eq!(dead.attempts, 2);
    assert!(dead.is_dlq);

    let log = std::fs::read_to_string(dir.path().join("logs").join(format!("{}.log", job.id)))
        .expect("job log");
    assert!(log.contains("=== attempt 1 at"));
    assert!(log.contains("=== attempt 2 at"));
}

#[tokio::test]
async fn test_requeue_survives_a_writer_holding_the_lock() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("queuectl.db");
    let db = Database::connect_with_busy_timeout(&path, Duration::from_millis(50))
        .await
        .expect("db");
    let queue = JobQueue::new(db.clone());
    ConfigStore::new(db.pool().clone())
        .set(BACKOFF_BASE_KEY, "1")
        .await
        .unwrap();

    let worker = worker_with(
        JobQueue::new(db.clone()).with_write_retry(20, Duration::from_millis(20)),
        &db,
        CommandExecutor::new(dir.path().join("logs")),
        Duration::from_millis(300),
    );
    let job = queue.enqueue(NewJob::new("false", 3)).await.unwrap();
    let cycle = tokio::spawn(async move { worker.poll_once().await });

    let mut failed = false;
    for _ in 0..200 {
        if queue.get(job.id).await.unwrap().expect("job exists").state == JobState::Failed {
            failed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(failed, "job never reached the failed state");

    // Another process takes the write lock across the end of the backoff.
    let locker = Database::connect(&path).await.expect("db");
    let mut conn = locker.pool().acquire().await.expect("acquire");
    sqlx::query("BEGIN IMMEDIATE")
        .execute(&mut *conn)
        .await
        .expect("begin immediate");
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(!cycle.is_finished());
    sqlx::query("COMMIT")
        .execute(&mut *conn)
        .await
        .expect("commit");

    assert_eq!(
        cycle.await.expect("join"),
        PollOutcome::Retried {
            job_id: job.id,
            attempts: 1
        }
    );
    let pending = queue.get(job.id).await.unwrap().expect("job exists");
    assert_eq!(pending.state, JobState::Pending);
    assert_eq!(pending.attempts, 1);
}

#[tokio::test]
async fn test_unwritable_log_dir_fails_attempts_until_dead() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = open(dir.path()).await;
    let queue = JobQueue::new(db.clone());

    // The log directory path is taken by a regular file.
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"not a directory").unwrap();
    let worker = worker_with(
        JobQueue::new(db.clone()),
        &db,
        CommandExecutor::new(&blocker),
        Duration::from_millis(1),
    );
    let job = queue.enqueue(NewJob::new("true", 2)).await.unwrap();

    assert_eq!(
        worker.poll_once().await,
        PollOutcome::Retried {
            job_id: job.id,
            attempts: 1
        }
    );
    assert_eq!(queue.get(job.id).await.unwrap().unwrap().attempts, 1);
    assert_eq!(
        worker.poll_once().await,
        PollOutcome::Buried {
            job_id: job.id,
            attempts: 2
        }
    );

    let dead = queue.get(job.id).await.unwrap().expect("job exists");
    assert_eq!(dead.state, JobState::Dead);
    assert_eq!(dead.attempts, 2);
    assert!(dead.is_dlq);
    assert_eq!(worker.stats().attempts_failed, 2);
    assert!(blocker.is_file());
}

#[test]
fn test_backoff_ladder() {
    let policy = RetryPolicy::new(2, Duration::from_secs(1));
    let mut job_attempts = Vec::new();
    let mut delays = Vec::new();

    let mut attempts = 0;
    loop {
        let decision = policy.decide(&queuectl::scheduler::Job {
            id: uuid::Uuid::new_v4(),
            command: "false".to_string(),
            state: JobState::Processing,
            attempts,
            max_retries: 3,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            is_dlq: false,
        });
        job_attempts.push(decision.attempts());
        match decision {
            FailureDecision::Retry { attempts: a, delay } => {
                delays.push(delay.as_secs());
                attempts = a;
            }
            FailureDecision::Bury { .. } => break,
        }
    }

    assert_eq!(job_attempts, vec![1, 2, 3]);
    assert_eq!(delays, vec![2, 4]);
    assert_eq!(policy.backoff_delay(3), Duration::from_secs(8));
}

#[tokio::test]
async fn test_permanent_failure_reaches_dlq_at_max_retries() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = open(dir.path()).await;
    let queue = JobQueue::new(db.clone());
    let worker = worker(dir.path(), &db, Duration::from_millis(1));

    let job = queue.enqueue(NewJob::new("exit 3", 3)).await.unwrap();

    let mut attempts_seen = Vec::new();
    loop {
        match worker.poll_once().await {
            PollOutcome::Retried { attempts, .. } => attempts_seen.push(attempts),
            PollOutcome::Buried { attempts, .. } => {
                attempts_seen.push(attempts);
                break;
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    assert_eq!(attempts_seen, vec![1, 2, 3]);
    let dead = queue.get(job.id).await.unwrap().expect("job exists");
    assert_eq!(dead.state, JobState::Dead);
    assert!(dead.is_dlq);
    assert_eq!(queue.dead_letters().await.unwrap().len(), 1);
    assert_eq!(worker.stats().jobs_buried, 1);
}

#[tokio::test]
async fn test_dlq_retry_restores_job() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = open(dir.path()).await;
    let queue = JobQueue::new(db.clone());
    let worker = worker(dir.path(), &db, Duration::from_millis(1));

    let job = queue.enqueue(NewJob::new("false", 1)).await.unwrap();
    assert!(matches!(worker.poll_once().await, PollOutcome::Buried { .. }));

    // Dead jobs are never picked up again on their own.
    assert_eq!(worker.poll_once().await, PollOutcome::Idle);

    let retried = queue.retry_dead(job.id).await.unwrap();
    assert_eq!(retried.state, JobState::Pending);
    assert_eq!(retried.attempts, 0);
    assert!(!retried.is_dlq);
    assert_eq!(retried.command, "false");
    assert_eq!(retried.max_retries, 1);
    assert!(queue.dead_letters().await.unwrap().is_empty());

    assert!(matches!(worker.poll_once().await, PollOutcome::Buried { .. }));
}

async fn race_claims(pollers: usize, jobs: usize) -> (Vec<uuid::Uuid>, usize) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("queuectl.db");

    let setup = Database::connect(&path).await.expect("db");
    let queue = JobQueue::new(setup.clone());
    for i in 0..jobs {
        queue
            .enqueue(NewJob::new(format!("echo {}", i), 3))
            .await
            .unwrap();
    }

    // Each poller gets its own pool, as separate worker processes would.
    let mut handles = Vec::new();
    for _ in 0..pollers {
        let db = Database::connect(&path).await.expect("db");
        handles.push(tokio::spawn(async move {
            JobQueue::new(db).claim_next().await
        }));
    }

    let mut claimed = Vec::new();
    for handle in handles {
        if let Some(job) = handle.await.expect("join").expect("claim should not fail") {
            assert_eq!(job.state, JobState::Processing);
            claimed.push(job.id);
        }
    }

    let processing = queue.stats().await.unwrap().processing;
    (claimed, processing)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claims_never_share_a_job() {
    for (pollers, jobs) in [(4, 2), (4, 4), (3, 8), (5, 0)] {
        let (claimed, processing) = race_claims(pollers, jobs).await;
        let distinct: HashSet<_> = claimed.iter().collect();

        assert_eq!(claimed.len(), pollers.min(jobs), "pollers={} jobs={}", pollers, jobs);
        assert_eq!(distinct.len(), claimed.len());
        assert_eq!(processing, claimed.len());
    }
}

#[tokio::test]
async fn test_claim_order_is_fifo() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = open(dir.path()).await;
    let queue = JobQueue::new(db);

    let first = queue.enqueue(NewJob::new("echo 1", 3)).await.unwrap();
    let second = queue.enqueue(NewJob::new("echo 2", 3)).await.unwrap();

    assert_eq!(queue.claim_next().await.unwrap().map(|j| j.id), Some(first.id));
    assert_eq!(queue.claim_next().await.unwrap().map(|j| j.id), Some(second.id));
    assert!(queue.claim_next().await.unwrap().is_none());
}
