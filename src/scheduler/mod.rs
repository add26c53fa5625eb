//! Job scheduling: the job model, the SQLite-backed queue, the lifecycle
//! engine and the poller.
//!
//! - **JobQueue**: durable job store with an atomic claim
//! - **Lifecycle**: retry decisions, exponential backoff and DLQ routing
//! - **Worker**: single poller that claims, executes and records jobs
//!
//! # Architecture
//!
//! ```text
//!                      ┌──────────────┐
//!                      │ queuectl CLI │
//!                      │  (enqueue)   │
//!                      └──────┬───────┘
//!                             │
//!                      ┌──────▼───────┐
//!                      │    SQLite    │
//!                      │  jobs table  │
//!                      └──────┬───────┘
//!                             │ atomic claim
//!         ┌───────────────────┼───────────────────┐
//!         │                   │                   │
//!         ▼                   ▼                   ▼
//!    ┌─────────┐         ┌─────────┐         ┌─────────┐
//!    │ Worker 1│         │ Worker 2│         │ Worker N│
//!    └─────────┘         └─────────┘         └─────────┘
//!     (process)           (process)           (process)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use queuectl::scheduler::{JobQueue, NewJob, Worker, WorkerConfig};
//! use queuectl::runner::CommandExecutor;
//! use queuectl::storage::{ConfigStore, Database};
//!
//! let db = Database::connect(&home.join("queuectl.db")).await?;
//! let queue = JobQueue::new(db.clone());
//! queue.enqueue(NewJob::new("echo hello", 3)).await?;
//!
//! let worker = Worker::new(
//!     "worker-1",
//!     queue,
//!     ConfigStore::new(db.pool().clone()),
//!     CommandExecutor::new(home.join("logs")),
//!     WorkerConfig::default(),
//! );
//! worker.run(shutdown_rx).await;
//! ```
//!
//! # Reliability
//!
//! - **Atomic claim**: a single conditional `UPDATE ... RETURNING` moves the
//!   oldest pending job to processing; concurrent pollers never share a job
//! - **Guarded transitions**: every state change checks the expected state
//! - **Dead letter queue**: jobs that exhaust `max_retries` are moved to the
//!   DLQ and can be re-queued with `dlq retry`
//! - **No lease**: a job whose worker dies mid-execution stays in processing

pub mod job;
pub mod lifecycle;
pub mod queue;
pub mod worker;

pub use job::{Job, JobState, NewJob};
pub use lifecycle::{FailureDecision, Lifecycle, RetryPolicy};
pub use queue::{JobQueue, QueueStats};
pub use worker::{PollOutcome, Worker, WorkerConfig, WorkerStats};
