//! queuectl: persistent background job queue for shell commands.
//!
//! Jobs are stored in SQLite, claimed atomically by independent worker
//! processes, retried with exponential backoff and moved to a dead letter
//! queue once their retries are exhausted.

pub mod cli;
pub mod config;
pub mod error;
pub mod runner;
pub mod scheduler;
pub mod storage;
pub mod supervisor;

// Re-export commonly used error types
pub use error::{ConfigError, StoreError, SupervisorError};
