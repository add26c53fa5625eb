//! Command runner for queued jobs.
//!
//! # Architecture
//!
//! ```text
//! Job.command → sh -c → exit status ─▶ ExecutionOutcome ─▶ Lifecycle
//!                  └─ stdout+stderr ─▶ <log_dir>/<job-id>.log (append)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use queuectl::runner::CommandExecutor;
//!
//! let executor = CommandExecutor::new("/home/me/.queuectl/logs");
//! let result = executor.execute(&job).await;
//! if !result.is_success() {
//!     eprintln!("see {}", result.log_path.display());
//! }
//! ```

pub mod executor;
pub mod result;

pub use executor::CommandExecutor;
pub use result::{ExecutionOutcome, ExecutionResult, FailureCause};
