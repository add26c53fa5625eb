//! Command-line interface for queuectl.
//!
//! Provides commands for enqueueing jobs, supervising workers, inspecting
//! the queue and the dead letter queue, and editing settings.

mod commands;

pub use commands::{parse_cli, run_with_cli, Cli};
