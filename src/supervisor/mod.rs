//! Background worker supervision.
//!
//! `worker start` spawns detached `queuectl worker run` processes and records
//! their PIDs in `<home>/workers.pid`; `worker stop` signals every recorded
//! PID and deletes the file. The registry file, not any in-memory list, is
//! what ties the two invocations together.

pub mod manager;
pub mod process;
pub mod registry;

pub use manager::{StopReport, Supervisor, MAX_WORKERS};
pub use process::{CommandSpawner, ProcessTerminator, SignalTerminator, Termination, WorkerSpawner};
pub use registry::WorkerRegistry;
