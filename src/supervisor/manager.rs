//! Worker supervisor: starts and stops the background worker set.

use serde::Serialize;
use tracing::{info, warn};

use super::process::{ProcessTerminator, Termination, WorkerSpawner};
use super::registry::WorkerRegistry;
use crate::error::SupervisorError;

/// Largest worker set a single `start` accepts.
pub const MAX_WORKERS: usize = 64;

/// Result of [`Supervisor::stop`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StopReport {
    /// No registry existed.
    NothingRunning,
    /// The registry listed `requested` PIDs, of which `stopped` were live.
    Stopped { requested: usize, stopped: usize },
}

/// Owns the worker registry and the process backends.
pub struct Supervisor {
    registry: WorkerRegistry,
    spawner: Box<dyn WorkerSpawner>,
    terminator: Box<dyn ProcessTerminator>,
}

impl Supervisor {
    pub fn new(
        registry: WorkerRegistry,
        spawner: impl WorkerSpawner + 'static,
        terminator: impl ProcessTerminator + 'static,
    ) -> Self {
        Self {
            registry,
            spawner: Box::new(spawner),
            terminator: Box::new(terminator),
        }
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    /// PIDs of the registered worker set, empty when none is running.
    pub fn running(&self) -> Result<Vec<u32>, SupervisorError> {
        Ok(self.registry.read()?.unwrap_or_default())
    }

    /// Spawns `count` detached workers and records their PIDs.
    ///
    /// `count` must be in `1..=MAX_WORKERS`. Rejected with
    /// [`SupervisorError::AlreadyRunning`] if a registry exists; nothing is
    /// spawned and the registry is left untouched. If a spawn fails
    /// part-way, the workers already started are terminated and the registry
    /// is removed.
    pub fn start(&self, count: usize) -> Result<Vec<u32>, SupervisorError> {
        if count == 0 || count > MAX_WORKERS {
            return Err(SupervisorError::InvalidCount { max: MAX_WORKERS });
        }

        self.registry.claim()?;

        let mut pids = Vec::new();
        for index in 0..count {
            match self.spawner.spawn() {
                Ok(pid) => {
                    info!(worker = index + 1, pid = pid, "Started worker");
                    pids.push(pid);
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        started = pids.len(),
                        requested = count,
                        "Worker spawn failed, rolling back"
                    );
                    self.rollback(&pids);
                    return Err(SupervisorError::Spawn(e));
                }
            }
        }

        if let Err(e) = self.registry.record(&pids) {
            self.rollback(&pids);
            return Err(e);
        }

        info!(count = pids.len(), registry = %self.registry.path().display(), "Workers started");
        Ok(pids)
    }

    /// Terminates every registered worker and deletes the registry.
    ///
    /// PIDs that no longer resolve to a live process are counted as not
    /// stopped. The registry is removed whatever the individual results,
    /// including when it cannot be read. A removal failure after signalling
    /// is reported as [`SupervisorError::StopIncomplete`] with the counts.
    pub fn stop(&self) -> Result<StopReport, SupervisorError> {
        let pids = match self.registry.read() {
            Ok(Some(pids)) => pids,
            Ok(None) => {
                info!("No workers running");
                return Ok(StopReport::NothingRunning);
            }
            Err(e) => {
                warn!(error = %e, "Unreadable worker registry, removing it");
                if let Err(remove_err) = self.registry.remove() {
                    warn!(error = %remove_err, "Failed to remove worker registry");
                }
                return Err(e);
            }
        };

        let mut stopped = 0;
        for &pid in &pids {
            match self.terminator.terminate(pid) {
                Ok(Termination::Stopped) => {
                    info!(pid = pid, "Stopped worker");
                    stopped += 1;
                }
                Ok(Termination::NotRunning) => {
                    warn!(pid = pid, "Worker was not running");
                }
                Err(e) => {
                    warn!(pid = pid, error = %e, "Failed to stop worker");
                }
            }
        }

        if let Err(e) = self.registry.remove() {
            return Err(SupervisorError::StopIncomplete {
                requested: pids.len(),
                stopped,
                source: Box::new(e),
            });
        }

        Ok(StopReport::Stopped {
            requested: pids.len(),
            stopped,
        })
    }

    fn rollback(&self, pids: &[u32]) {
        for &pid in pids {
            if let Err(e) = self.terminator.terminate(pid) {
                warn!(pid = pid, error = %e, "Failed to terminate worker during rollback");
            }
        }
        if let Err(e) = self.registry.remove() {
            warn!(error = %e, "Failed to remove worker registry during rollback");
        }
    }
}
