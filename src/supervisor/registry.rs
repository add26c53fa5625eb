//! Worker registry: the file recording the PIDs of the running worker set.
//!
//! The file is the cross-process source of truth for `worker start`,
//! `worker stop` and `status`. Its presence means a worker set is running.

use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::SupervisorError;

/// Handle to the registry file.
#[derive(Debug, Clone)]
pub struct WorkerRegistry {
    path: PathBuf,
}

impl WorkerRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Creates an empty registry, failing if one already exists.
    ///
    /// The existence check and the creation are a single `create_new` open,
    /// so of two concurrent callers exactly one succeeds.
    pub fn claim(&self) -> Result<(), SupervisorError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }

        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(_) => {
                debug!(path = %self.path.display(), "Claimed worker registry");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(SupervisorError::AlreadyRunning(self.path.clone()))
            }
            Err(e) => Err(self.io_error(e)),
        }
    }

    /// Writes `pids`, one per line, replacing the file contents.
    pub fn record(&self, pids: &[u32]) -> Result<(), SupervisorError> {
        let contents: String = pids.iter().map(|pid| format!("{}\n", pid)).collect();
        fs::write(&self.path, contents).map_err(|e| self.io_error(e))
    }

    /// Reads the registered PIDs, or `None` when no registry exists.
    ///
    /// Lines that are not a PID are skipped with a warning.
    pub fn read(&self) -> Result<Option<Vec<u32>>, SupervisorError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };

        let pids = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .filter_map(|line| match line.parse::<u32>() {
                Ok(pid) if pid > 0 => Some(pid),
                _ => {
                    warn!(path = %self.path.display(), line = line, "Ignoring malformed registry line");
                    None
                }
            })
            .collect();

        Ok(Some(pids))
    }

    /// Deletes the registry. Returns whether a file was removed.
    pub fn remove(&self) -> Result<bool, SupervisorError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(self.io_error(e)),
        }
    }

    fn io_error(&self, source: io::Error) -> SupervisorError {
        SupervisorError::Registry {
            path: self.path.clone(),
            source,
        }
    }
}
