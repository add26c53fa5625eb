//! Runtime settings: where queuectl keeps its state.
//!
//! Everything lives under one home directory:
//!
//! ```text
//! <home>/
//!   queuectl.db      job store and config KV
//!   logs/<id>.log    per-job output
//!   workers.pid      worker registry
//!   workers.log      stdout/stderr of detached workers
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the home directory.
pub const HOME_ENV: &str = "QUEUECTL_HOME";

/// Directory name used under the user's home when nothing else is set.
pub const DEFAULT_HOME_DIR: &str = ".queuectl";

/// Default sleep between polls of an idle worker.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Paths and timings shared by every command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    home: PathBuf,
    poll_interval: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self::new(default_home())
    }
}

impl Settings {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Uses `home` when given, otherwise the default location.
    pub fn resolve(home: Option<PathBuf>) -> Self {
        home.map(Self::new).unwrap_or_default()
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn db_path(&self) -> PathBuf {
        self.home.join("queuectl.db")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.home.join("logs")
    }

    pub fn registry_path(&self) -> PathBuf {
        self.home.join("workers.pid")
    }

    pub fn worker_log_path(&self) -> PathBuf {
        self.home.join("workers.log")
    }
}

/// `~/.queuectl`, or `./.queuectl` when the home directory is unknown.
pub fn default_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DEFAULT_HOME_DIR)
}
