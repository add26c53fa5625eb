//! Spawning and terminating worker processes.
//!
//! Both directions sit behind a trait so the supervisor can be driven by
//! fakes in tests. The production backends are [`CommandSpawner`], which
//! launches detached `queuectl worker run` processes, and
//! [`SignalTerminator`], which sends SIGTERM on unix and calls `taskkill`
//! on Windows.

use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use tracing::debug;

use crate::config::Settings;
use crate::error::SupervisorError;

/// Starts one background worker process and returns its PID.
pub trait WorkerSpawner: Send + Sync {
    fn spawn(&self) -> io::Result<u32>;
}

/// Result of asking a process to terminate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The termination request was delivered.
    Stopped,
    /// No live process had that PID.
    NotRunning,
}

/// Requests graceful termination of a process by PID.
pub trait ProcessTerminator: Send + Sync {
    fn terminate(&self, pid: u32) -> Result<Termination, SupervisorError>;
}

/// Spawns a fixed command line as a detached background process.
///
/// The child leads a new session (a detached process on Windows), so it has
/// no controlling terminal and outlives the shell that ran `worker start`.
/// stdin is closed and stdout/stderr are appended to a shared log file.
#[derive(Debug, Clone)]
pub struct CommandSpawner {
    program: PathBuf,
    args: Vec<OsString>,
    log_path: PathBuf,
}

impl CommandSpawner {
    pub fn new(
        program: impl Into<PathBuf>,
        args: impl IntoIterator<Item = impl Into<OsString>>,
        log_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            log_path: log_path.into(),
        }
    }

    /// Re-executes the running binary as `queuectl --home <home> worker run`.
    pub fn current_exe(settings: &Settings, log_level: &str) -> io::Result<Self> {
        let program = std::env::current_exe()?;
        let args: Vec<OsString> = vec![
            "--home".into(),
            settings.home().as_os_str().to_os_string(),
            "--log-level".into(),
            log_level.into(),
            "worker".into(),
            "run".into(),
            "--poll-interval-ms".into(),
            settings.poll_interval().as_millis().to_string().into(),
        ];
        Ok(Self::new(program, args, settings.worker_log_path()))
    }

    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    fn open_log(&self) -> io::Result<File> {
        if let Some(parent) = self.log_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
    }
}

impl WorkerSpawner for CommandSpawner {
    fn spawn(&self) -> io::Result<u32> {
        let log = self.open_log()?;

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log));
        detach(&mut cmd);

        // The child is not waited on; it outlives this process.
        let child = cmd.spawn()?;
        let pid = child.id();
        debug!(pid = pid, program = %self.program.display(), "Spawned worker process");
        Ok(pid)
    }
}

#[cfg(unix)]
fn detach(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    // SAFETY: setsid is async-signal-safe and touches no parent state.
    unsafe {
        cmd.pre_exec(|| {
            nix::unistd::setsid()
                .map(|_| ())
                .map_err(io::Error::from)
        });
    }
}

#[cfg(windows)]
fn detach(cmd: &mut Command) {
    use std::os::windows::process::CommandExt;
    const DETACHED_PROCESS: u32 = 0x0000_0008;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    cmd.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
}

#[cfg(not(any(unix, windows)))]
fn detach(_cmd: &mut Command) {}

/// Platform termination backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalTerminator;

#[cfg(unix)]
impl ProcessTerminator for SignalTerminator {
    fn terminate(&self, pid: u32) -> Result<Termination, SupervisorError> {
        use nix::errno::Errno;
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        // 0 and negative values address process groups, never a single worker.
        let raw = match i32::try_from(pid) {
            Ok(raw) if raw > 0 => raw,
            _ => {
                return Err(SupervisorError::Terminate {
                    pid,
                    reason: "not a valid process id".to_string(),
                })
            }
        };

        match signal::kill(Pid::from_raw(raw), Signal::SIGTERM) {
            Ok(()) => Ok(Termination::Stopped),
            Err(Errno::ESRCH) => Ok(Termination::NotRunning),
            Err(e) => Err(SupervisorError::Terminate {
                pid,
                reason: e.to_string(),
            }),
        }
    }
}

#[cfg(windows)]
impl ProcessTerminator for SignalTerminator {
    fn terminate(&self, pid: u32) -> Result<Termination, SupervisorError> {
        // taskkill exits with 128 when the PID does not exist.
        const NOT_FOUND: i32 = 128;

        let output = Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/F"])
            .stdin(Stdio::null())
            .output()
            .map_err(|e| SupervisorError::Terminate {
                pid,
                reason: e.to_string(),
            })?;

        match output.status.code() {
            Some(0) => Ok(Termination::Stopped),
            Some(NOT_FOUND) => Ok(Termination::NotRunning),
            _ => Err(SupervisorError::Terminate {
                pid,
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
        }
    }
}
