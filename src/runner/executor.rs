//! Command executor: runs a job through the host shell.
//!
//! Output of every attempt (stdout and stderr interleaved) is appended to
//! `<log_dir>/<job-id>.log`, so the file accumulates the full history of a
//! job across retries. The directory is created on first write.
//!
//! Execution blocks the calling poller until the command exits. There is no
//! timeout: a hung command holds its poller indefinitely.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use chrono::Utc;
use tokio::process::Command;
use tracing::{debug, error};
use uuid::Uuid;

use super::result::{ExecutionOutcome, ExecutionResult, FailureCause};
use crate::scheduler::Job;

/// Host shell used to interpret job commands.
#[cfg(windows)]
const DEFAULT_SHELL: &str = "cmd";
#[cfg(not(windows))]
const DEFAULT_SHELL: &str = "sh";

/// Flag that makes the shell run its next argument as a command line.
#[cfg(windows)]
const SHELL_COMMAND_FLAG: &str = "/C";
#[cfg(not(windows))]
const SHELL_COMMAND_FLAG: &str = "-c";

/// Runs job commands and records their output.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    /// Directory holding one log file per job.
    log_dir: PathBuf,
    shell: PathBuf,
}

impl CommandExecutor {
    /// Creates a new executor writing logs under `log_dir`.
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            shell: PathBuf::from(DEFAULT_SHELL),
        }
    }

    /// Uses `shell` instead of the host default (`sh`, or `cmd` on Windows).
    pub fn with_shell(mut self, shell: impl Into<PathBuf>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Returns the log directory.
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Returns the log file for a job.
    pub fn log_path(&self, job_id: Uuid) -> PathBuf {
        self.log_dir.join(format!("{}.log", job_id))
    }

    /// Executes one attempt of `job`.
    ///
    /// Never returns an error: a command that cannot be started is reported
    /// as [`FailureCause::Exception`] and noted in the job log when possible.
    pub async fn execute(&self, job: &Job) -> ExecutionResult {
        let log_path = self.log_path(job.id);
        let start = Instant::now();

        let outcome = match self.open_log(&log_path) {
            Ok(mut log) => {
                let outcome = self.run_attempt(job, &mut log).await;
                if let ExecutionOutcome::Failure(FailureCause::Exception { message }) = &outcome {
                    // The log may be the thing that failed; best effort only.
                    let _ = writeln!(log, "!! execution error: {}", message);
                }
                let _ = writeln!(
                    log,
                    "=== attempt {} finished: {} ({} ms) ===",
                    job.next_attempt(),
                    describe(&outcome),
                    start.elapsed().as_millis()
                );
                outcome
            }
            Err(e) => {
                error!(
                    job_id = %job.id,
                    log = %log_path.display(),
                    error = %e,
                    "Failed to open job log"
                );
                ExecutionOutcome::Failure(FailureCause::Exception {
                    message: format!("cannot open log {}: {}", log_path.display(), e),
                })
            }
        };

        ExecutionResult {
            outcome,
            duration: start.elapsed(),
            log_path,
        }
    }

    async fn run_attempt(&self, job: &Job, log: &mut File) -> ExecutionOutcome {
        if let Err(e) = writeln!(
            log,
            "=== attempt {} at {} ===\n$ {}",
            job.next_attempt(),
            Utc::now().to_rfc3339(),
            job.command
        ) {
            return exception(format!("cannot write log: {}", e));
        }

        let (stdout, stderr) = match (log.try_clone(), log.try_clone()) {
            (Ok(out), Ok(err)) => (out, err),
            (Err(e), _) | (_, Err(e)) => {
                return exception(format!("cannot attach log to command: {}", e))
            }
        };

        let mut cmd = Command::new(&self.shell);
        cmd.arg(SHELL_COMMAND_FLAG)
            .arg(&job.command)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(false);

        debug!(job_id = %job.id, command = %job.command, "Spawning job command");

        match cmd.status().await {
            Ok(status) if status.success() => ExecutionOutcome::Success,
            Ok(status) => ExecutionOutcome::Failure(FailureCause::ExitStatus {
                code: status.code(),
            }),
            Err(e) => exception(format!("failed to run '{}': {}", job.command, e)),
        }
    }

    fn open_log(&self, path: &Path) -> std::io::Result<File> {
        fs::create_dir_all(&self.log_dir)?;
        OpenOptions::new().create(true).append(true).open(path)
    }
}

fn exception(message: String) -> ExecutionOutcome {
    ExecutionOutcome::Failure(FailureCause::Exception { message })
}

fn describe(outcome: &ExecutionOutcome) -> String {
    match outcome {
        ExecutionOutcome::Success => "success".to_string(),
        ExecutionOutcome::Failure(cause) => cause.to_string(),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::scheduler::JobState;

    fn job(command: &str, attempts: u32) -> Job {
        let now = Utc::now();
        Job {
            id: Uuid::new_v4(),
            command: command.to_string(),
            state: JobState::Processing,
            attempts,
            max_retries: 3,
            created_at: now,
            updated_at: now,
            is_dlq: false,
        }
    }

    #[tokio::test]
    async fn test_success_captures_combined_output() {
        let dir = tempfile::tempdir().expect("tempdir");
        let executor = CommandExecutor::new(dir.path().join("logs"));
        let job = job("echo out; echo err 1>&2", 0);

        let result = executor.execute(&job).await;

        assert!(result.is_success());
        let log = fs::read_to_string(&result.log_path).expect("log");
        assert!(log.contains("=== attempt 1 at"));
        assert!(log.contains("$ echo out; echo err 1>&2"));
        assert!(log.contains("out\n"));
        assert!(log.contains("err\n"));
        assert!(log.contains("finished: success"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failure_with_code() {
        let dir = tempfile::tempdir().expect("tempdir");
        let executor = CommandExecutor::new(dir.path());

        let result = executor.execute(&job("exit 7", 0)).await;

        assert_eq!(
            result.outcome,
            ExecutionOutcome::Failure(FailureCause::ExitStatus { code: Some(7) })
        );
    }

    #[tokio::test]
    async fn test_log_accumulates_across_attempts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let executor = CommandExecutor::new(dir.path().join("logs"));
        let mut job = job("echo attempt-output; false", 0);

        executor.execute(&job).await;
        job.attempts = 1;
        let result = executor.execute(&job).await;

        let log = fs::read_to_string(&result.log_path).expect("log");
        assert_eq!(log.matches("attempt-output").count(), 2);
        assert!(log.contains("=== attempt 1 at"));
        assert!(log.contains("=== attempt 2 at"));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_noted_in_log() {
        let dir = tempfile::tempdir().expect("tempdir");
        let executor =
            CommandExecutor::new(dir.path()).with_shell(dir.path().join("no-such-shell"));

        let result = executor.execute(&job("true", 0)).await;

        assert!(matches!(
            result.outcome,
            ExecutionOutcome::Failure(FailureCause::Exception { .. })
        ));
        let log = fs::read_to_string(&result.log_path).expect("log");
        assert!(log.contains("=== attempt 1 at"));
        assert!(log.contains("!! execution error: failed to run 'true'"));
        assert!(log.contains("finished: execution error"));
    }

    #[tokio::test]
    async fn test_unwritable_log_dir_is_exception() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "file").expect("write");
        let executor = CommandExecutor::new(&blocker);

        let result = executor.execute(&job("true", 0)).await;

        assert!(matches!(
            result.outcome,
            ExecutionOutcome::Failure(FailureCause::Exception { .. })
        ));
    }
}
