//! Outcomes of running a job's command.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

/// Why an attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureCause {
    /// The command ran and exited unsuccessfully. `code` is `None` when the
    /// process was killed by a signal.
    ExitStatus { code: Option<i32> },
    /// The command could not be run at all (spawn or log I/O failure).
    Exception { message: String },
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::ExitStatus { code: Some(code) } => write!(f, "exited with code {}", code),
            FailureCause::ExitStatus { code: None } => write!(f, "terminated by signal"),
            FailureCause::Exception { message } => write!(f, "execution error: {}", message),
        }
    }
}

/// Success or failure of one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Success,
    Failure(FailureCause),
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success)
    }
}

/// Result of a single execution attempt.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub outcome: ExecutionOutcome,
    /// Wall-clock time spent in the command.
    pub duration: Duration,
    /// Log file the attempt's output was appended to.
    pub log_path: PathBuf,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_cause_display() {
        assert_eq!(
            FailureCause::ExitStatus { code: Some(2) }.to_string(),
            "exited with code 2"
        );
        assert_eq!(
            FailureCause::ExitStatus { code: None }.to_string(),
            "terminated by signal"
        );
        assert!(FailureCause::Exception {
            message: "No such file".to_string()
        }
        .to_string()
        .contains("No such file"));
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_value(ExecutionOutcome::Failure(FailureCause::ExitStatus {
            code: Some(1),
        }))
        .expect("serialize");
        assert_eq!(json["status"], "failure");
        assert_eq!(json["kind"], "exit_status");
        assert_eq!(json["code"], 1);
    }
}
