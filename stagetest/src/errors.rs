//! Error types for the stagetest harness.
//!
//! Every failure is fatal to the run: there are no retries. The variants
//! follow the systems a run talks to so a failing test says which side broke.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for harness operations.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// The infrastructure provisioner failed (apply, destroy, output).
    #[error("Provisioning failed during {operation}: {message}")]
    Provisioning {
        /// The provisioner operation that failed.
        operation: String,
        /// Diagnostic output from the provisioner.
        message: String,
    },

    /// A cluster administration call failed.
    #[error("Cluster operation {operation} failed: {message}")]
    Cluster {
        /// The cluster operation that failed.
        operation: String,
        /// Diagnostic output from the cluster client.
        message: String,
    },

    /// A persisted value was read before any stage wrote it.
    #[error("{0}")]
    MissingValue(#[from] MissingValueError),

    /// An external command exited unsuccessfully.
    #[error("{0}")]
    CommandFailed(#[from] CommandError),

    /// A stage body failed.
    #[error("Stage '{stage}' failed: {source}")]
    StageFailed {
        /// The stage name.
        stage: String,
        /// The error returned by the stage body.
        #[source]
        source: Box<HarnessError>,
    },

    /// A stage name was used twice in one run.
    #[error("Stage '{0}' was already run or deferred in this run")]
    DuplicateStage(String),

    /// One or more release actions failed.
    #[error("{0}")]
    Cleanup(#[from] CleanupError),

    /// Invalid configuration or input.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl HarnessError {
    /// Creates a provisioning error.
    #[must_use]
    pub fn provisioning(operation: impl Into<String>, message: impl ToString) -> Self {
        Self::Provisioning {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    /// Creates a cluster error.
    #[must_use]
    pub fn cluster(operation: impl Into<String>, message: impl ToString) -> Self {
        Self::Cluster {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Wraps a stage body error with the stage name.
    #[must_use]
    pub fn stage_failed(stage: impl Into<String>, source: Self) -> Self {
        Self::StageFailed {
            stage: stage.into(),
            source: Box::new(source),
        }
    }

    /// Returns the innermost error, unwrapping stage failures.
    #[must_use]
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::StageFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Returns the name of the failing stage, if any.
    #[must_use]
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::StageFailed { stage, .. } => Some(stage.as_str()),
            _ => None,
        }
    }
}

/// Error raised when loading a key that was never saved.
///
/// Usually a stage ordering bug, or a prerequisite stage that was skipped
/// before it had ever run in this working directory.
#[derive(Debug, Clone, Error)]
#[error("No value persisted for key '{key}' (expected at {})", .path.display())]
pub struct MissingValueError {
    /// The key that was requested.
    pub key: String,
    /// Where the value was expected on disk.
    pub path: PathBuf,
}

impl MissingValueError {
    /// Creates a new missing value error.
    #[must_use]
    pub fn new(key: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            key: key.into(),
            path: path.into(),
        }
    }
}

/// Error raised when an external command fails.
#[derive(Debug, Clone)]
pub struct CommandError {
    /// The command line as logged.
    pub command: String,
    /// Exit code, or `None` when the process could not be started or was killed.
    pub exit_code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandError {
    /// Creates an error for a command that exited unsuccessfully.
    #[must_use]
    pub fn exited(
        command: impl Into<String>,
        exit_code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Self {
        Self {
            command: command.into(),
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// Creates an error for a command that could not be started.
    #[must_use]
    pub fn spawn(command: impl Into<String>, err: &std::io::Error) -> Self {
        Self {
            command: command.into(),
            exit_code: None,
            stdout: String::new(),
            stderr: format!("failed to start: {err}"),
        }
    }
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Command `{}` ", self.command)?;
        match self.exit_code {
            Some(code) => write!(f, "exited with status {code}")?,
            None => write!(f, "did not exit normally")?,
        }
        let stderr = self.stderr.trim();
        let detail = if stderr.is_empty() { self.stdout.trim() } else { stderr };
        write!(f, ": {detail}")
    }
}

impl std::error::Error for CommandError {}

/// A release action that failed during cleanup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupFailure {
    /// The name the action was registered under.
    pub name: String,
    /// The failure message.
    pub message: String,
}

impl CleanupFailure {
    /// Creates a new cleanup failure.
    #[must_use]
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Error raised when one or more release actions failed.
///
/// Resources named here may have been orphaned and need manual reaping.
#[derive(Debug, Clone)]
pub struct CleanupError {
    /// The failed actions in the order they ran.
    pub failures: Vec<CleanupFailure>,
}

impl CleanupError {
    /// Creates a new cleanup error.
    #[must_use]
    pub fn new(failures: Vec<CleanupFailure>) -> Self {
        Self { failures }
    }
}

impl std::fmt::Display for CleanupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries: Vec<String> = self
            .failures
            .iter()
            .map(|failure| format!("{} ({})", failure.name, failure.message))
            .collect();
        write!(f, "Cleanup failed for: {}", entries.join(", "))
    }
}

impl std::error::Error for CleanupError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_value_message() {
        let err = MissingValueError::new("uniqueID", "/tmp/stages/t/.test-data/uniqueID.json");
        let msg = err.to_string();
        assert!(msg.contains("uniqueID"));
        assert!(msg.contains(".test-data"));
    }

    #[test]
    fn test_command_error_prefers_stderr() {
        let err = CommandError::exited("helm install x", Some(1), "some stdout", "Error: boom\n");
        assert_eq!(
            err.to_string(),
            "Command `helm install x` exited with status 1: Error: boom"
        );
    }

    #[test]
    fn test_command_error_falls_back_to_stdout() {
        let err = CommandError::exited("terraform apply", None, "partial output", "  ");
        assert_eq!(
            err.to_string(),
            "Command `terraform apply` did not exit normally: partial output"
        );
    }

    #[test]
    fn test_stage_failed_root_cause() {
        let inner = HarnessError::cluster("create serviceaccount", "forbidden");
        let err = HarnessError::stage_failed("create_test_service_account", inner);

        assert_eq!(err.stage(), Some("create_test_service_account"));
        assert!(matches!(err.root_cause(), HarnessError::Cluster { .. }));
        assert!(err.to_string().contains("forbidden"));
    }

    #[test]
    fn test_cleanup_error_lists_failures() {
        let err = CleanupError::new(vec![
            CleanupFailure::new("cleanup", "destroy failed"),
            CleanupFailure::new("delete namespace", "timeout"),
        ]);
        let msg = err.to_string();
        assert!(msg.contains("cleanup (destroy failed)"));
        assert!(msg.contains("delete namespace (timeout)"));
    }
}
