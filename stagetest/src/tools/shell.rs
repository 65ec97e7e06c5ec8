//! Running external commands.

use crate::errors::{CommandError, HarnessError};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, info};

/// An external command to run to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShellCommand {
    /// The program to execute.
    pub program: String,
    /// Arguments, passed without shell interpretation.
    pub args: Vec<String>,
    /// Extra environment variables.
    pub env: BTreeMap<String, String>,
    /// Working directory.
    pub working_dir: Option<PathBuf>,
}

impl ShellCommand {
    /// Creates a command for `program`.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Appends an argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets an environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Sets several environment variables.
    #[must_use]
    pub fn envs<'a>(mut self, vars: impl IntoIterator<Item = (&'a String, &'a String)>) -> Self {
        for (k, v) in vars {
            self.env.insert(k.clone(), v.clone());
        }
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

impl fmt::Display for ShellCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Captured output of a successful command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
}

/// Runs `cmd` to completion, capturing its output.
///
/// # Errors
///
/// Returns [`HarnessError::CommandFailed`] with the captured output if the
/// command cannot be started or exits unsuccessfully.
pub async fn run_command(cmd: &ShellCommand) -> Result<CommandOutput, HarnessError> {
    let command_line = cmd.to_string();
    info!(
        command = %command_line,
        dir = ?cmd.working_dir,
        "Running command"
    );

    let mut command = tokio::process::Command::new(&cmd.program);
    command.args(&cmd.args).envs(&cmd.env).kill_on_drop(true);
    if let Some(dir) = &cmd.working_dir {
        command.current_dir(dir);
    }

    let output = command
        .output()
        .await
        .map_err(|e| CommandError::spawn(&command_line, &e))?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if !output.status.success() {
        return Err(CommandError::exited(command_line, output.status.code(), stdout, stderr).into());
    }

    debug!(command = %command_line, stdout_len = stdout.len(), "Command succeeded");
    Ok(CommandOutput { stdout, stderr })
}

/// Quotes `value` for a POSIX shell.
#[must_use]
pub fn shell_quote(value: &str) -> String {
    let safe = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':' | '=' | ','));
    if safe {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_display() {
        let cmd = ShellCommand::new("helm").args(["install", "stable/chart"]).arg("--wait");
        assert_eq!(cmd.to_string(), "helm install stable/chart --wait");
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("stable/kubernetes-dashboard"), "stable/kubernetes-dashboard");
        assert_eq!(shell_quote("/home/me/.helm/env"), "/home/me/.helm/env");
        assert_eq!(shell_quote("has space"), "'has space'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[tokio::test]
    async fn test_run_command_captures_stdout() {
        let cmd = ShellCommand::new("sh")
            .args(["-c", r#"printf %s "$GREETING""#])
            .env("GREETING", "hello");
        let output = run_command(&cmd).await.unwrap();
        assert_eq!(output.stdout, "hello");
    }

    #[tokio::test]
    async fn test_run_command_nonzero_exit() {
        let cmd = ShellCommand::new("sh").args(["-c", "echo oops >&2; exit 3"]);
        let err = run_command(&cmd).await.unwrap_err();
        match err {
            HarnessError::CommandFailed(failed) => {
                assert_eq!(failed.exit_code, Some(3));
                assert_eq!(failed.stderr.trim(), "oops");
                assert!(failed.command.starts_with("sh -c"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_failure_reports_full_command_line() {
        let cmd = ShellCommand::new("sh").args(["-c", "exit 1", "has space"]);
        let err = run_command(&cmd).await.unwrap_err();
        match err {
            HarnessError::CommandFailed(failed) => {
                assert_eq!(failed.command, cmd.to_string());
                assert_eq!(failed.command, "sh -c exit 1 has space");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_run_command_missing_binary() {
        let cmd = ShellCommand::new("definitely-not-a-real-binary-stagetest");
        let err = run_command(&cmd).await.unwrap_err();
        assert!(matches!(
            err,
            HarnessError::CommandFailed(CommandError { exit_code: None, .. })
        ));
    }

    #[tokio::test]
    async fn test_run_command_working_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let cmd = ShellCommand::new("pwd").current_dir(tmp.path());
        let output = run_command(&cmd).await.unwrap();
        let reported = std::path::PathBuf::from(output.stdout.trim());
        assert_eq!(reported.canonicalize().unwrap(), tmp.path().canonicalize().unwrap());
    }
}
