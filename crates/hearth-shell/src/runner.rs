//! One-shot execution of external command-line tools

use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, trace};

#[derive(Error, Debug)]
pub enum ShellError {
    #[error("{program} is not installed")]
    NotFound { program: String },
    #[error("{program} timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },
    #[error("Failed to run {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl ShellError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, ShellError>;

/// Captured result of a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when the process was killed by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Successful run with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed run with the given exit code and stderr
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// stdout and stderr joined, for tools that report results on either stream
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Runs external tools. Every invocation carries an explicit timeout.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`, killing it if it outlives `timeout`
    async fn run(&self, program: &str, args: &[&str], timeout: Duration) -> Result<CommandOutput>;

    /// Whether `program` can be found on this host
    fn is_available(&self, program: &str) -> bool;
}

pub type SharedRunner = Arc<dyn CommandRunner>;

/// Runs tools as real child processes via tokio
#[derive(Debug, Clone, Default)]
pub struct SystemCommandRunner;

impl SystemCommandRunner {
    pub fn new() -> Self {
        Self
    }

    pub fn shared() -> SharedRunner {
        Arc::new(Self)
    }
}

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, program: &str, args: &[&str], limit: Duration) -> Result<CommandOutput> {
        debug!(program = program, args = ?args, timeout = ?limit, "Running command");

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = timeout(limit, child)
            .await
            .map_err(|_| ShellError::Timeout {
                program: program.to_string(),
                timeout: limit,
            })?
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ShellError::NotFound {
                        program: program.to_string(),
                    }
                } else {
                    ShellError::Io {
                        program: program.to_string(),
                        source: e,
                    }
                }
            })?;

        let result = CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };

        trace!(program = program, stdout = %result.stdout, stderr = %result.stderr, "Command finished");
        Ok(result)
    }

    fn is_available(&self, program: &str) -> bool {
        which::which(program)
            .inspect_err(|e| trace!(program = program, error = %e, "Tool lookup failed"))
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combined_output() {
        let out = CommandOutput {
            status: Some(1),
            stdout: "a".into(),
            stderr: "b".into(),
        };
        assert_eq!(out.combined(), "a\nb");
        assert_eq!(CommandOutput::ok("x").combined(), "x");
        assert_eq!(CommandOutput::failed(2, "boom").combined(), "boom");
    }

    #[tokio::test]
    async fn test_missing_program_is_not_found() {
        let runner = SystemCommandRunner::new();
        let err = runner
            .run("hearth-definitely-not-a-real-tool", &[], Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(!runner.is_available("hearth-definitely-not-a-real-tool"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_captures_stdout() {
        let runner = SystemCommandRunner::new();
        let out = runner
            .run("sh", &["-c", "echo hello"], Duration::from_secs(5))
            .await
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_slow_command_times_out() {
        let runner = SystemCommandRunner::new();
        let started = std::time::Instant::now();
        let err = runner
            .run("sh", &["-c", "sleep 5"], Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
