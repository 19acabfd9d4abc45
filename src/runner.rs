//! Command runner
//!
//! Runs external OS commands and captures their output. A non-zero exit code
//! is data, not an error, and an expired timeout is reported as an outcome.
//! Argument values and raw output are never logged: profile names, server
//! addresses and dial arguments can carry sensitive material.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, warn};

/// Hide the console window of spawned processes on Windows
#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Captured output of a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Trimmed stdout and stderr joined for display
    pub fn combined(&self) -> String {
        [self.stdout.trim(), self.stderr.trim()]
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// What happened when a command was run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The process ran to completion (any exit code)
    Completed(CommandOutput),
    /// The process did not finish in time and was killed
    TimedOut { after: Duration },
    /// The process could not be started at all
    SpawnFailed(String),
}

impl CommandOutcome {
    pub fn output(&self) -> Option<&CommandOutput> {
        match self {
            CommandOutcome::Completed(output) => Some(output),
            _ => None,
        }
    }
}

/// Executes external commands on behalf of the repository
///
/// Implementations must never panic or return early on a failing command;
/// every failure mode is a [`CommandOutcome`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String], timeout: Duration) -> CommandOutcome;
}

/// Runner backed by real OS processes
#[derive(Debug, Clone, Default)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[String], timeout: Duration) -> CommandOutcome {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(windows)]
        {
            command.creation_flags(CREATE_NO_WINDOW);
        }

        debug!("Running {} ({} args, timeout {:?})", program, args.len(), timeout);
        let started = Instant::now();

        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to start {}: {}", program, e);
                return CommandOutcome::SpawnFailed(format!("Failed to start {}: {}", program, e));
            }
        };

        // Dropping the wait future on timeout drops the child, which kills it
        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let exit_code = output.status.code();
                debug!(
                    "{} finished with exit code {:?} in {:?}",
                    program,
                    exit_code,
                    started.elapsed()
                );
                CommandOutcome::Completed(CommandOutput {
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                    exit_code,
                })
            }
            Ok(Err(e)) => {
                warn!("Failed to collect output of {}: {}", program, e);
                CommandOutcome::SpawnFailed(format!("Failed to collect output of {}: {}", program, e))
            }
            Err(_) => {
                warn!("{} timed out after {:?}", program, timeout);
                CommandOutcome::TimedOut { after: timeout }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combined_skips_empty_streams() {
        let output = CommandOutput {
            stdout: "  done \n".to_string(),
            stderr: String::new(),
            exit_code: Some(0),
        };
        assert_eq!(output.combined(), "done");
        assert!(output.success());

        let output = CommandOutput {
            stdout: "partial".to_string(),
            stderr: "boom".to_string(),
            exit_code: Some(1),
        };
        assert_eq!(output.combined(), "partial\nboom");
        assert!(!output.success());
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_failure() {
        let runner = SystemRunner::new();
        let outcome = runner
            .run("vpnctl-definitely-not-a-binary", &[], Duration::from_secs(5))
            .await;
        assert!(matches!(outcome, CommandOutcome::SpawnFailed(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_data() {
        let runner = SystemRunner::new();
        let args = vec!["-c".to_string(), "echo out; echo err >&2; exit 3".to_string()];
        let outcome = runner.run("sh", &args, Duration::from_secs(10)).await;

        let output = outcome.output().expect("completed");
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_is_reported() {
        let runner = SystemRunner::new();
        let args = vec!["5".to_string()];
        let started = Instant::now();
        let outcome = runner.run("sleep", &args, Duration::from_millis(200)).await;

        assert_eq!(
            outcome,
            CommandOutcome::TimedOut {
                after: Duration::from_millis(200)
            }
        );
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
