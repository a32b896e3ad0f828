//! Process-based test command execution with a hard timeout.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::{debug, warn};

use automend_core::{AutomendError, Result};

/// Captured result of one test command execution.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code; -1 when terminated by signal or timeout.
    pub exit_code: i32,

    /// Combined stdout + stderr.
    pub output: String,

    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,

    /// True when the run hit the timeout and was killed.
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }
}

/// Runs the opaque test command via the shell inside a working directory.
#[derive(Debug, Clone)]
pub struct ProcessTestRunner {
    workdir: PathBuf,
    timeout: Duration,
}

impl ProcessTestRunner {
    pub fn new(workdir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            workdir: workdir.into(),
            timeout,
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Execute the command, capturing combined output.
    ///
    /// A timeout kills the process and is reported via `timed_out`, not as
    /// an error; `Err` is reserved for failure to launch at all.
    pub async fn run(&self, command: &str) -> Result<CommandOutput> {
        let start = Instant::now();
        debug!(command, workdir = %self.workdir.display(), "running test command");

        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.workdir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                AutomendError::EnvironmentUnavailable(format!("failed to spawn test command: {e}"))
            })?;

        let waited = tokio::time::timeout(self.timeout, child.wait_with_output()).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match waited {
            Ok(Ok(output)) => {
                let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
                combined.push_str(&String::from_utf8_lossy(&output.stderr));
                Ok(CommandOutput {
                    exit_code: output.status.code().unwrap_or(-1),
                    output: combined,
                    duration_ms,
                    timed_out: false,
                })
            }
            Ok(Err(e)) => Err(AutomendError::EnvironmentUnavailable(format!(
                "test command wait failed: {e}"
            ))),
            Err(_) => {
                // kill_on_drop tears the child down with the dropped future.
                warn!(
                    command,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "test command timed out"
                );
                Ok(CommandOutput {
                    exit_code: -1,
                    output: String::new(),
                    duration_ms,
                    timed_out: true,
                })
            }
        }
    }
}
