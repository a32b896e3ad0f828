//! The local execution environment: git workspace + process runner.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use automend_core::{ExecutionEnv, Result, TestRun};

use crate::runner::ProcessTestRunner;
use crate::testlog::failing_set;
use crate::workspace::GitWorkspace;

/// [`ExecutionEnv`] over a local git checkout.
///
/// The checkout is exclusively owned by one session for its lifetime;
/// attempts run strictly sequentially against it.
pub struct LocalExecutionEnv {
    workspace: GitWorkspace,
    runner: ProcessTestRunner,
}

impl LocalExecutionEnv {
    /// Open the checkout and configure the run timeout.
    pub async fn open(repo: &str, run_timeout: Duration) -> Result<Self> {
        let workspace = GitWorkspace::open(repo).await?;
        let runner = ProcessTestRunner::new(workspace.root().to_path_buf(), run_timeout);
        Ok(Self { workspace, runner })
    }

    pub fn workspace(&self) -> &GitWorkspace {
        &self.workspace
    }
}

#[async_trait]
impl ExecutionEnv for LocalExecutionEnv {
    async fn run_tests(&self, command: &str) -> Result<TestRun> {
        let result = self.runner.run(command).await?;

        if result.timed_out {
            return Ok(TestRun {
                failing: Default::default(),
                completed: false,
            });
        }

        let failing = failing_set(&result.output, result.exit_code);
        debug!(
            exit_code = result.exit_code,
            failing = failing.len(),
            duration_ms = result.duration_ms,
            "test run complete"
        );
        Ok(TestRun {
            failing,
            completed: true,
        })
    }

    async fn apply_patch(&self, diff: &str) -> Result<bool> {
        self.workspace.apply_diff(diff).await
    }

    async fn rollback(&self) -> Result<()> {
        self.workspace.reset().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Stdio;
    use tempfile::TempDir;
    use tokio::process::Command;

    async fn git(root: &std::path::Path, args: &[&str]) {
        let status = Command::new("git")
            .args(args)
            .current_dir(root)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .expect("git");
        assert!(status.success(), "git {args:?} failed");
    }

    async fn seeded_repo() -> TempDir {
        let dir = TempDir::new().expect("tempdir");
        let root = dir.path();
        git(root, &["init"]).await;
        git(root, &["config", "user.email", "test@automend.dev"]).await;
        git(root, &["config", "user.name", "Automend Test"]).await;
        tokio::fs::write(root.join("check.sh"), "#!/bin/sh\nexit 0\n")
            .await
            .expect("write");
        git(root, &["add", "."]).await;
        git(root, &["commit", "-m", "seed"]).await;
        dir
    }

    #[tokio::test]
    async fn test_green_run_reports_completed_and_empty() {
        let dir = seeded_repo().await;
        let env = LocalExecutionEnv::open(
            dir.path().to_str().expect("utf8 path"),
            Duration::from_secs(10),
        )
        .await
        .expect("open");

        let run = env.run_tests("true").await.expect("run");
        assert!(run.completed);
        assert!(run.failing.is_empty());
    }

    #[tokio::test]
    async fn test_failing_run_yields_identifiers() {
        let dir = seeded_repo().await;
        let env = LocalExecutionEnv::open(
            dir.path().to_str().expect("utf8 path"),
            Duration::from_secs(10),
        )
        .await
        .expect("open");

        let run = env
            .run_tests("echo 'FAILED tests/test_a.py::test_one'; exit 1")
            .await
            .expect("run");
        assert!(run.completed);
        assert!(run.failing.contains("tests/test_a.py::test_one"));
    }

    #[tokio::test]
    async fn test_timeout_marks_run_incomplete() {
        let dir = seeded_repo().await;
        let env = LocalExecutionEnv::open(
            dir.path().to_str().expect("utf8 path"),
            Duration::from_millis(100),
        )
        .await
        .expect("open");

        let run = env.run_tests("sleep 5").await.expect("run");
        assert!(!run.completed);
    }
}
