//! Git-backed working tree: patch application and rollback.
//!
//! Rollback discards every uncommitted change (`git reset --hard` plus
//! `git clean -fd`), so each attempt starts from the committed state with no
//! compounding residue. Both operations are idempotent on a clean tree.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, warn};

use automend_core::{AutomendError, Result};

/// Name of the transient patch file written during apply (removed after).
const PATCH_FILENAME: &str = ".automend.patch";

/// A git repository checkout owned by one session.
#[derive(Debug, Clone)]
pub struct GitWorkspace {
    root: PathBuf,
}

impl GitWorkspace {
    /// Bind to an existing checkout and verify it is a git repository.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.exists() {
            return Err(AutomendError::EnvironmentUnavailable(format!(
                "repository path does not exist: {}",
                root.display()
            )));
        }

        let probe = git(&root, &["rev-parse", "--git-dir"]).await?;
        if !probe.success {
            return Err(AutomendError::EnvironmentUnavailable(format!(
                "not a git repository: {}",
                root.display()
            )));
        }

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Apply a unified diff. `Ok(false)` means git rejected it structurally
    /// (conflicting context); the tree is left untouched in that case
    /// because `git apply` is atomic without `--reject`.
    pub async fn apply_diff(&self, diff: &str) -> Result<bool> {
        let patch_file = self.root.join(PATCH_FILENAME);
        tokio::fs::write(&patch_file, diff).await?;

        let result = git(
            &self.root,
            &["apply", "--whitespace=fix", PATCH_FILENAME],
        )
        .await;

        // The patch file must not survive into the test run.
        let _ = tokio::fs::remove_file(&patch_file).await;

        let output = result?;
        if output.success {
            debug!(root = %self.root.display(), "patch applied");
        } else {
            warn!(root = %self.root.display(), stderr = %output.stderr, "patch did not apply");
        }
        Ok(output.success)
    }

    /// Reset the tree to the committed state and drop untracked files.
    pub async fn reset(&self) -> Result<()> {
        let reset = git(&self.root, &["reset", "--hard"]).await?;
        if !reset.success {
            return Err(AutomendError::RollbackFailed(reset.stderr));
        }

        let clean = git(&self.root, &["clean", "-fd"]).await?;
        if !clean.success {
            return Err(AutomendError::RollbackFailed(clean.stderr));
        }

        debug!(root = %self.root.display(), "working tree reset");
        Ok(())
    }
}

struct GitOutput {
    success: bool,
    stderr: String,
}

async fn git(root: &Path, args: &[&str]) -> Result<GitOutput> {
    let output = Command::new("git")
        .args(args)
        .current_dir(root)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| {
            AutomendError::EnvironmentUnavailable(format!("failed to run git: {e}"))
        })?;

    Ok(GitOutput {
        success: output.status.success(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}
