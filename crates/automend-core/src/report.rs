//! Session reporting artifacts.
//!
//! Two consumers:
//! - humans get a Markdown diagnostic report (what happened, why it stopped)
//! - tooling gets `session.json` plus a `session.digest` integrity file

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::domain::session::AttemptStatus;
use crate::domain::{AutomendError, Result, Session, StopReason};
use crate::verify::Verdict;

/// Hex-encoded SHA-256 of a byte slice.
pub fn content_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Render the human-readable diagnostic report.
pub fn render_diagnostic_md(session: &Session) -> String {
    let mut md = String::new();
    let _ = writeln!(md, "# Repair session {}", session.id);
    let _ = writeln!(md);
    let _ = writeln!(md, "- **Repository:** {}", session.config.repo);
    let _ = writeln!(md, "- **Test command:** `{}`", session.config.test_command);
    let _ = writeln!(
        md,
        "- **Stop reason:** {}",
        session
            .stop_reason
            .as_ref()
            .map(StopReason::label)
            .unwrap_or("unresolved")
    );
    let _ = writeln!(
        md,
        "- **Attempts:** {}/{}",
        session.attempts_used(),
        session.config.max_attempts
    );
    if let Some(ms) = session.duration_ms() {
        let _ = writeln!(md, "- **Duration:** {:.1}s", ms as f64 / 1000.0);
    }
    if let Some(reference) = &session.submission_ref {
        let _ = writeln!(md, "- **Submission:** {reference}");
    }
    if let Some(err) = &session.submission_error {
        let _ = writeln!(md, "- **Submission error:** {err}");
    }

    if let Some(flaky) = &session.flaky_report {
        let _ = writeln!(md);
        let _ = writeln!(md, "## Baseline stability");
        let _ = writeln!(md);
        for probe in &flaky.probes {
            let status = if !probe.completed {
                "did not complete".to_string()
            } else if probe.failing.is_empty() {
                "all tests passed".to_string()
            } else {
                format!(
                    "{} failing: {}",
                    probe.failing.len(),
                    probe.failing.iter().cloned().collect::<Vec<_>>().join(", ")
                )
            };
            let _ = writeln!(md, "- run {}: {status}", probe.run);
        }
        if flaky.flaky {
            let _ = writeln!(md);
            let _ = writeln!(
                md,
                "The failure signal is non-deterministic; a before/after \
                 comparison cannot verify any fix."
            );
        }
    }

    for attempt in &session.attempts {
        let _ = writeln!(md);
        let _ = writeln!(md, "## Attempt {}", attempt.index);
        let _ = writeln!(md);
        let status = match attempt.status {
            AttemptStatus::NoProposal => "no proposal produced",
            AttemptStatus::PolicyRejected => "rejected by policy",
            AttemptStatus::FailedToApply => "patch did not apply",
            AttemptStatus::Verified => match &attempt.verdict {
                Some(Verdict::Passed) => "verified fix",
                Some(Verdict::Regressed { .. }) => "regressed",
                Some(Verdict::Unchanged { .. }) => "no progress",
                Some(Verdict::ExecutionFailed) => "execution failed",
                None => "verified (no verdict recorded)",
            },
        };
        let _ = writeln!(md, "- **Status:** {status}");
        if attempt.rolled_back {
            let _ = writeln!(md, "- **Working tree:** rolled back");
        }
        if let Some(rationale) = &attempt.rationale {
            let _ = writeln!(md, "- **Rationale:** {rationale}");
        }
        if !attempt.violations.is_empty() {
            let _ = writeln!(md, "- **Policy findings:**");
            for violation in &attempt.violations {
                let scope = match (&violation.path, violation.line) {
                    (Some(path), Some(line)) => format!(" ({path}:{line})"),
                    (Some(path), None) => format!(" ({path})"),
                    _ => String::new(),
                };
                let level = if violation.blocking { "block" } else { "warn" };
                let _ = writeln!(md, "  - [{level}] {}{scope}", violation.detail);
            }
        }
        if let Some(Verdict::Regressed { new_failures }) = &attempt.verdict {
            let _ = writeln!(
                md,
                "- **New failures:** {}",
                new_failures.iter().cloned().collect::<Vec<_>>().join(", ")
            );
        }
    }

    md
}

/// Persist `<dir>/<session_id>/session.json` and `session.digest`.
pub fn write_session_artifact(session: &Session, dir: &Path) -> Result<PathBuf> {
    let run_dir = dir.join(session.id.to_string());
    std::fs::create_dir_all(&run_dir)?;

    let artifact_path = run_dir.join("session.json");
    let digest_path = run_dir.join("session.digest");
    let json = serde_json::to_vec_pretty(session)?;
    let digest = content_digest(&json);

    std::fs::write(&artifact_path, &json)?;
    std::fs::write(&digest_path, digest.as_bytes())?;

    Ok(artifact_path)
}

/// Read back `<dir>/<session_id>/session.json`, verifying integrity.
pub fn read_session_artifact(session_id: &str, dir: &Path) -> Result<Session> {
    let run_dir = dir.join(session_id);
    let json = std::fs::read(run_dir.join("session.json"))?;
    let digest = std::fs::read_to_string(run_dir.join("session.digest"))?;

    let actual = content_digest(&json);
    if digest.trim() != actual {
        return Err(AutomendError::DigestMismatch {
            expected: digest.trim().to_string(),
            actual,
        });
    }

    Ok(serde_json::from_slice(&json)?)
}
