//! Session and attempt records.
//!
//! A [`Session`] is the audit trail of one repair run: the flaky-check
//! record, the ordered attempt history, and the terminal [`StopReason`].
//! Attempts are write-once; nothing is discarded on any transition, even on
//! the path to success.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{AutomendError, Result};
use super::policy::{PolicyConfig, PolicyViolation};
use crate::verify::Verdict;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Session-level inputs, fixed at construction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    /// Opaque repository handle, forwarded to collaborators.
    pub repo: String,

    /// Opaque test command.
    pub test_command: String,

    /// Maximum repair attempts (>= 1).
    pub max_attempts: u32,

    /// Baseline repetitions for the flaky check (>= 2).
    pub flaky_runs: u32,

    /// Timeout for one proposal request, in milliseconds.
    pub proposal_timeout_ms: u64,

    /// Admissibility rules for proposed patches.
    pub policy: PolicyConfig,
}

impl SessionConfig {
    pub fn new(repo: impl Into<String>, test_command: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            test_command: test_command.into(),
            max_attempts: 2,
            flaky_runs: 3,
            proposal_timeout_ms: 120_000,
            policy: PolicyConfig::default(),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_flaky_runs(mut self, flaky_runs: u32) -> Self {
        self.flaky_runs = flaky_runs;
        self
    }

    pub fn with_policy(mut self, policy: PolicyConfig) -> Self {
        self.policy = policy;
        self
    }

    /// Check the configured bounds.
    pub fn validate(&self) -> Result<()> {
        if self.repo.trim().is_empty() {
            return Err(AutomendError::InvalidConfig("repo must not be empty".into()));
        }
        if self.test_command.trim().is_empty() {
            return Err(AutomendError::InvalidConfig(
                "test_command must not be empty".into(),
            ));
        }
        if self.max_attempts < 1 {
            return Err(AutomendError::InvalidConfig(
                "max_attempts must be >= 1".into(),
            ));
        }
        if self.flaky_runs < 2 {
            return Err(AutomendError::InvalidConfig(
                "flaky_runs must be >= 2".into(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Attempts
// ---------------------------------------------------------------------------

/// How an attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    /// The proposal source produced no diff (absence or timeout).
    NoProposal,

    /// Policy violations rejected the diff before any sandbox use.
    PolicyRejected,

    /// The diff was structurally rejected by the apply step.
    FailedToApply,

    /// The diff was applied and the verification gate produced a verdict.
    Verified,
}

/// One repair iteration. Append-only once recorded on the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    /// Ordinal index, starting at 1.
    pub index: u32,

    /// How the attempt ended.
    pub status: AttemptStatus,

    /// Rationale text from the proposal source, kept for the audit trail.
    pub rationale: Option<String>,

    /// The proposed diff; absent when the proposal failed.
    pub diff: Option<String>,

    /// Violations found by the policy gate (blocking and warning alike).
    pub violations: Vec<PolicyViolation>,

    /// Verification verdict; absent when rejected pre-verification.
    pub verdict: Option<Verdict>,

    /// Post-patch failing set, captured when the sandbox ran.
    pub post_failing: Option<BTreeSet<String>>,

    /// Whether the working tree was rolled back at the end of this attempt.
    pub rolled_back: bool,
}

impl Attempt {
    /// Whether this attempt's diff survived every gate.
    pub fn is_success(&self) -> bool {
        matches!(self.verdict, Some(Verdict::Passed))
    }
}

// ---------------------------------------------------------------------------
// Flaky check record
// ---------------------------------------------------------------------------

/// One baseline repetition observed by the flaky guard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlakyProbe {
    pub run: u32,
    pub failing: BTreeSet<String>,
    pub completed: bool,
}

/// Full flaky-check record, retained on the session for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlakyReport {
    pub probes: Vec<FlakyProbe>,
    pub flaky: bool,
}

// ---------------------------------------------------------------------------
// Terminal states
// ---------------------------------------------------------------------------

/// The single authoritative terminal signal of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// A verified patch was handed to the submission sink.
    Success,

    /// The baseline failure is non-deterministic; no repair was attempted.
    FlakyTestDetected,

    /// The attempt budget ran out and the final attempt died at the policy gate.
    PolicyViolationExhausted,

    /// The attempt budget ran out.
    MaxAttemptsReached,

    /// The execution environment could not be used. Infrastructure fault,
    /// not a repair failure.
    ExecutionEnvironmentUnavailable,

    /// Every permitted attempt failed to apply structurally.
    PatchDidNotApply,
}

impl StopReason {
    pub fn label(&self) -> &'static str {
        match self {
            StopReason::Success => "success",
            StopReason::FlakyTestDetected => "flaky_test_detected",
            StopReason::PolicyViolationExhausted => "policy_violation_exhausted",
            StopReason::MaxAttemptsReached => "max_attempts_reached",
            StopReason::ExecutionEnvironmentUnavailable => "execution_environment_unavailable",
            StopReason::PatchDidNotApply => "patch_did_not_apply",
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One end-to-end repair run bound to one repository and one test command.
///
/// Owned exclusively by the orchestrator; immutable once `stop_reason` is
/// set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub config: SessionConfig,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,

    /// Flaky-check record; present once the guard has run.
    pub flaky_report: Option<FlakyReport>,

    /// Ordered, append-only attempt history.
    pub attempts: Vec<Attempt>,

    /// Terminal state; absent until resolved, set exactly once.
    pub stop_reason: Option<StopReason>,

    /// Submission reference, present only on success.
    pub submission_ref: Option<String>,

    /// Sink error text when submission failed after a verified fix.
    pub submission_error: Option<String>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            config,
            started_at: Utc::now(),
            finished_at: None,
            flaky_report: None,
            attempts: Vec::new(),
            stop_reason: None,
            submission_ref: None,
            submission_error: None,
        }
    }

    /// Append a completed attempt record.
    pub fn record_attempt(&mut self, attempt: Attempt) {
        debug_assert!(self.stop_reason.is_none(), "session already terminal");
        self.attempts.push(attempt);
    }

    /// Resolve the terminal state. May be called once.
    pub fn finish(&mut self, reason: StopReason) {
        debug_assert!(self.stop_reason.is_none(), "stop reason already set");
        self.stop_reason = Some(reason);
        self.finished_at = Some(Utc::now());
    }

    pub fn is_terminal(&self) -> bool {
        self.stop_reason.is_some()
    }

    /// Attempts used so far.
    pub fn attempts_used(&self) -> u32 {
        self.attempts.len() as u32
    }

    /// Wall-clock duration, when finished.
    pub fn duration_ms(&self) -> Option<i64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }
}
