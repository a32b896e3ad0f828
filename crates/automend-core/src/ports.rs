//! Collaborator contracts consumed by the repair loop.
//!
//! The engine never talks to an LLM, a sandbox, or a code host directly; it
//! consumes these traits. Implementations live outside the core (see the
//! `automend-exec` crate for the local ones). An `Err` from any method is an
//! infrastructure fault; domain-level failure (tests failing, patch not
//! applying) is expressed in the return values.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::Result;

/// What the proposal source gets to look at.
///
/// Context retrieval and prompt formatting are the source's own concern; the
/// engine only forwards what it knows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextBundle {
    /// Opaque repository handle.
    pub repo: String,

    /// The failing test command.
    pub test_command: String,

    /// Baseline failing test identifiers.
    pub baseline_failing: BTreeSet<String>,

    /// 1-based index of the attempt this proposal is for.
    pub attempt_index: u32,

    /// Feedback from the previous attempt (verdict label or violation
    /// summary), absent on the first attempt.
    pub previous_outcome: Option<String>,
}

/// A proposed change: a unified diff plus the reasoning behind it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub rationale: String,
    pub diff: String,
}

/// One raw test execution result from the environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRun {
    /// Failing test identifiers.
    pub failing: BTreeSet<String>,

    /// False when the run itself crashed or timed out.
    pub completed: bool,
}

/// Evidence bundle handed to the submission sink alongside the diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    pub session_id: Uuid,
    pub attempt_index: u32,
    pub test_command: String,
    pub baseline_failing: BTreeSet<String>,
    pub post_failing: BTreeSet<String>,
    pub rationale: Option<String>,
}

/// The generative collaborator producing candidate patches.
///
/// Treated as opaque and fallible; the engine bounds it with a timeout and
/// treats absence as a consumed attempt.
#[async_trait]
pub trait ProposalSource: Send + Sync {
    async fn propose(&self, ctx: &ContextBundle) -> Result<Proposal>;
}

/// The isolated execution environment owning the working tree.
///
/// The engine holds this exclusively for the session's lifetime; attempts
/// are strictly sequential over it.
#[async_trait]
pub trait ExecutionEnv: Send + Sync {
    /// Run the test command against the current working tree.
    async fn run_tests(&self, command: &str) -> Result<TestRun>;

    /// Apply a unified diff. `Ok(false)` means structural rejection
    /// (conflicting context), which is a domain outcome, not a fault.
    async fn apply_patch(&self, diff: &str) -> Result<bool>;

    /// Restore the working tree to the clean pre-attempt state. Idempotent;
    /// failure here aborts the session as an infrastructure fault.
    async fn rollback(&self) -> Result<()>;
}

/// Downstream consumer of a verified patch. Invoked exactly once per
/// session, only on success.
#[async_trait]
pub trait SubmissionSink: Send + Sync {
    async fn submit(&self, diff: &str, evidence: &Evidence) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_bundle_serde_roundtrip() {
        let ctx = ContextBundle {
            repo: "/work/repo".to_string(),
            test_command: "cargo test".to_string(),
            baseline_failing: ["test_add".to_string()].into_iter().collect(),
            attempt_index: 1,
            previous_outcome: None,
        };
        let json = serde_json::to_string(&ctx).expect("serialize");
        let deserialized: ContextBundle = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(ctx, deserialized);
    }

    #[test]
    fn test_evidence_serde_roundtrip() {
        let evidence = Evidence {
            session_id: Uuid::new_v4(),
            attempt_index: 2,
            test_command: "pytest -q".to_string(),
            baseline_failing: ["test_a".to_string()].into_iter().collect(),
            post_failing: BTreeSet::new(),
            rationale: Some("off-by-one in pagination".to_string()),
        };
        let json = serde_json::to_string(&evidence).expect("serialize");
        let deserialized: Evidence = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(evidence, deserialized);
    }
}
