//! Verification gate: before/after test-outcome comparison.
//!
//! Compares the baseline failing set against the post-patch failing set and
//! produces exactly one [`Verdict`]. Only [`Verdict::Passed`] authorizes
//! submission; every other verdict triggers rollback.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// One raw test-run observation from the execution environment.
///
/// `completed == false` means the run itself crashed or timed out, which is
/// distinct from tests failing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSnapshot {
    /// Identifiers of failing tests, ordered for reproducible reporting.
    pub failing: BTreeSet<String>,

    /// Whether the run ran to completion.
    pub completed: bool,
}

impl TestSnapshot {
    /// A completed run with the given failing identifiers.
    pub fn completed<I, S>(failing: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            failing: failing.into_iter().map(Into::into).collect(),
            completed: true,
        }
    }

    /// A run that crashed or timed out before producing a result.
    pub fn crashed() -> Self {
        Self {
            failing: BTreeSet::new(),
            completed: false,
        }
    }

    /// Whether every test passed.
    pub fn is_green(&self) -> bool {
        self.completed && self.failing.is_empty()
    }
}

/// The outcome of comparing a baseline snapshot with a post-patch snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Verdict {
    /// Every baseline failure is fixed and nothing new fails.
    Passed,

    /// At least one previously-passing test now fails. Overrides any
    /// improvement in the baseline set; a regression is unsafe by definition.
    Regressed { new_failures: BTreeSet<String> },

    /// No regressions, but baseline failures persist at least partially.
    /// No-progress, not partial success.
    Unchanged { still_failing: BTreeSet<String> },

    /// The post-patch run did not complete. Takes precedence over set
    /// comparison entirely.
    ExecutionFailed,
}

impl Verdict {
    /// Whether this verdict authorizes submission.
    pub fn is_passed(&self) -> bool {
        matches!(self, Verdict::Passed)
    }

    /// Short label for logs and reports.
    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Passed => "passed",
            Verdict::Regressed { .. } => "regressed",
            Verdict::Unchanged { .. } => "unchanged",
            Verdict::ExecutionFailed => "execution_failed",
        }
    }
}

/// Compare a baseline snapshot against a post-patch snapshot.
///
/// Let B be the baseline failing set and P the post-patch failing set:
/// - `ExecutionFailed` if the post run did not complete
/// - `Regressed` if `P \ B` is non-empty
/// - `Unchanged` if `B ∩ P` is non-empty
/// - `Passed` otherwise (all of B fixed, nothing outside B failing)
pub fn verify(baseline: &TestSnapshot, post: &TestSnapshot) -> Verdict {
    if !post.completed {
        return Verdict::ExecutionFailed;
    }

    let new_failures: BTreeSet<String> = post
        .failing
        .difference(&baseline.failing)
        .cloned()
        .collect();
    if !new_failures.is_empty() {
        return Verdict::Regressed { new_failures };
    }

    let still_failing: BTreeSet<String> = post
        .failing
        .intersection(&baseline.failing)
        .cloned()
        .collect();
    if !still_failing.is_empty() {
        return Verdict::Unchanged { still_failing };
    }

    Verdict::Passed
}
