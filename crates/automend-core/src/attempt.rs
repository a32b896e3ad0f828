//! Attempt controller: one propose -> police -> apply -> verify cycle.
//!
//! Every non-passing path rolls the working tree back before returning, so
//! no attempt leaves residue for the next one. A rejected proposal never
//! touches the execution environment at all.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::domain::session::{Attempt, AttemptStatus};
use crate::domain::{PolicyConfig, Result};
use crate::patch_gate::{evaluate_patch, is_blocked};
use crate::ports::{ContextBundle, ExecutionEnv, Proposal, ProposalSource, TestRun};
use crate::verify::{verify, TestSnapshot, Verdict};

/// Drives a single [`Attempt`] end-to-end.
pub struct AttemptController {
    proposals: Arc<dyn ProposalSource>,
    env: Arc<dyn ExecutionEnv>,
    policy: PolicyConfig,
    proposal_timeout: Duration,
}

impl AttemptController {
    pub fn new(
        proposals: Arc<dyn ProposalSource>,
        env: Arc<dyn ExecutionEnv>,
        policy: PolicyConfig,
        proposal_timeout: Duration,
    ) -> Self {
        Self {
            proposals,
            env,
            policy,
            proposal_timeout,
        }
    }

    /// Run one attempt against the given baseline.
    ///
    /// `Err` is reserved for infrastructure faults from the execution
    /// environment; every domain-level failure becomes an [`Attempt`]
    /// record.
    pub async fn run_attempt(
        &self,
        index: u32,
        baseline: &TestSnapshot,
        ctx: &ContextBundle,
    ) -> Result<Attempt> {
        info!(attempt = index, "requesting proposal");

        let proposal = match self.request_proposal(ctx).await {
            Some(p) => p,
            None => {
                // No diff produced: the attempt is consumed without touching
                // the sandbox.
                return Ok(Attempt {
                    index,
                    status: AttemptStatus::NoProposal,
                    rationale: None,
                    diff: None,
                    violations: Vec::new(),
                    verdict: None,
                    post_failing: None,
                    rolled_back: false,
                });
            }
        };

        let violations = evaluate_patch(&proposal.diff, &self.policy);
        if is_blocked(&violations) {
            info!(
                attempt = index,
                violations = violations.len(),
                "policy rejected proposal; skipping sandbox"
            );
            return Ok(Attempt {
                index,
                status: AttemptStatus::PolicyRejected,
                rationale: Some(proposal.rationale),
                diff: Some(proposal.diff),
                violations,
                verdict: None,
                post_failing: None,
                rolled_back: false,
            });
        }

        let applied = self.env.apply_patch(&proposal.diff).await?;
        if !applied {
            warn!(attempt = index, "patch did not apply cleanly");
            self.env.rollback().await?;
            return Ok(Attempt {
                index,
                status: AttemptStatus::FailedToApply,
                rationale: Some(proposal.rationale),
                diff: Some(proposal.diff),
                violations,
                verdict: None,
                post_failing: None,
                rolled_back: true,
            });
        }

        let post_run: TestRun = self.env.run_tests(&ctx.test_command).await?;
        let post = TestSnapshot {
            failing: post_run.failing.clone(),
            completed: post_run.completed,
        };
        let verdict = verify(baseline, &post);
        info!(attempt = index, verdict = verdict.label(), "verification gate");

        let rolled_back = if verdict.is_passed() {
            // The verified tree is left in place for the submission sink.
            false
        } else {
            self.env.rollback().await?;
            true
        };

        Ok(Attempt {
            index,
            status: AttemptStatus::Verified,
            rationale: Some(proposal.rationale),
            diff: Some(proposal.diff),
            violations,
            verdict: Some(verdict),
            post_failing: Some(post_run.failing),
            rolled_back,
        })
    }

    /// Bounded proposal request. Timeout, error, and an empty diff all
    /// collapse to "no diff produced".
    async fn request_proposal(&self, ctx: &ContextBundle) -> Option<Proposal> {
        let outcome = tokio::time::timeout(self.proposal_timeout, self.proposals.propose(ctx)).await;
        match outcome {
            Ok(Ok(proposal)) if !proposal.diff.trim().is_empty() => Some(proposal),
            Ok(Ok(_)) => {
                warn!("proposal source returned an empty diff");
                None
            }
            Ok(Err(err)) => {
                warn!(error = %err, "proposal source failed");
                None
            }
            Err(_) => {
                warn!(timeout_ms = self.proposal_timeout.as_millis() as u64, "proposal timed out");
                None
            }
        }
    }
}
