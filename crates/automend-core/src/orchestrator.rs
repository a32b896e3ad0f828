//! Repair orchestrator: the session-scoped state machine.
//!
//! `Init -> FlakyCheck -> {Aborted | Attempting -> {Succeeded | Retrying ->
//! Attempting | Exhausted}}`. Every terminal path resolves exactly one
//! [`StopReason`]; no state is re-entered after termination. The attempt
//! budget is absolute; no fault class earns extra attempts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::attempt::AttemptController;
use crate::domain::session::AttemptStatus;
use crate::domain::{AutomendError, Result, Session, SessionConfig, StopReason};
use crate::flaky::{check_baseline, FlakyVerdict};
use crate::ports::{ContextBundle, Evidence, ExecutionEnv, ProposalSource, SubmissionSink};
use crate::verify::{TestSnapshot, Verdict};

/// Named states of the repair loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    FlakyCheck,
    Attempting,
    Retrying,
    Succeeded,
    Exhausted,
    Aborted,
}

/// Owns one [`Session`] and drives it to a terminal state.
pub struct RepairOrchestrator {
    proposals: Arc<dyn ProposalSource>,
    env: Arc<dyn ExecutionEnv>,
    sink: Arc<dyn SubmissionSink>,
    config: SessionConfig,
    cancelled: Arc<AtomicBool>,
}

impl RepairOrchestrator {
    pub fn new(
        proposals: Arc<dyn ProposalSource>,
        env: Arc<dyn ExecutionEnv>,
        sink: Arc<dyn SubmissionSink>,
        config: SessionConfig,
    ) -> Self {
        Self {
            proposals,
            env,
            sink,
            config,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag checked at state-transition boundaries; setting it requests
    /// early termination without ever interrupting an attempt mid-flight.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    /// Run the session to its terminal state.
    ///
    /// Infrastructure faults terminate the session with
    /// [`StopReason::ExecutionEnvironmentUnavailable`] and still return the
    /// audit trail. `Err` is reserved for caller mistakes (invalid config, a
    /// passing baseline) and cancellation.
    pub async fn run(&self) -> Result<Session> {
        self.config.validate()?;
        let mut session = Session::new(self.config.clone());

        info!(
            session_id = %session.id,
            repo = %self.config.repo,
            test_command = %self.config.test_command,
            max_attempts = self.config.max_attempts,
            "starting repair session"
        );

        match self.drive(&mut session).await {
            Ok(()) => Ok(session),
            Err(err @ (AutomendError::NothingToRepair | AutomendError::Cancelled)) => Err(err),
            Err(err) => {
                warn!(session_id = %session.id, error = %err, "infrastructure fault");
                session.finish(StopReason::ExecutionEnvironmentUnavailable);
                Ok(session)
            }
        }
    }

    async fn drive(&self, session: &mut Session) -> Result<()> {
        let controller = AttemptController::new(
            self.proposals.clone(),
            self.env.clone(),
            self.config.policy.clone(),
            Duration::from_millis(self.config.proposal_timeout_ms),
        );

        let mut state = SessionState::Init;
        let mut baseline = TestSnapshot::crashed();

        loop {
            state = match state {
                SessionState::Init => SessionState::FlakyCheck,

                SessionState::FlakyCheck => {
                    let (verdict, report) =
                        check_baseline(self.env.as_ref(), &self.config.test_command, self.config.flaky_runs)
                            .await?;
                    session.flaky_report = Some(report);

                    match verdict {
                        FlakyVerdict::Flaky { reason } => {
                            warn!(session_id = %session.id, reason = %reason, "aborting: flaky baseline");
                            session.finish(StopReason::FlakyTestDetected);
                            SessionState::Aborted
                        }
                        FlakyVerdict::Stable { baseline: failing } => {
                            if failing.is_empty() {
                                return Err(AutomendError::NothingToRepair);
                            }
                            baseline = TestSnapshot {
                                failing,
                                completed: true,
                            };
                            SessionState::Attempting
                        }
                    }
                }

                SessionState::Attempting => {
                    self.check_cancelled()?;

                    let index = session.attempts_used() + 1;
                    let ctx = ContextBundle {
                        repo: self.config.repo.clone(),
                        test_command: self.config.test_command.clone(),
                        baseline_failing: baseline.failing.clone(),
                        attempt_index: index,
                        previous_outcome: feedback_from(session),
                    };

                    let attempt = controller.run_attempt(index, &baseline, &ctx).await?;
                    let passed = attempt.is_success();
                    session.record_attempt(attempt);

                    if passed {
                        SessionState::Succeeded
                    } else if session.attempts_used() < self.config.max_attempts {
                        SessionState::Retrying
                    } else {
                        SessionState::Exhausted
                    }
                }

                SessionState::Retrying => {
                    info!(
                        session_id = %session.id,
                        used = session.attempts_used(),
                        budget = self.config.max_attempts,
                        "retrying"
                    );
                    SessionState::Attempting
                }

                SessionState::Succeeded => {
                    self.submit(session, &baseline).await;
                    session.finish(StopReason::Success);
                    SessionState::Aborted
                }

                SessionState::Exhausted => {
                    let reason = resolve_exhaustion(session);
                    info!(session_id = %session.id, reason = reason.label(), "attempt budget exhausted");
                    session.finish(reason);
                    SessionState::Aborted
                }

                SessionState::Aborted => break,
            };
        }

        Ok(())
    }

    /// Hand the verified diff and its evidence to the sink, exactly once.
    /// A sink failure does not un-verify the patch; it is recorded on the
    /// session instead.
    async fn submit(&self, session: &mut Session, baseline: &TestSnapshot) {
        let Some(attempt) = session.attempts.last() else {
            return;
        };
        let Some(diff) = attempt.diff.clone() else {
            return;
        };

        let evidence = Evidence {
            session_id: session.id,
            attempt_index: attempt.index,
            test_command: self.config.test_command.clone(),
            baseline_failing: baseline.failing.clone(),
            post_failing: attempt.post_failing.clone().unwrap_or_default(),
            rationale: attempt.rationale.clone(),
        };

        match self.sink.submit(&diff, &evidence).await {
            Ok(reference) => {
                info!(session_id = %session.id, reference = %reference, "verified patch submitted");
                session.submission_ref = Some(reference);
            }
            Err(err) => {
                warn!(session_id = %session.id, error = %err, "submission sink failed");
                session.submission_error = Some(err.to_string());
            }
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(AutomendError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Sharper diagnostics for the exhausted path: policy rejections and
/// apply failures get their own stop reasons.
fn resolve_exhaustion(session: &Session) -> StopReason {
    if !session.attempts.is_empty()
        && session
            .attempts
            .iter()
            .all(|a| a.status == AttemptStatus::FailedToApply)
    {
        return StopReason::PatchDidNotApply;
    }

    match session.attempts.last().map(|a| a.status) {
        Some(AttemptStatus::PolicyRejected) => StopReason::PolicyViolationExhausted,
        _ => StopReason::MaxAttemptsReached,
    }
}

/// Summarize the previous attempt for the next proposal request.
fn feedback_from(session: &Session) -> Option<String> {
    let last = session.attempts.last()?;
    let summary = match last.status {
        AttemptStatus::NoProposal => "no proposal was produced".to_string(),
        AttemptStatus::FailedToApply => "the diff did not apply cleanly".to_string(),
        AttemptStatus::PolicyRejected => {
            let details: Vec<&str> = last
                .violations
                .iter()
                .filter(|v| v.blocking)
                .map(|v| v.detail.as_str())
                .take(3)
                .collect();
            format!("policy rejected the diff: {}", details.join("; "))
        }
        AttemptStatus::Verified => match &last.verdict {
            Some(Verdict::Regressed { new_failures }) => format!(
                "the patch caused regressions: {}",
                new_failures
                    .iter()
                    .take(5)
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            Some(Verdict::Unchanged { still_failing }) => format!(
                "the original failures persist: {}",
                still_failing
                    .iter()
                    .take(5)
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            Some(Verdict::ExecutionFailed) => {
                "the patched test run crashed or timed out".to_string()
            }
            Some(Verdict::Passed) | None => return None,
        },
    };
    Some(summary)
}
