//! End-to-end repair loop scenarios against in-memory collaborators.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use automend_core::{
    AttemptStatus, AutomendError, ContextBundle, Evidence, ExecutionEnv, Proposal, ProposalSource,
    RepairOrchestrator, Result, SessionConfig, StopReason, SubmissionSink, TestRun, Verdict,
};

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

/// Replays a scripted sequence of proposals; repeats the last one when the
/// script runs dry.
struct ScriptedProposals {
    script: Mutex<Vec<Proposal>>,
    calls: AtomicUsize,
}

impl ScriptedProposals {
    fn new(diffs: &[&str]) -> Self {
        Self {
            script: Mutex::new(
                diffs
                    .iter()
                    .map(|d| Proposal {
                        rationale: "proposed fix".to_string(),
                        diff: d.to_string(),
                    })
                    .collect(),
            ),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ProposalSource for ScriptedProposals {
    async fn propose(&self, _ctx: &ContextBundle) -> Result<Proposal> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock().unwrap();
        if script.len() > 1 {
            Ok(script.remove(0))
        } else {
            script
                .first()
                .cloned()
                .ok_or_else(|| AutomendError::Proposal("script exhausted".to_string()))
        }
    }
}

/// Working-tree model: baseline results while clean, patched results once a
/// diff is applied; rollback restores the clean state.
struct FakeWorkspace {
    baseline_script: Mutex<Vec<TestRun>>,
    patched_script: Mutex<Vec<TestRun>>,
    patched: AtomicBool,
    apply_ok: bool,
    broken: bool,
    applies: AtomicUsize,
    patched_runs: AtomicUsize,
    rollbacks: AtomicUsize,
}

impl FakeWorkspace {
    fn new(baseline: Vec<TestRun>, patched: Vec<TestRun>) -> Self {
        Self {
            baseline_script: Mutex::new(baseline),
            patched_script: Mutex::new(patched),
            patched: AtomicBool::new(false),
            apply_ok: true,
            broken: false,
            applies: AtomicUsize::new(0),
            patched_runs: AtomicUsize::new(0),
            rollbacks: AtomicUsize::new(0),
        }
    }

    fn rejecting_applies(mut self) -> Self {
        self.apply_ok = false;
        self
    }

    fn broken(mut self) -> Self {
        self.broken = true;
        self
    }
}

fn pop_or_repeat(script: &Mutex<Vec<TestRun>>) -> TestRun {
    let mut script = script.lock().unwrap();
    if script.len() > 1 {
        script.remove(0)
    } else {
        script.first().cloned().unwrap_or(TestRun {
            failing: BTreeSet::new(),
            completed: false,
        })
    }
}

#[async_trait]
impl ExecutionEnv for FakeWorkspace {
    async fn run_tests(&self, _command: &str) -> Result<TestRun> {
        if self.broken {
            return Err(AutomendError::EnvironmentUnavailable(
                "sandbox daemon not running".to_string(),
            ));
        }
        if self.patched.load(Ordering::SeqCst) {
            self.patched_runs.fetch_add(1, Ordering::SeqCst);
            Ok(pop_or_repeat(&self.patched_script))
        } else {
            Ok(pop_or_repeat(&self.baseline_script))
        }
    }

    async fn apply_patch(&self, _diff: &str) -> Result<bool> {
        self.applies.fetch_add(1, Ordering::SeqCst);
        if self.apply_ok {
            self.patched.store(true, Ordering::SeqCst);
        }
        Ok(self.apply_ok)
    }

    async fn rollback(&self) -> Result<()> {
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        self.patched.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Counts submissions; optionally fails.
struct CountingSink {
    submissions: AtomicUsize,
    last_evidence: Mutex<Option<Evidence>>,
    fail: bool,
}

impl CountingSink {
    fn new() -> Self {
        Self {
            submissions: AtomicUsize::new(0),
            last_evidence: Mutex::new(None),
            fail: false,
        }
    }

    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }
}

#[async_trait]
impl SubmissionSink for CountingSink {
    async fn submit(&self, _diff: &str, evidence: &Evidence) -> Result<String> {
        self.submissions.fetch_add(1, Ordering::SeqCst);
        *self.last_evidence.lock().unwrap() = Some(evidence.clone());
        if self.fail {
            Err(AutomendError::Submission("remote rejected push".to_string()))
        } else {
            Ok(format!("submission/{}", evidence.session_id))
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const FIX_DIFF: &str = "\
--- a/src/math.py
+++ b/src/math.py
@@ -1,1 +1,1 @@
-    return a - b
+    return a + b
";

const TEST_TOUCHING_DIFF: &str = "\
--- a/tests/test_math.py
+++ b/tests/test_math.py
@@ -1,1 +1,1 @@
-    assert add(2, 2) == 4
+    assert add(2, 2) == 0
";

fn failing(ids: &[&str]) -> TestRun {
    TestRun {
        failing: ids.iter().map(|s| s.to_string()).collect(),
        completed: true,
    }
}

fn crashed() -> TestRun {
    TestRun {
        failing: BTreeSet::new(),
        completed: false,
    }
}

fn config() -> SessionConfig {
    SessionConfig::new("/work/repo", "pytest -q")
        .with_max_attempts(2)
        .with_flaky_runs(3)
}

fn orchestrator(
    proposals: Arc<ScriptedProposals>,
    env: Arc<FakeWorkspace>,
    sink: Arc<CountingSink>,
    config: SessionConfig,
) -> RepairOrchestrator {
    RepairOrchestrator::new(proposals, env, sink, config)
}

// ---------------------------------------------------------------------------
// Scenario 1: clean fix
// ---------------------------------------------------------------------------

#[tokio::test]
async fn clean_fix_submits_once() {
    let proposals = Arc::new(ScriptedProposals::new(&[FIX_DIFF]));
    let env = Arc::new(FakeWorkspace::new(
        vec![failing(&["test_add"])],
        vec![failing(&[])],
    ));
    let sink = Arc::new(CountingSink::new());

    let session = orchestrator(proposals.clone(), env.clone(), sink.clone(), config())
        .run()
        .await
        .expect("session");

    assert_eq!(session.stop_reason, Some(StopReason::Success));
    assert_eq!(session.attempts.len(), 1);
    assert_eq!(session.attempts[0].verdict, Some(Verdict::Passed));
    assert!(!session.attempts[0].rolled_back);
    assert_eq!(sink.submissions.load(Ordering::SeqCst), 1);
    assert!(session.submission_ref.is_some());

    let evidence = sink.last_evidence.lock().unwrap().clone().expect("evidence");
    assert!(evidence.baseline_failing.contains("test_add"));
    assert!(evidence.post_failing.is_empty());
    assert_eq!(evidence.attempt_index, 1);
}

// ---------------------------------------------------------------------------
// Scenario 2: flaky baseline
// ---------------------------------------------------------------------------

#[tokio::test]
async fn flaky_baseline_aborts_without_attempts() {
    let proposals = Arc::new(ScriptedProposals::new(&[FIX_DIFF]));
    // {test_x}, {}, {test_x}: inconsistent across runs.
    let env = Arc::new(FakeWorkspace::new(
        vec![failing(&["test_x"]), failing(&[]), failing(&["test_x"])],
        vec![],
    ));
    let sink = Arc::new(CountingSink::new());

    let session = orchestrator(proposals.clone(), env.clone(), sink.clone(), config())
        .run()
        .await
        .expect("session");

    assert_eq!(session.stop_reason, Some(StopReason::FlakyTestDetected));
    assert!(session.attempts.is_empty());
    assert!(session.flaky_report.as_ref().is_some_and(|r| r.flaky));
    // No proposal was ever requested, no submission made.
    assert_eq!(proposals.calls.load(Ordering::SeqCst), 0);
    assert_eq!(sink.submissions.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn incomplete_baseline_run_counts_as_flaky() {
    let proposals = Arc::new(ScriptedProposals::new(&[FIX_DIFF]));
    let env = Arc::new(FakeWorkspace::new(
        vec![failing(&["test_x"]), crashed()],
        vec![],
    ));
    let sink = Arc::new(CountingSink::new());

    let session = orchestrator(proposals, env, sink, config())
        .run()
        .await
        .expect("session");

    assert_eq!(session.stop_reason, Some(StopReason::FlakyTestDetected));
    assert!(session.attempts.is_empty());
}

// ---------------------------------------------------------------------------
// Scenario 3: policy rejection then exhaustion
// ---------------------------------------------------------------------------

#[tokio::test]
async fn policy_rejections_exhaust_without_sandbox_use() {
    let proposals = Arc::new(ScriptedProposals::new(&[
        TEST_TOUCHING_DIFF,
        TEST_TOUCHING_DIFF,
    ]));
    let env = Arc::new(FakeWorkspace::new(vec![failing(&["test_add"])], vec![]));
    let sink = Arc::new(CountingSink::new());

    let session = orchestrator(proposals, env.clone(), sink.clone(), config())
        .run()
        .await
        .expect("session");

    assert_eq!(
        session.stop_reason,
        Some(StopReason::PolicyViolationExhausted)
    );
    assert_eq!(session.attempts.len(), 2);
    for attempt in &session.attempts {
        assert_eq!(attempt.status, AttemptStatus::PolicyRejected);
        assert!(attempt
            .violations
            .iter()
            .any(|v| v.detail.contains("test path")));
    }
    // Rejected diffs never reach the apply step or the sandbox.
    assert_eq!(env.applies.load(Ordering::SeqCst), 0);
    assert_eq!(env.patched_runs.load(Ordering::SeqCst), 0);
    assert_eq!(sink.submissions.load(Ordering::SeqCst), 0);
}

// ---------------------------------------------------------------------------
// Scenario 4: regression, then recovery on retry
// ---------------------------------------------------------------------------

#[tokio::test]
async fn regression_rolls_back_and_retries() {
    let proposals = Arc::new(ScriptedProposals::new(&[FIX_DIFF, FIX_DIFF]));
    // First patched run trades test_a for test_b (a regression), second is
    // green.
    let env = Arc::new(FakeWorkspace::new(
        vec![failing(&["test_a"])],
        vec![failing(&["test_b"]), failing(&[])],
    ));
    let sink = Arc::new(CountingSink::new());

    let session = orchestrator(proposals, env.clone(), sink.clone(), config())
        .run()
        .await
        .expect("session");

    assert_eq!(session.stop_reason, Some(StopReason::Success));
    assert_eq!(session.attempts.len(), 2);

    match &session.attempts[0].verdict {
        Some(Verdict::Regressed { new_failures }) => {
            assert!(new_failures.contains("test_b"));
        }
        other => panic!("expected Regressed, got {:?}", other),
    }
    assert!(session.attempts[0].rolled_back);
    assert_eq!(session.attempts[1].verdict, Some(Verdict::Passed));
    assert_eq!(sink.submissions.load(Ordering::SeqCst), 1);
}

// ---------------------------------------------------------------------------
// Scenario 5: no progress until the budget runs out
// ---------------------------------------------------------------------------

#[tokio::test]
async fn no_progress_exhausts_budget_without_submission() {
    let proposals = Arc::new(ScriptedProposals::new(&[FIX_DIFF, FIX_DIFF]));
    let env = Arc::new(FakeWorkspace::new(
        vec![failing(&["test_add"])],
        vec![failing(&["test_add"]), failing(&["test_add"])],
    ));
    let sink = Arc::new(CountingSink::new());

    let session = orchestrator(proposals, env.clone(), sink.clone(), config())
        .run()
        .await
        .expect("session");

    assert_eq!(session.stop_reason, Some(StopReason::MaxAttemptsReached));
    assert_eq!(session.attempts.len(), 2);
    for attempt in &session.attempts {
        assert!(matches!(attempt.verdict, Some(Verdict::Unchanged { .. })));
        assert!(attempt.rolled_back);
    }
    assert_eq!(sink.submissions.load(Ordering::SeqCst), 0);
}

// ---------------------------------------------------------------------------
// Structural and infrastructure faults
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unappliable_patches_get_their_own_stop_reason() {
    let proposals = Arc::new(ScriptedProposals::new(&[FIX_DIFF, FIX_DIFF]));
    let env = Arc::new(
        FakeWorkspace::new(vec![failing(&["test_add"])], vec![]).rejecting_applies(),
    );
    let sink = Arc::new(CountingSink::new());

    let session = orchestrator(proposals, env.clone(), sink, config())
        .run()
        .await
        .expect("session");

    assert_eq!(session.stop_reason, Some(StopReason::PatchDidNotApply));
    assert_eq!(session.attempts.len(), 2);
    for attempt in &session.attempts {
        assert_eq!(attempt.status, AttemptStatus::FailedToApply);
        assert!(attempt.rolled_back);
    }
}

#[tokio::test]
async fn broken_environment_short_circuits() {
    let proposals = Arc::new(ScriptedProposals::new(&[FIX_DIFF]));
    let env = Arc::new(FakeWorkspace::new(vec![], vec![]).broken());
    let sink = Arc::new(CountingSink::new());

    let session = orchestrator(proposals.clone(), env, sink, config())
        .run()
        .await
        .expect("session");

    assert_eq!(
        session.stop_reason,
        Some(StopReason::ExecutionEnvironmentUnavailable)
    );
    // The fault bypassed the retry budget entirely.
    assert!(session.attempts.is_empty());
    assert_eq!(proposals.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn green_baseline_is_an_error_not_a_repair() {
    let proposals = Arc::new(ScriptedProposals::new(&[FIX_DIFF]));
    let env = Arc::new(FakeWorkspace::new(vec![failing(&[])], vec![]));
    let sink = Arc::new(CountingSink::new());

    let result = orchestrator(proposals, env, sink, config()).run().await;
    assert!(matches!(result, Err(AutomendError::NothingToRepair)));
}

#[tokio::test]
async fn cancellation_is_honored_between_attempts() {
    let proposals = Arc::new(ScriptedProposals::new(&[FIX_DIFF]));
    let env = Arc::new(FakeWorkspace::new(vec![failing(&["test_add"])], vec![]));
    let sink = Arc::new(CountingSink::new());

    let orch = orchestrator(proposals.clone(), env, sink, config());
    orch.cancel_handle().store(true, Ordering::SeqCst);

    let result = orch.run().await;
    assert!(matches!(result, Err(AutomendError::Cancelled)));
    // The flaky check ran, but no attempt was started mid-cancel.
    assert_eq!(proposals.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn sink_failure_keeps_success_but_records_error() {
    let proposals = Arc::new(ScriptedProposals::new(&[FIX_DIFF]));
    let env = Arc::new(FakeWorkspace::new(
        vec![failing(&["test_add"])],
        vec![failing(&[])],
    ));
    let sink = Arc::new(CountingSink::failing());

    let session = orchestrator(proposals, env, sink.clone(), config())
        .run()
        .await
        .expect("session");

    assert_eq!(session.stop_reason, Some(StopReason::Success));
    assert!(session.submission_ref.is_none());
    assert!(session
        .submission_error
        .as_ref()
        .is_some_and(|e| e.contains("remote rejected push")));
    assert_eq!(sink.submissions.load(Ordering::SeqCst), 1);
}

// ---------------------------------------------------------------------------
// Audit trail
// ---------------------------------------------------------------------------

#[tokio::test]
async fn successful_session_retains_rejected_siblings() {
    // First proposal is rejected by policy, second one fixes the suite; the
    // success record must still carry the rejected attempt.
    let proposals = Arc::new(ScriptedProposals::new(&[TEST_TOUCHING_DIFF, FIX_DIFF]));
    let env = Arc::new(FakeWorkspace::new(
        vec![failing(&["test_add"])],
        vec![failing(&[])],
    ));
    let sink = Arc::new(CountingSink::new());

    let session = orchestrator(proposals, env, sink, config())
        .run()
        .await
        .expect("session");

    assert_eq!(session.stop_reason, Some(StopReason::Success));
    assert_eq!(session.attempts.len(), 2);
    assert_eq!(session.attempts[0].status, AttemptStatus::PolicyRejected);
    assert!(!session.attempts[0].violations.is_empty());
    assert_eq!(session.attempts[1].verdict, Some(Verdict::Passed));
}
