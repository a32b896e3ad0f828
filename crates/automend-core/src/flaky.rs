//! Flaky guard: baseline signal-quality check.
//!
//! A non-deterministic baseline invalidates before/after comparison: any
//! fix would be unverifiable. The guard reruns the test command against the
//! unmodified tree and demands the identical failing set every time. A run
//! that fails to complete counts as flaky (fail closed, not open).

use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use crate::domain::session::{FlakyProbe, FlakyReport};
use crate::domain::Result;
use crate::ports::ExecutionEnv;

/// Guard verdict over the baseline signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlakyVerdict {
    /// Every repetition produced the same failing set.
    Stable { baseline: BTreeSet<String> },

    /// Repetitions disagreed, or a run failed to complete.
    Flaky { reason: String },
}

/// Run the baseline `runs` times (>= 2) and compare failing sets.
///
/// The tree is rolled back before each repetition so every run observes a
/// freshly reset snapshot. `Err` means the environment itself is unusable,
/// which the orchestrator surfaces as an infrastructure fault rather than a
/// flaky signal.
pub async fn check_baseline(
    env: &dyn ExecutionEnv,
    command: &str,
    runs: u32,
) -> Result<(FlakyVerdict, FlakyReport)> {
    debug_assert!(runs >= 2, "flaky check needs at least two runs");

    let mut probes: Vec<FlakyProbe> = Vec::with_capacity(runs as usize);
    let mut verdict: Option<FlakyVerdict> = None;

    for run in 1..=runs {
        env.rollback().await?;
        let result = env.run_tests(command).await?;

        debug!(
            run,
            failing = result.failing.len(),
            completed = result.completed,
            "flaky probe"
        );
        probes.push(FlakyProbe {
            run,
            failing: result.failing.clone(),
            completed: result.completed,
        });

        if !result.completed {
            verdict = Some(FlakyVerdict::Flaky {
                reason: format!("baseline run {run} did not complete"),
            });
            break;
        }

        if let Some(first) = probes.first() {
            if first.failing != result.failing {
                verdict = Some(FlakyVerdict::Flaky {
                    reason: format!(
                        "failing set changed between run 1 ({} tests) and run {run} ({} tests)",
                        first.failing.len(),
                        result.failing.len()
                    ),
                });
                break;
            }
        }
    }

    let verdict = verdict.unwrap_or_else(|| FlakyVerdict::Stable {
        baseline: probes
            .first()
            .map(|p| p.failing.clone())
            .unwrap_or_default(),
    });

    match &verdict {
        FlakyVerdict::Stable { baseline } => {
            info!(
                runs,
                baseline_failures = baseline.len(),
                "baseline failure is deterministic"
            );
        }
        FlakyVerdict::Flaky { reason } => {
            warn!(runs = probes.len(), reason = %reason, "flaky baseline detected");
        }
    }

    let report = FlakyReport {
        flaky: matches!(verdict, FlakyVerdict::Flaky { .. }),
        probes,
    };
    Ok((verdict, report))
}
