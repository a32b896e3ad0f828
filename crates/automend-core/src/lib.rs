//! Automend Core Library
//!
//! The repair orchestration engine: a bounded, auditable
//! detect -> diagnose -> patch -> verify loop for a failing test suite.
//!
//! The engine decides whether to trust and keep a proposed change. The
//! proposal source, the execution environment, and the submission sink are
//! external collaborators behind the traits in [`ports`].

pub mod attempt;
pub mod diff;
pub mod domain;
pub mod flaky;
pub mod orchestrator;
pub mod patch_gate;
pub mod ports;
pub mod report;
pub mod telemetry;
pub mod verify;

pub use domain::{
    AutomendError, PolicyConfig, PolicyViolation, Result, Session, SessionConfig, StopReason,
    ViolationKind,
};

pub use attempt::AttemptController;
pub use diff::{FilePatch, FileStatus, Hunk, PatchLine, PatchSet};
pub use domain::session::{Attempt, AttemptStatus, FlakyReport};
pub use flaky::{check_baseline, FlakyVerdict};
pub use orchestrator::{RepairOrchestrator, SessionState};
pub use patch_gate::{evaluate_patch, is_blocked};
pub use ports::{
    ContextBundle, Evidence, ExecutionEnv, Proposal, ProposalSource, SubmissionSink, TestRun,
};
pub use report::{render_diagnostic_md, write_session_artifact};
pub use telemetry::init_tracing;
pub use verify::{verify, TestSnapshot, Verdict};

/// Automend version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
