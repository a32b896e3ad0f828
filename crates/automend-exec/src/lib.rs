//! Local collaborator implementations for the Automend engine.
//!
//! Everything here runs on the operator's machine: a git-backed working
//! tree, a plain process test runner, and a filesystem submission sink.
//! Container-backed isolation can replace [`LocalExecutionEnv`] by
//! implementing the same `ExecutionEnv` trait.

pub mod env;
pub mod runner;
pub mod submission;
pub mod testlog;
pub mod workspace;

pub use env::LocalExecutionEnv;
pub use runner::{CommandOutput, ProcessTestRunner};
pub use submission::FsSubmissionSink;
pub use testlog::extract_failing_tests;
pub use workspace::GitWorkspace;
