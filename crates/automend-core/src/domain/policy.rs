//! Admissibility policy for proposed patches.
//!
//! A [`PolicyConfig`] is supplied once per session and is immutable for the
//! session's lifetime. Evaluation itself lives in [`crate::patch_gate`]; this
//! module holds the configuration and the violation record types.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Built-in rule sets
// ---------------------------------------------------------------------------

/// Paths a repair patch must never touch: test suites and CI configuration.
/// Matched at any directory depth.
pub const DEFAULT_FORBIDDEN_PATHS: &[&str] = &[
    ".github/",
    ".gitlab-ci",
    "Jenkinsfile",
    ".circleci/",
    "azure-pipelines",
];

/// Test-directory patterns; blocked whenever `allow_test_modifications` is
/// false, independent of `forbidden_paths` membership.
pub const DEFAULT_TEST_PATH_PATTERNS: &[&str] = &["tests/", "test/", "__tests__/"];

/// Patterns whose introduction indicates a test-bypass attempt.
pub const DEFAULT_FORBIDDEN_PATTERNS: &[&str] = &[
    "#[ignore]",
    "pytest.skip",
    "@pytest.mark.skip",
    "@pytest.mark.xfail",
    "unittest.skip",
    "skipIf",
    "skipUnless",
    "@Disabled",
    ".skip(",
    "# noqa",
    "todo!()",
];

/// Patterns whose introduction is suspicious but not necessarily a bypass.
pub const DEFAULT_DANGEROUS_PATTERNS: &[&str] = &[
    "os.system",
    "subprocess.call",
    "eval(",
    "exec(",
    "__import__",
    "shutil.rmtree",
    "rm -rf",
    "std::process::Command",
];

/// Dependency manifests blocked from modification unless
/// `allow_dependency_changes` is set.
pub const DEFAULT_PROTECTED_DEPENDENCY_FILES: &[&str] = &[
    "Cargo.toml",
    "Cargo.lock",
    "requirements.txt",
    "pyproject.toml",
    "poetry.lock",
    "Pipfile",
    "Pipfile.lock",
    "package.json",
    "package-lock.json",
    "go.mod",
    "go.sum",
];

fn to_vec(patterns: &[&str]) -> Vec<String> {
    patterns.iter().map(|s| s.to_string()).collect()
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Policy governing which proposed patches are admissible.
///
/// Adjustable per repository; missing fields fall back to the defaults when
/// deserialized from a partial config file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PolicyConfig {
    /// Path prefixes / globs that must never be modified.
    pub forbidden_paths: Vec<String>,

    /// Patterns whose introduction (added lines only) rejects the patch.
    pub forbidden_patterns: Vec<String>,

    /// Patterns whose introduction is flagged; blocking is governed by
    /// `dangerous_blocking`.
    pub dangerous_patterns: Vec<String>,

    /// When true, dangerous-class violations reject the patch outright.
    pub dangerous_blocking: bool,

    /// Maximum number of files a patch may touch.
    pub max_files_changed: usize,

    /// Maximum total added + removed lines across the patch.
    pub max_lines_changed: usize,

    /// Maximum hunks in any single file.
    pub max_hunks_per_file: usize,

    /// Whether the patch may delete files.
    pub allow_file_deletion: bool,

    /// Whether the patch may create files.
    pub allow_new_files: bool,

    /// Whether the patch may touch dependency manifests.
    pub allow_dependency_changes: bool,

    /// File names treated as dependency manifests.
    pub protected_dependency_files: Vec<String>,

    /// Whether the patch may touch test directories.
    pub allow_test_modifications: bool,

    /// Directory patterns identifying test code.
    pub test_path_patterns: Vec<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            forbidden_paths: to_vec(DEFAULT_FORBIDDEN_PATHS),
            forbidden_patterns: to_vec(DEFAULT_FORBIDDEN_PATTERNS),
            dangerous_patterns: to_vec(DEFAULT_DANGEROUS_PATTERNS),
            dangerous_blocking: false,
            max_files_changed: 5,
            max_lines_changed: 150,
            max_hunks_per_file: 10,
            allow_file_deletion: false,
            allow_new_files: true,
            allow_dependency_changes: false,
            protected_dependency_files: to_vec(DEFAULT_PROTECTED_DEPENDENCY_FILES),
            allow_test_modifications: false,
            test_path_patterns: to_vec(DEFAULT_TEST_PATH_PATTERNS),
        }
    }
}

// ---------------------------------------------------------------------------
// Violations
// ---------------------------------------------------------------------------

/// Classification of a policy violation.
///
/// The `Ord` impl fixes the reporting order within one file.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    MalformedDiff,
    ForbiddenPath,
    TestModificationNotAllowed,
    DependencyChangeNotAllowed,
    NewFileNotAllowed,
    DeletionNotAllowed,
    ForbiddenPattern,
    DangerousPattern,
    TooManyFiles,
    TooManyLines,
    TooManyHunks,
}

/// A single policy violation found in a proposed patch.
///
/// Produced fresh per evaluation and retained only inside the owning
/// [`crate::domain::session::Attempt`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyViolation {
    /// What rule was broken.
    pub kind: ViolationKind,

    /// Offending file path, when the violation is file-scoped.
    pub path: Option<String>,

    /// Offending line in the patched file, when line-scoped.
    pub line: Option<u32>,

    /// Human-readable explanation.
    pub detail: String,

    /// Whether this violation rejects the patch. Dangerous-class findings
    /// are non-blocking unless `dangerous_blocking` is set.
    pub blocking: bool,
}

impl PolicyViolation {
    /// Create a blocking violation.
    pub fn blocking(kind: ViolationKind, path: Option<String>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            path,
            line: None,
            detail: detail.into(),
            blocking: true,
        }
    }

    /// Create a warning-level violation.
    pub fn warning(kind: ViolationKind, path: Option<String>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            path,
            line: None,
            detail: detail.into(),
            blocking: false,
        }
    }

    /// Attach a line number.
    pub fn at_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }
}
