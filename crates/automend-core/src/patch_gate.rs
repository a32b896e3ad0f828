//! Policy gate: deterministic admissibility check over a proposed diff.
//!
//! `evaluate_patch` is a pure function of the diff text and the active
//! [`PolicyConfig`]. Every applicable check runs (no short-circuiting) so a
//! single rejected attempt carries full diagnostic detail, and the result is
//! sorted by (file path, violation kind, line) for reproducible reporting.
//!
//! Pattern entries are literal substrings unless prefixed with `re:`, in
//! which case the remainder is compiled as a regular expression.

use regex::Regex;

use crate::diff::{FilePatch, FileStatus, PatchSet};
use crate::domain::{PolicyConfig, PolicyViolation, ViolationKind};

/// Evaluate a proposed diff against the policy.
///
/// Returns every violation found; an empty list means the diff is
/// admissible. Whether the list rejects the diff is decided by
/// [`is_blocked`], since dangerous-class findings may be warning-only.
pub fn evaluate_patch(diff_text: &str, policy: &PolicyConfig) -> Vec<PolicyViolation> {
    let patch = match PatchSet::parse(diff_text) {
        Ok(patch) => patch,
        Err(err) => {
            return vec![PolicyViolation::blocking(
                ViolationKind::MalformedDiff,
                None,
                err.to_string(),
            )];
        }
    };

    let mut violations = Vec::new();
    let forbidden = compile_patterns(&policy.forbidden_patterns);
    let dangerous = compile_patterns(&policy.dangerous_patterns);

    for file in &patch.files {
        check_paths(file, policy, &mut violations);
        check_file_operations(file, policy, &mut violations);
        check_line_patterns(file, policy, &forbidden, &dangerous, &mut violations);

        if file.hunk_count() > policy.max_hunks_per_file {
            violations.push(PolicyViolation::blocking(
                ViolationKind::TooManyHunks,
                Some(file.path().to_string()),
                format!(
                    "{} hunks in one file > max allowed {}",
                    file.hunk_count(),
                    policy.max_hunks_per_file
                ),
            ));
        }
    }

    let stats = patch.stats();
    if stats.files_changed > policy.max_files_changed {
        violations.push(PolicyViolation::blocking(
            ViolationKind::TooManyFiles,
            None,
            format!(
                "{} files changed > max allowed {}",
                stats.files_changed, policy.max_files_changed
            ),
        ));
    }
    if stats.total_lines_changed() > policy.max_lines_changed {
        violations.push(PolicyViolation::blocking(
            ViolationKind::TooManyLines,
            None,
            format!(
                "{} lines changed > max allowed {}",
                stats.total_lines_changed(),
                policy.max_lines_changed
            ),
        ));
    }

    violations.sort_by(|a, b| {
        (&a.path, a.kind, a.line, &a.detail).cmp(&(&b.path, b.kind, b.line, &b.detail))
    });
    violations
}

/// Whether a violation list rejects the diff outright.
pub fn is_blocked(violations: &[PolicyViolation]) -> bool {
    violations.iter().any(|v| v.blocking)
}

// ---------------------------------------------------------------------------
// Per-file checks
// ---------------------------------------------------------------------------

fn check_paths(file: &FilePatch, policy: &PolicyConfig, out: &mut Vec<PolicyViolation>) {
    let path = file.path();

    for pattern in &policy.forbidden_paths {
        if path_matches(pattern, path) {
            out.push(PolicyViolation::blocking(
                ViolationKind::ForbiddenPath,
                Some(path.to_string()),
                format!("forbidden path modified (rule: {pattern})"),
            ));
            break;
        }
    }

    // Test directories are always-forbidden when test modifications are off,
    // regardless of forbidden_paths membership.
    if !policy.allow_test_modifications {
        for pattern in &policy.test_path_patterns {
            if path_matches(pattern, path) {
                out.push(PolicyViolation::blocking(
                    ViolationKind::TestModificationNotAllowed,
                    Some(path.to_string()),
                    format!("test path modified (rule: {pattern})"),
                ));
                break;
            }
        }
    }

    if !policy.allow_dependency_changes {
        let file_name = path.rsplit('/').next().unwrap_or(path);
        if policy
            .protected_dependency_files
            .iter()
            .any(|dep| dep == file_name)
        {
            out.push(PolicyViolation::blocking(
                ViolationKind::DependencyChangeNotAllowed,
                Some(path.to_string()),
                "dependency manifest modified".to_string(),
            ));
        }
    }
}

fn check_file_operations(file: &FilePatch, policy: &PolicyConfig, out: &mut Vec<PolicyViolation>) {
    match file.status {
        FileStatus::Added if !policy.allow_new_files => {
            out.push(PolicyViolation::blocking(
                ViolationKind::NewFileNotAllowed,
                Some(file.path().to_string()),
                "file creation not allowed".to_string(),
            ));
        }
        FileStatus::Deleted if !policy.allow_file_deletion => {
            out.push(PolicyViolation::blocking(
                ViolationKind::DeletionNotAllowed,
                Some(file.path().to_string()),
                "file deletion not allowed".to_string(),
            ));
        }
        _ => {}
    }
}

fn check_line_patterns(
    file: &FilePatch,
    policy: &PolicyConfig,
    forbidden: &[CompiledPattern],
    dangerous: &[CompiledPattern],
    out: &mut Vec<PolicyViolation>,
) {
    let path = file.path();

    for hunk in &file.hunks {
        // Only introductions count: a pattern being deleted is not a
        // violation.
        for (line_no, content) in hunk.added_lines() {
            for pattern in forbidden {
                if pattern.matches(content) {
                    out.push(
                        PolicyViolation::blocking(
                            ViolationKind::ForbiddenPattern,
                            Some(path.to_string()),
                            format!("forbidden pattern added: '{}'", pattern.source),
                        )
                        .at_line(line_no),
                    );
                }
            }
            for pattern in dangerous {
                if pattern.matches(content) {
                    out.push(
                        dangerous_violation(
                            policy,
                            path,
                            format!("dangerous pattern added: '{}'", pattern.source),
                        )
                        .at_line(line_no),
                    );
                }
            }
        }

        for (line_no, content) in hunk.removed_lines() {
            if content.to_lowercase().contains("assert") {
                out.push(
                    dangerous_violation(policy, path, "assertion removed".to_string())
                        .at_line(line_no),
                );
            }
        }
    }
}

fn dangerous_violation(policy: &PolicyConfig, path: &str, detail: String) -> PolicyViolation {
    if policy.dangerous_blocking {
        PolicyViolation::blocking(ViolationKind::DangerousPattern, Some(path.to_string()), detail)
    } else {
        PolicyViolation::warning(ViolationKind::DangerousPattern, Some(path.to_string()), detail)
    }
}

// ---------------------------------------------------------------------------
// Matching primitives
// ---------------------------------------------------------------------------

struct CompiledPattern {
    source: String,
    regex: Option<Regex>,
}

impl CompiledPattern {
    fn matches(&self, content: &str) -> bool {
        match &self.regex {
            Some(re) => re.is_match(content),
            None => content.contains(&self.source),
        }
    }
}

fn compile_patterns(patterns: &[String]) -> Vec<CompiledPattern> {
    patterns
        .iter()
        .map(|p| match p.strip_prefix("re:") {
            Some(expr) => CompiledPattern {
                source: p.clone(),
                regex: Regex::new(expr).ok(),
            },
            None => CompiledPattern {
                source: p.clone(),
                regex: None,
            },
        })
        .collect()
}

/// Match a path rule against a normalized repo-relative path.
///
/// Supported forms:
/// - plain prefix (`tests/`, `.gitlab-ci`), also matched at any depth
/// - `dir/**` recursive prefix
/// - single-segment globs (`*.lock`), matched against the file name when the
///   rule has no `/`, against the whole path otherwise
fn path_matches(pattern: &str, path: &str) -> bool {
    let pattern = pattern.trim_start_matches('/');

    if let Some(prefix) = pattern.strip_suffix("/**") {
        let dir = format!("{prefix}/");
        return path.starts_with(&dir) || path.contains(&format!("/{dir}"));
    }

    if pattern.contains('*') {
        let target = if pattern.contains('/') {
            path
        } else {
            path.rsplit('/').next().unwrap_or(path)
        };
        return glob_match(pattern, target);
    }

    path.starts_with(pattern) || path.contains(&format!("/{pattern}"))
}

/// Minimal glob: `*` matches within one path segment.
fn glob_match(pattern: &str, target: &str) -> bool {
    let mut regex = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => regex.push_str("[^/]*"),
            c => regex.push_str(&regex::escape(&c.to_string())),
        }
    }
    regex.push('$');
    Regex::new(&regex).map(|re| re.is_match(target)).unwrap_or(false)
}
