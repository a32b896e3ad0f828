//! Unified diff parsing.
//!
//! Proposed patches arrive as opaque unified-diff text. This module recovers
//! the structure the policy gate needs: per-file hunk boundaries,
//! added/removed line classification, and aggregate statistics. Both bare
//! `---`/`+++` diffs and full `git diff` output (file modes, renames,
//! `/dev/null` sides) are accepted.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::{AutomendError, Result};

/// A single line inside a hunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "content", rename_all = "snake_case")]
pub enum PatchLine {
    Added(String),
    Removed(String),
    Context(String),
}

impl PatchLine {
    pub fn content(&self) -> &str {
        match self {
            PatchLine::Added(s) | PatchLine::Removed(s) | PatchLine::Context(s) => s,
        }
    }

    pub fn is_added(&self) -> bool {
        matches!(self, PatchLine::Added(_))
    }

    pub fn is_removed(&self) -> bool {
        matches!(self, PatchLine::Removed(_))
    }
}

/// One `@@` hunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hunk {
    pub old_start: u32,
    pub old_count: u32,
    pub new_start: u32,
    pub new_count: u32,
    pub lines: Vec<PatchLine>,
}

impl Hunk {
    /// Added lines with their line numbers in the new file.
    pub fn added_lines(&self) -> Vec<(u32, &str)> {
        let mut out = Vec::new();
        let mut new_line = self.new_start;
        for line in &self.lines {
            match line {
                PatchLine::Added(s) => {
                    out.push((new_line, s.as_str()));
                    new_line += 1;
                }
                PatchLine::Context(_) => new_line += 1,
                PatchLine::Removed(_) => {}
            }
        }
        out
    }

    /// Removed lines with their line numbers in the old file.
    pub fn removed_lines(&self) -> Vec<(u32, &str)> {
        let mut out = Vec::new();
        let mut old_line = self.old_start;
        for line in &self.lines {
            match line {
                PatchLine::Removed(s) => {
                    out.push((old_line, s.as_str()));
                    old_line += 1;
                }
                PatchLine::Context(_) => old_line += 1,
                PatchLine::Added(_) => {}
            }
        }
        out
    }
}

/// What a file patch does to its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Modified,
    Added,
    Deleted,
    Renamed,
}

/// All hunks touching one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePatch {
    pub old_path: String,
    pub new_path: String,
    pub status: FileStatus,
    pub hunks: Vec<Hunk>,
}

impl FilePatch {
    /// The path this patch is reported under: the surviving side.
    pub fn path(&self) -> &str {
        match self.status {
            FileStatus::Deleted => &self.old_path,
            _ => &self.new_path,
        }
    }

    pub fn additions(&self) -> usize {
        self.hunks
            .iter()
            .flat_map(|h| &h.lines)
            .filter(|l| l.is_added())
            .count()
    }

    pub fn deletions(&self) -> usize {
        self.hunks
            .iter()
            .flat_map(|h| &h.lines)
            .filter(|l| l.is_removed())
            .count()
    }

    pub fn hunk_count(&self) -> usize {
        self.hunks.len()
    }
}

/// Aggregate statistics over a parsed patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStats {
    pub files_changed: usize,
    pub lines_added: usize,
    pub lines_removed: usize,
}

impl DiffStats {
    pub fn total_lines_changed(&self) -> usize {
        self.lines_added + self.lines_removed
    }
}

/// A fully parsed unified diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchSet {
    pub files: Vec<FilePatch>,
}

impl PatchSet {
    /// Parse unified diff text.
    pub fn parse(text: &str) -> Result<Self> {
        parse_patch(text)
    }

    pub fn stats(&self) -> DiffStats {
        DiffStats {
            files_changed: self.files.len(),
            lines_added: self.files.iter().map(|f| f.additions()).sum(),
            lines_removed: self.files.iter().map(|f| f.deletions()).sum(),
        }
    }
}

fn hunk_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").expect("valid hunk regex")
    })
}

/// Strip the `a/`/`b/` prefix, any `\t` timestamp suffix, and normalize
/// separators. `/dev/null` is passed through untouched.
fn clean_path(raw: &str) -> String {
    let raw = raw.trim();
    if raw == "/dev/null" {
        return raw.to_string();
    }
    let raw = raw.split('\t').next().unwrap_or(raw);
    let raw = raw.replace('\\', "/");
    let raw = raw
        .strip_prefix("a/")
        .or_else(|| raw.strip_prefix("b/"))
        .unwrap_or(&raw);
    raw.trim_start_matches('/').to_string()
}

#[derive(Default)]
struct FileBuilder {
    old_path: Option<String>,
    new_path: Option<String>,
    marked_added: bool,
    marked_deleted: bool,
    marked_renamed: bool,
    hunks: Vec<Hunk>,
}

impl FileBuilder {
    fn is_empty(&self) -> bool {
        self.old_path.is_none()
            && self.new_path.is_none()
            && self.hunks.is_empty()
            && !self.marked_added
            && !self.marked_deleted
            && !self.marked_renamed
    }

    fn finish(self) -> Result<FilePatch> {
        let old_path = self.old_path.unwrap_or_default();
        let new_path = self.new_path.unwrap_or_default();
        if old_path.is_empty() && new_path.is_empty() {
            return Err(AutomendError::MalformedDiff(
                "file entry without --- / +++ paths".into(),
            ));
        }

        let status = if self.marked_added || old_path == "/dev/null" {
            FileStatus::Added
        } else if self.marked_deleted || new_path == "/dev/null" {
            FileStatus::Deleted
        } else if self.marked_renamed || (!old_path.is_empty() && old_path != new_path) {
            FileStatus::Renamed
        } else {
            FileStatus::Modified
        };

        Ok(FilePatch {
            old_path,
            new_path,
            status,
            hunks: self.hunks,
        })
    }
}

fn parse_patch(text: &str) -> Result<PatchSet> {
    if text.trim().is_empty() {
        return Err(AutomendError::MalformedDiff("empty patch".into()));
    }

    let lines: Vec<&str> = text.lines().collect();
    let mut files: Vec<FilePatch> = Vec::new();
    let mut current = FileBuilder::default();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];

        if line.starts_with("diff --git ") {
            if !current.is_empty() {
                files.push(current.finish()?);
            }
            current = FileBuilder::default();
            // Paths from the header serve as a fallback for mode-only entries;
            // --- / +++ lines override them below.
            let mut parts = line["diff --git ".len()..].split_whitespace();
            if let (Some(a), Some(b)) = (parts.next(), parts.next()) {
                current.old_path = Some(clean_path(a));
                current.new_path = Some(clean_path(b));
            }
            i += 1;
        } else if line.starts_with("new file mode") {
            current.marked_added = true;
            i += 1;
        } else if line.starts_with("deleted file mode") {
            current.marked_deleted = true;
            i += 1;
        } else if let Some(rest) = line.strip_prefix("rename from ") {
            current.marked_renamed = true;
            current.old_path = Some(clean_path(rest));
            i += 1;
        } else if let Some(rest) = line.strip_prefix("rename to ") {
            current.marked_renamed = true;
            current.new_path = Some(clean_path(rest));
            i += 1;
        } else if line.starts_with("--- ") {
            // A bare ---/+++ pair (no diff --git header) also starts a file.
            if !current.hunks.is_empty() {
                files.push(current.finish()?);
                current = FileBuilder::default();
            }
            current.old_path = Some(clean_path(&line[4..]));
            i += 1;
        } else if line.starts_with("+++ ") {
            current.new_path = Some(clean_path(&line[4..]));
            i += 1;
        } else if line.starts_with("@@ ") || line.starts_with("@@-") {
            let hunk = parse_hunk(&lines, &mut i)?;
            current.hunks.push(hunk);
        } else {
            // index lines, mode lines, similarity scores, binary notices,
            // commit-message preamble: irrelevant to policy evaluation.
            i += 1;
        }
    }

    if !current.is_empty() {
        files.push(current.finish()?);
    }

    if files.is_empty() {
        return Err(AutomendError::MalformedDiff(
            "patch contains no file changes".into(),
        ));
    }
    if files.iter().all(|f| f.hunks.is_empty())
        && !files
            .iter()
            .any(|f| matches!(f.status, FileStatus::Renamed | FileStatus::Deleted))
    {
        return Err(AutomendError::MalformedDiff("no hunks found".into()));
    }

    Ok(PatchSet { files })
}

fn parse_hunk(lines: &[&str], i: &mut usize) -> Result<Hunk> {
    let header = lines[*i];
    let caps = hunk_header_re()
        .captures(header)
        .ok_or_else(|| AutomendError::MalformedDiff(format!("bad hunk header: {header}")))?;

    let parse_num = |idx: usize, default: u32| -> u32 {
        caps.get(idx)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(default)
    };
    let old_start = parse_num(1, 0);
    let old_count = parse_num(2, 1);
    let new_start = parse_num(3, 0);
    let new_count = parse_num(4, 1);

    *i += 1;
    let mut hunk_lines = Vec::new();
    let mut old_remaining = old_count;
    let mut new_remaining = new_count;

    // Consume exactly the lines the header promised; counting avoids
    // misreading removed lines that begin with dashes.
    while (old_remaining > 0 || new_remaining > 0) && *i < lines.len() {
        let line = lines[*i];
        if let Some(content) = line.strip_prefix('+') {
            hunk_lines.push(PatchLine::Added(content.to_string()));
            new_remaining = new_remaining.saturating_sub(1);
        } else if let Some(content) = line.strip_prefix('-') {
            hunk_lines.push(PatchLine::Removed(content.to_string()));
            old_remaining = old_remaining.saturating_sub(1);
        } else if line.starts_with('\\') {
            // "\ No newline at end of file"
        } else if line.is_empty() || line.starts_with(' ') {
            let content = line.strip_prefix(' ').unwrap_or(line);
            hunk_lines.push(PatchLine::Context(content.to_string()));
            old_remaining = old_remaining.saturating_sub(1);
            new_remaining = new_remaining.saturating_sub(1);
        } else {
            return Err(AutomendError::MalformedDiff(format!(
                "unexpected line inside hunk: {line}"
            )));
        }
        *i += 1;
    }

    if old_remaining > 0 || new_remaining > 0 {
        return Err(AutomendError::MalformedDiff(
            "hunk shorter than its header declares".into(),
        ));
    }

    Ok(Hunk {
        old_start,
        old_count,
        new_start,
        new_count,
        lines: hunk_lines,
    })
}
