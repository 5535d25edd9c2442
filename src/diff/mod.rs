//! Unified diff parsing and application
//!
//! Handles parsing the unified diff format as models actually emit it
//! (missing counts, wrong counts, `a/`/`b/` prefixes, stray prose) and
//! applying it to an in-memory buffer.

mod classify;
mod engine;
mod sanitize;

pub use classify::is_unified_diff;
pub use engine::{apply_diff, apply_patch, HunkApplier};
pub use sanitize::sanitize;

use crate::error::{PatchError, PatchResult};
use regex::Regex;
use std::sync::LazyLock;

static HUNK_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@@\s+-(\d+)(?:,(\d+))?\s+\+(\d+)(?:,(\d+))?\s+@@").expect("valid hunk regex")
});

/// A single line in a diff hunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffLine {
    Context(String),
    Add(String),
    Remove(String),
}

impl DiffLine {
    pub fn content(&self) -> &str {
        match self {
            DiffLine::Context(s) => s,
            DiffLine::Add(s) => s,
            DiffLine::Remove(s) => s,
        }
    }

    /// Whether this line must already exist in the buffer being patched
    pub fn consumes_original(&self) -> bool {
        matches!(self, DiffLine::Context(_) | DiffLine::Remove(_))
    }
}

/// A hunk in a unified diff
#[derive(Debug, Clone, PartialEq)]
pub struct DiffHunk {
    pub old_start: usize,
    pub old_count: usize,
    pub new_start: usize,
    pub new_count: usize,
    pub lines: Vec<DiffLine>,
}

impl DiffHunk {
    /// Get a summary of changes in this hunk
    pub fn summary(&self) -> (usize, usize) {
        let adds = self.lines.iter().filter(|l| matches!(l, DiffLine::Add(_))).count();
        let removes = self.lines.iter().filter(|l| matches!(l, DiffLine::Remove(_))).count();
        (adds, removes)
    }

    /// Lines this hunk removes from the working buffer, counted from the body.
    ///
    /// The header count is ignored: models routinely get it wrong.
    pub fn derived_old_count(&self) -> usize {
        self.lines.iter().filter(|l| l.consumes_original()).count()
    }

    /// Lines this hunk leaves in place of the removed region
    pub fn replacement(&self) -> Vec<String> {
        self.lines
            .iter()
            .filter(|l| !matches!(l, DiffLine::Remove(_)))
            .map(|l| l.content().to_string())
            .collect()
    }

    fn is_pure_insertion(&self) -> bool {
        self.old_count == 0 && self.derived_old_count() == 0
    }
}

/// A parsed unified diff
#[derive(Debug, Clone, PartialEq)]
pub struct UnifiedDiff {
    pub old_path: Option<String>,
    pub new_path: Option<String>,
    pub hunks: Vec<DiffHunk>,
}

impl UnifiedDiff {
    /// Get total additions and deletions
    pub fn stats(&self) -> (usize, usize) {
        self.hunks.iter().fold((0, 0), |acc, h| {
            let (a, r) = h.summary();
            (acc.0 + a, acc.1 + r)
        })
    }

    /// The file this diff writes to, preferring the `+++` side
    pub fn target_path(&self) -> Option<&str> {
        self.new_path.as_deref().or(self.old_path.as_deref())
    }
}

/// Normalize a path taken from a `---`/`+++` header.
///
/// Strips `a/`/`b/` prefixes, quotes, and tab-separated timestamps.
/// `/dev/null` and empty paths yield `None`.
pub fn header_path(raw: &str) -> Option<String> {
    let raw = raw.split('\t').next().unwrap_or("").trim();
    let raw = raw.trim_matches('"');
    if raw.is_empty() || raw == "/dev/null" {
        return None;
    }
    let stripped = raw
        .strip_prefix("a/")
        .or_else(|| raw.strip_prefix("b/"))
        .unwrap_or(raw);
    if stripped.is_empty() {
        None
    } else {
        Some(stripped.to_string())
    }
}

/// Target path declared by a diff's headers, `+++` preferred over `---`.
pub fn target_path_from_headers(diff: &str) -> Option<String> {
    let mut old_path = None;
    for line in diff.lines() {
        let line = line.trim_end_matches('\r');
        if let Some(rest) = line.strip_prefix("+++ ") {
            if let Some(path) = header_path(rest) {
                return Some(path);
            }
        } else if let Some(rest) = line.strip_prefix("--- ") {
            if old_path.is_none() {
                old_path = header_path(rest);
            }
        }
    }
    old_path
}

/// Parse a unified diff string into structured data
pub fn parse_unified_diff(diff: &str) -> PatchResult<UnifiedDiff> {
    let lines: Vec<&str> = diff.lines().map(|l| l.trim_end_matches('\r')).collect();

    let mut old_path = None;
    let mut new_path = None;
    let mut hunks = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];

        if let Some(caps) = HUNK_HEADER.captures(line) {
            let old_start = capture_number(&caps, 1).unwrap_or(0);
            let old_count = capture_number(&caps, 2).unwrap_or(1);
            let new_start = capture_number(&caps, 3).unwrap_or(0);
            let new_count = capture_number(&caps, 4).unwrap_or(1);
            i += 1;
            let body = parse_hunk_body(&lines, &mut i);
            hunks.push(DiffHunk {
                old_start,
                old_count,
                new_start,
                new_count,
                lines: body,
            });
            continue;
        }

        if hunks.is_empty() {
            if let Some(rest) = line.strip_prefix("--- ") {
                old_path = header_path(rest);
            } else if let Some(rest) = line.strip_prefix("+++ ") {
                new_path = header_path(rest);
            }
        }
        i += 1;
    }

    if hunks.is_empty() {
        return Err(PatchError::invalid("no hunk header found in diff"));
    }

    Ok(UnifiedDiff {
        old_path,
        new_path,
        hunks,
    })
}

fn capture_number(caps: &regex::Captures<'_>, idx: usize) -> Option<usize> {
    caps.get(idx).and_then(|m| m.as_str().parse().ok())
}

/// Collect body lines until the next hunk or file header
fn parse_hunk_body(lines: &[&str], idx: &mut usize) -> Vec<DiffLine> {
    let mut body = Vec::new();

    while *idx < lines.len() {
        let line = lines[*idx];

        if line.starts_with("@@") || line.starts_with("diff ") {
            break;
        }
        if line.starts_with("--- ")
            && lines
                .get(*idx + 1)
                .is_some_and(|next| next.starts_with("+++ "))
        {
            break;
        }

        if let Some(rest) = line.strip_prefix('+') {
            body.push(DiffLine::Add(rest.to_string()));
        } else if let Some(rest) = line.strip_prefix('-') {
            body.push(DiffLine::Remove(rest.to_string()));
        } else if let Some(rest) = line.strip_prefix(' ') {
            body.push(DiffLine::Context(rest.to_string()));
        } else if line.is_empty() {
            body.push(DiffLine::Context(String::new()));
        }
        // Skip other lines (like "\ No newline at end of file")

        *idx += 1;
    }

    // Blank lines trailing a hunk are fence/prose spacing, not context
    while matches!(body.last(), Some(DiffLine::Context(s)) if s.is_empty()) {
        body.pop();
    }

    body
}
