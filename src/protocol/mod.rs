//! Structured edit protocol
//!
//! A stricter alternative to diff text: the model answers with a JSON
//! envelope of explicit 1-based line-range edits, bound to the file
//! snapshot it saw by a content hash. Envelopes are validated against hard
//! line budgets before anything is applied, and applied all-or-nothing.

mod apply;
mod parse;
mod validate;

pub use apply::apply_envelope;
pub use parse::{parse_envelope, ParsedEnvelope};
pub use validate::{validate, ValidationReport};

pub use crate::util::content_hash;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// File text keyed by workspace-relative path
pub type FileSnapshot = BTreeMap<String, String>;

/// Line budgets for structured edits and the minimum size of a full rewrite
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchLimits {
    pub max_edit_lines: usize,
    pub max_total_lines: usize,
    pub min_rewrite_chars: usize,
}

impl Default for PatchLimits {
    fn default() -> Self {
        Self {
            max_edit_lines: 50,
            max_total_lines: 80,
            min_rewrite_chars: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchOperation {
    Replace,
    InsertAfter,
    Delete,
    Create,
}

impl PatchOperation {
    pub fn label(&self) -> &'static str {
        match self {
            PatchOperation::Replace => "replace",
            PatchOperation::InsertAfter => "insert_after",
            PatchOperation::Delete => "delete",
            PatchOperation::Create => "create",
        }
    }

    /// Operations that address an inclusive `start_line..=end_line` range
    pub fn is_ranged(&self) -> bool {
        matches!(self, PatchOperation::Replace | PatchOperation::Delete)
    }
}

/// One explicit edit to one file.
///
/// Line numbers are signed so that a model answering `-1` is reported by
/// the validator instead of failing deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEdit {
    pub file_path: String,
    pub operation: PatchOperation,
    /// 1-based first line for replace/delete; line to insert after (0 = top) for insert_after
    #[serde(default)]
    pub start_line: i64,
    /// 1-based inclusive last line, required for replace/delete
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_line: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default)]
    pub explanation: String,
}

impl FileEdit {
    /// Lines counted against the edit budget.
    ///
    /// Ranged operations count the range they touch; insertions and
    /// creations count the lines they add.
    pub fn budget_lines(&self) -> Option<i64> {
        if self.operation.is_ranged() {
            self.end_line.map(|end| end - self.start_line + 1)
        } else {
            Some(self.content_lines() as i64)
        }
    }

    pub fn content_lines(&self) -> usize {
        self.content.as_deref().map(crate::util::line_count).unwrap_or(0)
    }
}

/// A set of edits produced against one snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchEnvelope {
    /// Hex SHA-256 of the analyzed file; checked against every non-create target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_hash: Option<String>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub edits: Vec<FileEdit>,
}

impl PatchEnvelope {
    /// Hash to check, ignoring an empty string some models emit
    pub fn expected_hash(&self) -> Option<&str> {
        self.file_hash.as_deref().filter(|h| !h.trim().is_empty())
    }

    /// Distinct target paths in first-seen order
    pub fn edited_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = Vec::new();
        for edit in &self.edits {
            if !paths.contains(&edit.file_path) {
                paths.push(edit.file_path.clone());
            }
        }
        paths
    }
}
