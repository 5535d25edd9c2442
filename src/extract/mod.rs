//! Recover structured findings and candidate edits from raw model text
//!
//! The model answers in loosely structured markdown. Extraction runs a
//! fixed sequence of strategies, most specific first:
//!
//! 1. section parsing (`sections`) for summary, thinking, and recommendations
//! 2. diff-block harvesting (`blocks`) for fenced unified diffs
//! 3. full-rewrite selection (`rewrite`) when no diff block qualified
//!
//! Each strategy is a plain function that can be exercised on its own.

mod blocks;
mod rewrite;
mod sections;


pub use blocks::{fenced_blocks, harvest_diff_blocks, FencedBlock};
pub use rewrite::{full_rewrite_fallback, is_likely_code, FULL_REWRITE_DESCRIPTION};
pub use sections::{parse_sections, Sections};

use crate::diff::is_unified_diff;
use crate::error::{PatchError, PatchResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a suggestion's payload turned out to be once classified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayloadKind {
    UnifiedDiff,
    FullRewrite,
}

impl PayloadKind {
    pub fn label(&self) -> &'static str {
        match self {
            PayloadKind::UnifiedDiff => "diff",
            PayloadKind::FullRewrite => "rewrite",
        }
    }
}

/// One candidate fix pulled out of a model response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub id: Uuid,
    pub description: String,
    /// Either unified-diff text or full replacement file content
    pub payload: String,
    /// Declared by diff headers or a file marker preceding the block
    pub target_file_path: Option<String>,
}

impl Suggestion {
    pub fn new(description: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            description: description.into(),
            payload: payload.into(),
            target_file_path: None,
        }
    }

    pub fn with_target(mut self, path: Option<String>) -> Self {
        self.target_file_path = path;
        self
    }

    pub fn payload_kind(&self) -> PayloadKind {
        if is_unified_diff(&self.payload) {
            PayloadKind::UnifiedDiff
        } else {
            PayloadKind::FullRewrite
        }
    }
}

/// Structured output recovered from one model response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedReport {
    pub summary: Option<String>,
    pub thought_process: Option<String>,
    /// Same bullets as `recommendations`; the model labels one list two ways
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
    pub suggestions: Vec<Suggestion>,
}

impl ExtractedReport {
    /// Nothing left to fix
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty() && self.suggestions.is_empty()
    }

    pub fn summary_or_default(&self) -> &str {
        self.summary.as_deref().unwrap_or("Analysis Completed")
    }
}

type SuggestionStrategy = fn(&str) -> Option<Vec<Suggestion>>;

/// Suggestion strategies in priority order; the first to yield anything wins
const SUGGESTION_STRATEGIES: &[(&str, SuggestionStrategy)] = &[
    ("diff-blocks", harvest_diff_blocks),
    ("full-rewrite", full_rewrite_fallback),
];

/// Extract a report from raw model text.
///
/// Finding no suggestions is a normal outcome. Only text with no usable
/// summary, recommendations, or code at all is an error.
pub fn extract(text: &str) -> PatchResult<ExtractedReport> {
    if text.trim().is_empty() {
        return Err(PatchError::ExtractionEmpty);
    }

    let sections = parse_sections(text);
    let mut suggestions = Vec::new();
    for (name, strategy) in SUGGESTION_STRATEGIES {
        if let Some(found) = strategy(text) {
            tracing::debug!(strategy = name, count = found.len(), "suggestions extracted");
            suggestions = found;
            break;
        }
    }

    if sections.summary.is_none() && sections.recommendations.is_empty() && suggestions.is_empty()
    {
        tracing::warn!(
            chars = text.len(),
            preview = %crate::util::truncate(text.trim(), 120),
            "no extractable content in model response"
        );
        return Err(PatchError::ExtractionEmpty);
    }

    Ok(ExtractedReport {
        summary: sections.summary,
        thought_process: sections.thought_process,
        issues: sections.recommendations.clone(),
        recommendations: sections.recommendations,
        suggestions,
    })
}
