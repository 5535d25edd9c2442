//! Error kinds for patch reconciliation
//!
//! Every rejection path carries a reason string that can be shown to a user.

use std::fmt;
use std::path::PathBuf;

/// Coarse classification of a failure, used by callers deciding how to recover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ExtractionEmpty,
    InvalidPatch,
    StaleFile,
    BudgetExceeded,
    TargetUnresolved,
    Io,
    Analyzer,
    RepairInFlight,
    CouldNotApply,
    MaxIterations,
    Cancelled,
}

impl ErrorKind {
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::ExtractionEmpty => "extraction-empty",
            ErrorKind::InvalidPatch => "invalid-patch",
            ErrorKind::StaleFile => "stale-file",
            ErrorKind::BudgetExceeded => "budget-exceeded",
            ErrorKind::TargetUnresolved => "target-unresolved",
            ErrorKind::Io => "io",
            ErrorKind::Analyzer => "analyzer",
            ErrorKind::RepairInFlight => "repair-in-flight",
            ErrorKind::CouldNotApply => "could-not-apply",
            ErrorKind::MaxIterations => "max-iterations",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchError {
    /// The model text held nothing usable
    ExtractionEmpty,
    /// A diff failed classification, sanitization, or application
    InvalidPatch(String),
    /// A structured envelope was produced against different file content
    StaleFile {
        path: String,
        expected: String,
        actual: String,
    },
    /// A structured envelope exceeded the per-edit or total line budget
    BudgetExceeded(String),
    /// No file could be determined for a suggestion
    TargetUnresolved,
    /// Reading or writing a file failed
    Io { path: PathBuf, message: String },
    /// The text-generation collaborator failed or timed out
    Analyzer(String),
    /// Another repair loop already owns this file
    RepairInFlight(PathBuf),
    /// A repair iteration found work but could not apply any of it
    CouldNotApply { remaining_issues: usize },
    /// The repair loop hit its iteration cap
    MaxIterations { iterations: usize },
    /// The caller cancelled the repair loop between iterations
    Cancelled { completed_iterations: usize },
}

impl PatchError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        PatchError::InvalidPatch(reason.into())
    }

    pub fn io(path: impl Into<PathBuf>, err: impl fmt::Display) -> Self {
        PatchError::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PatchError::ExtractionEmpty => ErrorKind::ExtractionEmpty,
            PatchError::InvalidPatch(_) => ErrorKind::InvalidPatch,
            PatchError::StaleFile { .. } => ErrorKind::StaleFile,
            PatchError::BudgetExceeded(_) => ErrorKind::BudgetExceeded,
            PatchError::TargetUnresolved => ErrorKind::TargetUnresolved,
            PatchError::Io { .. } => ErrorKind::Io,
            PatchError::Analyzer(_) => ErrorKind::Analyzer,
            PatchError::RepairInFlight(_) => ErrorKind::RepairInFlight,
            PatchError::CouldNotApply { .. } => ErrorKind::CouldNotApply,
            PatchError::MaxIterations { .. } => ErrorKind::MaxIterations,
            PatchError::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    /// Returns a user-friendly message for display
    pub fn user_message(&self) -> String {
        match self {
            Self::ExtractionEmpty => {
                "The model response contained no summary, issues, or code to apply.".into()
            }
            Self::InvalidPatch(reason) => format!("Invalid patch: {}", reason),
            Self::StaleFile {
                path,
                expected,
                actual,
            } => format!(
                "File hash mismatch for {}. Expected {}, got {}. File has changed since analysis.",
                path, expected, actual
            ),
            Self::BudgetExceeded(reason) => format!("Edit budget exceeded: {}", reason),
            Self::TargetUnresolved => {
                "Could not determine which file this fix targets, and no fallback file is set."
                    .into()
            }
            Self::Io { path, message } => format!("{}: {}", path.display(), message),
            Self::Analyzer(reason) => format!("Analysis failed: {}", reason),
            Self::RepairInFlight(path) => {
                format!("A repair loop is already running for {}", path.display())
            }
            Self::CouldNotApply { remaining_issues } => format!(
                "Could not apply remaining fixes ({} issue(s) left). Please review manually.",
                remaining_issues
            ),
            Self::MaxIterations { iterations } => format!(
                "Reached max auto-fix iterations ({}). Partial fixes applied.",
                iterations
            ),
            Self::Cancelled {
                completed_iterations,
            } => format!(
                "Repair cancelled after {} iteration(s).",
                completed_iterations
            ),
        }
    }
}

impl fmt::Display for PatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.user_message())
    }
}

impl std::error::Error for PatchError {}

pub type PatchResult<T> = std::result::Result<T, PatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_error_has_a_reason() {
        let errors = [
            PatchError::ExtractionEmpty,
            PatchError::invalid("no hunk header"),
            PatchError::BudgetExceeded("81 > 80".into()),
            PatchError::TargetUnresolved,
            PatchError::CouldNotApply {
                remaining_issues: 1,
            },
        ];
        for err in errors {
            assert!(!err.user_message().trim().is_empty());
            assert!(!err.kind().label().is_empty());
        }
    }

    #[test]
    fn test_stale_file_message_names_both_hashes() {
        let err = PatchError::StaleFile {
            path: "src/main.cpp".into(),
            expected: "abc".into(),
            actual: "def".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("abc") && msg.contains("def"));
        assert_eq!(err.kind(), ErrorKind::StaleFile);
    }
}
