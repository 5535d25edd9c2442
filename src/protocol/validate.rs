use super::{FileSnapshot, PatchEnvelope, PatchLimits, PatchOperation};
use crate::error::{ErrorKind, PatchError, PatchResult};
use crate::util::{content_hash, line_count};
use serde::Serialize;

/// Every problem found in one envelope, in the order checks ran
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub errors: Vec<PatchError>,
}

#[derive(Serialize)]
struct WireReport {
    valid: bool,
    errors: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn messages(&self) -> Vec<String> {
        self.errors.iter().map(PatchError::user_message).collect()
    }

    pub fn has_kind(&self, kind: ErrorKind) -> bool {
        self.errors.iter().any(|e| e.kind() == kind)
    }

    /// `{valid, errors}` as JSON
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(WireReport {
            valid: self.is_valid(),
            errors: self.messages(),
        })
        .unwrap_or(serde_json::Value::Null)
    }

    /// Collapse into the single error the envelope is rejected with.
    ///
    /// Staleness outranks budget, which outranks everything else.
    pub fn into_result(self) -> PatchResult<()> {
        if self.errors.is_empty() {
            return Ok(());
        }
        let rank = |e: &PatchError| match e.kind() {
            ErrorKind::StaleFile => 0,
            ErrorKind::BudgetExceeded => 1,
            _ => 2,
        };
        let mut errors = self.errors;
        errors.sort_by_key(rank);
        Err(errors.swap_remove(0))
    }
}

/// Check an envelope against the current text of the files it targets.
///
/// All checks run and accumulate; nothing short-circuits except an empty
/// edit list. Bounds of an edit whose target is missing are not checked.
pub fn validate(
    envelope: &PatchEnvelope,
    current: &FileSnapshot,
    limits: &PatchLimits,
) -> ValidationReport {
    let mut errors = Vec::new();

    if envelope.edits.is_empty() {
        errors.push(PatchError::invalid("envelope contains no edits"));
        return ValidationReport { errors };
    }

    let mut total_lines: i64 = 0;

    for edit in &envelope.edits {
        let path = edit.file_path.as_str();
        let text = current.get(path);

        if edit.operation != PatchOperation::Create && text.is_none() {
            errors.push(PatchError::invalid(format!("file not found: {}", path)));
            continue;
        }
        let file_lines = text.map(|t| line_count(t)).unwrap_or(0) as i64;
        let op = edit.operation.label();

        match edit.operation {
            PatchOperation::Replace | PatchOperation::Delete => {
                if edit.start_line < 1 {
                    errors.push(PatchError::invalid(format!(
                        "invalid start_line {} for {} in {} (must be >= 1)",
                        edit.start_line, op, path
                    )));
                }
                match edit.end_line {
                    None => errors.push(PatchError::invalid(format!(
                        "missing end_line for {} in {}",
                        op, path
                    ))),
                    Some(end) => {
                        if end < edit.start_line {
                            errors.push(PatchError::invalid(format!(
                                "end_line ({}) < start_line ({}) in {}",
                                end, edit.start_line, path
                            )));
                        }
                        if end > file_lines {
                            errors.push(PatchError::invalid(format!(
                                "end_line ({}) exceeds file length ({}) in {}",
                                end, file_lines, path
                            )));
                        }
                    }
                }
            }
            PatchOperation::InsertAfter => {
                if edit.start_line < 0 {
                    errors.push(PatchError::invalid(format!(
                        "invalid start_line {} for insert_after in {} (must be >= 0)",
                        edit.start_line, path
                    )));
                }
                if edit.start_line > file_lines {
                    errors.push(PatchError::invalid(format!(
                        "start_line ({}) exceeds file length ({}) in {}",
                        edit.start_line, file_lines, path
                    )));
                }
            }
            PatchOperation::Create => {}
        }

        if let Some(span) = edit.budget_lines() {
            if span > limits.max_edit_lines as i64 {
                errors.push(PatchError::BudgetExceeded(format!(
                    "{} in {} spans {} lines (limit {})",
                    op, path, span, limits.max_edit_lines
                )));
            }
            total_lines += span.max(0);
        }

        if edit.content.as_deref().is_some_and(|c| c.contains("```")) {
            errors.push(PatchError::invalid(format!(
                "content contains markdown fences in {}",
                path
            )));
        }
    }

    if total_lines > limits.max_total_lines as i64 {
        errors.push(PatchError::BudgetExceeded(format!(
            "total modified lines ({}) exceeds limit ({})",
            total_lines, limits.max_total_lines
        )));
    }

    if let Some(expected) = envelope.expected_hash() {
        for path in envelope.edited_paths() {
            let creates_only = envelope
                .edits
                .iter()
                .filter(|e| e.file_path == path)
                .all(|e| e.operation == PatchOperation::Create);
            if creates_only {
                continue;
            }
            let Some(text) = current.get(&path) else {
                continue;
            };
            let actual = content_hash(text);
            if !actual.eq_ignore_ascii_case(expected.trim()) {
                errors.push(PatchError::StaleFile {
                    path,
                    expected: expected.trim().to_string(),
                    actual,
                });
            }
        }
    }

    if !errors.is_empty() {
        tracing::debug!(count = errors.len(), "envelope failed validation");
    }
    ValidationReport { errors }
}
