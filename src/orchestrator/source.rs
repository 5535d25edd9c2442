use crate::diff::{apply_patch, sanitize, target_path_from_headers};
use crate::error::{PatchError, PatchResult};
use crate::extract::{PayloadKind, Suggestion};
use crate::protocol::{apply_envelope, validate, FileSnapshot, PatchEnvelope, PatchLimits};

/// Anything that turns current file text into validated patched text.
///
/// Free-text suggestions and structured envelopes are two implementations;
/// the orchestrator resolves, reads, previews, and writes either the same way.
pub trait PatchSource {
    /// Short human-readable name for reports
    fn label(&self) -> String;

    /// Paths this source writes, as declared, before workspace lookup
    fn target_paths(&self, fallback: Option<&str>) -> PatchResult<Vec<String>>;

    /// Produce new text for each target.
    ///
    /// `current` holds the existing text of every target that exists, keyed
    /// by declared path. Must not return partial results on failure.
    fn produce(
        &self,
        targets: &[String],
        current: &FileSnapshot,
        limits: &PatchLimits,
    ) -> PatchResult<FileSnapshot>;
}

impl PatchSource for Suggestion {
    fn label(&self) -> String {
        self.description.clone()
    }

    /// Declared target, then diff headers, then the caller's fallback
    fn target_paths(&self, fallback: Option<&str>) -> PatchResult<Vec<String>> {
        let from_headers = || match self.payload_kind() {
            PayloadKind::UnifiedDiff => target_path_from_headers(&self.payload),
            PayloadKind::FullRewrite => None,
        };
        self.target_file_path
            .clone()
            .filter(|p| !p.trim().is_empty())
            .or_else(from_headers)
            .or_else(|| fallback.map(str::to_string))
            .map(|p| vec![p])
            .ok_or(PatchError::TargetUnresolved)
    }

    fn produce(
        &self,
        targets: &[String],
        current: &FileSnapshot,
        limits: &PatchLimits,
    ) -> PatchResult<FileSnapshot> {
        let path = targets.first().ok_or(PatchError::TargetUnresolved)?;
        let original = current.get(path).map(String::as_str).unwrap_or("");

        let patched = match self.payload_kind() {
            PayloadKind::UnifiedDiff => {
                let clean = sanitize(&self.payload).ok_or_else(|| {
                    PatchError::invalid("diff has no valid headers and hunks after sanitizing")
                })?;
                apply_patch(original, &clean)?
            }
            PayloadKind::FullRewrite => {
                let chars = self.payload.trim().chars().count();
                if chars < limits.min_rewrite_chars {
                    return Err(PatchError::invalid(format!(
                        "replacement content is only {} characters; refusing a probably corrupt rewrite",
                        chars
                    )));
                }
                self.payload.clone()
            }
        };

        Ok(FileSnapshot::from([(path.clone(), patched)]))
    }
}

impl PatchSource for PatchEnvelope {
    fn label(&self) -> String {
        if self.summary.trim().is_empty() {
            format!("{} structured edit(s)", self.edits.len())
        } else {
            self.summary.clone()
        }
    }

    fn target_paths(&self, _fallback: Option<&str>) -> PatchResult<Vec<String>> {
        Ok(self.edited_paths())
    }

    /// Validate against the current snapshot, then apply all-or-nothing
    fn produce(
        &self,
        _targets: &[String],
        current: &FileSnapshot,
        limits: &PatchLimits,
    ) -> PatchResult<FileSnapshot> {
        let report = validate(self, current, limits);
        if !report.is_valid() {
            for message in report.messages() {
                tracing::warn!(reason = %message, "envelope rejected");
            }
        }
        report.into_result()?;
        apply_envelope(self, current)
    }
}
