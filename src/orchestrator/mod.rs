//! Patch orchestration
//!
//! Drives one suggestion or envelope through resolve target, read, patch,
//! and persist. Batches never abort on a single failure. The repair loop
//! (`repair`) repeats analyze, extract, and apply until the file is clean.

mod repair;
mod source;

pub use repair::{IterationRecord, RepairOutcome, RepairReport};
pub use source::PatchSource;

use crate::error::{PatchError, PatchResult};
use crate::extract::Suggestion;
use crate::protocol::{FileSnapshot, PatchLimits};
use crate::workspace::Workspace;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// One file a patch touches
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileChange {
    /// Resolved workspace path
    pub path: String,
    /// `None` when the patch creates the file
    pub before: Option<String>,
    pub after: String,
}

impl FileChange {
    pub fn is_noop(&self) -> bool {
        self.before.as_deref() == Some(self.after.as_str())
    }
}

/// Patched text for every target, not yet written
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatchPreview {
    pub label: String,
    pub changes: Vec<FileChange>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchFailure {
    pub suggestion_id: Uuid,
    pub description: String,
    pub error: PatchError,
}

/// Outcome of applying suggestions independently
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub applied: Vec<PatchPreview>,
    pub failures: Vec<BatchFailure>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.applied.len()
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn summary(&self) -> String {
        format!("applied {}, failed {}", self.succeeded(), self.failed())
    }
}

/// Held while a repair loop owns a path; releases it on drop
#[derive(Debug)]
pub struct RepairGuard<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    path: String,
}

impl Drop for RepairGuard<'_> {
    fn drop(&mut self) {
        lock(self.in_flight).remove(&self.path);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct PatchOrchestrator<W: Workspace> {
    workspace: W,
    limits: PatchLimits,
    max_iterations: usize,
    last_analyzed: Mutex<Option<String>>,
    in_flight: Mutex<HashSet<String>>,
}

impl<W: Workspace> PatchOrchestrator<W> {
    pub fn new(workspace: W) -> Self {
        Self {
            workspace,
            limits: PatchLimits::default(),
            max_iterations: 5,
            last_analyzed: Mutex::new(None),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_limits(mut self, limits: PatchLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn workspace(&self) -> &W {
        &self.workspace
    }

    pub fn limits(&self) -> &PatchLimits {
        &self.limits
    }

    /// Remember the file last sent for analysis; suggestions without a
    /// resolvable target fall back to it
    pub fn set_last_analyzed(&self, path: impl Into<String>) {
        *lock(&self.last_analyzed) = Some(path.into());
    }

    pub fn last_analyzed(&self) -> Option<String> {
        lock(&self.last_analyzed).clone()
    }

    /// Claim `path` for a repair loop, failing if one is already running
    pub fn begin_repair(&self, path: &str) -> PatchResult<RepairGuard<'_>> {
        let mut in_flight = lock(&self.in_flight);
        if !in_flight.insert(path.to_string()) {
            return Err(PatchError::RepairInFlight(path.into()));
        }
        Ok(RepairGuard {
            in_flight: &self.in_flight,
            path: path.to_string(),
        })
    }

    /// Compute what `source` would write, without writing it
    pub fn preview<S: PatchSource + ?Sized>(&self, source: &S) -> PatchResult<PatchPreview> {
        let fallback = self.last_analyzed();
        self.preview_with_fallback(source, fallback.as_deref())
    }

    /// Like [`Self::preview`], with the target for unlabeled suggestions given explicitly
    pub fn preview_with_fallback<S: PatchSource + ?Sized>(
        &self,
        source: &S,
        fallback: Option<&str>,
    ) -> PatchResult<PatchPreview> {
        self.preview_over(source, fallback, &FileSnapshot::new())
    }

    /// Preview against the workspace as seen through `overlay`, keyed by resolved path
    fn preview_over<S: PatchSource + ?Sized>(
        &self,
        source: &S,
        fallback: Option<&str>,
        overlay: &FileSnapshot,
    ) -> PatchResult<PatchPreview> {
        let declared = source.target_paths(fallback)?;

        let mut resolved = Vec::with_capacity(declared.len());
        let mut current = FileSnapshot::new();
        for path in &declared {
            let actual = self
                .workspace
                .locate(path)
                .or_else(|| overlay.contains_key(path).then(|| path.clone()))
                .unwrap_or_else(|| path.clone());
            if let Some(text) = overlay.get(&actual) {
                current.insert(path.clone(), text.clone());
            } else if self.workspace.exists(&actual) {
                current.insert(path.clone(), self.workspace.read(&actual)?);
            }
            resolved.push((path.clone(), actual));
        }

        let mut patched = source.produce(&declared, &current, &self.limits)?;

        let changes = resolved
            .into_iter()
            .filter_map(|(declared, actual)| {
                let after = patched.remove(&declared)?;
                Some(FileChange {
                    path: actual,
                    before: current.remove(&declared),
                    after,
                })
            })
            .collect();

        Ok(PatchPreview {
            label: source.label(),
            changes,
        })
    }

    /// Write every change in a preview, rolling back on the first failure
    pub fn commit(&self, preview: &PatchPreview) -> PatchResult<()> {
        for (idx, change) in preview.changes.iter().enumerate() {
            if change.is_noop() {
                continue;
            }
            if let Err(err) = self.workspace.write(&change.path, &change.after) {
                tracing::warn!(path = %change.path, error = %err, "write failed, rolling back");
                for done in preview.changes[..idx].iter().rev() {
                    let restored = match &done.before {
                        Some(before) => self.workspace.write(&done.path, before),
                        None => self.workspace.remove(&done.path),
                    };
                    if let Err(rollback) = restored {
                        tracing::error!(path = %done.path, error = %rollback, "rollback failed");
                    }
                }
                return Err(err);
            }
        }
        Ok(())
    }

    /// Preview then commit any patch source
    pub fn apply<S: PatchSource + ?Sized>(&self, source: &S) -> PatchResult<PatchPreview> {
        let fallback = self.last_analyzed();
        self.apply_with_fallback(source, fallback.as_deref())
    }

    pub fn apply_with_fallback<S: PatchSource + ?Sized>(
        &self,
        source: &S,
        fallback: Option<&str>,
    ) -> PatchResult<PatchPreview> {
        let preview = self.preview_with_fallback(source, fallback)?;
        self.commit(&preview)?;
        tracing::info!(
            label = %preview.label,
            files = preview.changes.len(),
            "patch applied"
        );
        Ok(preview)
    }

    /// Apply one suggestion; any failure leaves the file untouched
    pub fn apply_suggestion(&self, suggestion: &Suggestion) -> PatchResult<PatchPreview> {
        self.apply(suggestion)
    }

    /// Apply suggestions one after another, each against the file as the
    /// previous ones left it. A failure is recorded and the batch moves on.
    pub fn apply_batch(&self, suggestions: &[Suggestion]) -> BatchReport {
        let fallback = self.last_analyzed();
        self.apply_batch_with_fallback(suggestions, fallback.as_deref())
    }

    /// [`Self::apply_batch`] with the target for unlabeled suggestions given explicitly
    pub fn apply_batch_with_fallback(&self, suggestions: &[Suggestion], fallback: Option<&str>) -> BatchReport {
        let report = run_batch(suggestions, |s| self.apply_with_fallback(s, fallback));
        tracing::info!(
            applied = report.succeeded(),
            failed = report.failed(),
            "batch finished"
        );
        report
    }

    /// What [`Self::apply_batch`] would do, without writing anything.
    ///
    /// Each suggestion sees the files as the earlier ones in the batch
    /// would have left them.
    pub fn dry_run_batch(&self, suggestions: &[Suggestion], fallback: Option<&str>) -> BatchReport {
        let mut overlay = FileSnapshot::new();
        let report = run_batch(suggestions, |s| {
            let preview = self.preview_over(s, fallback, &overlay)?;
            for change in &preview.changes {
                overlay.insert(change.path.clone(), change.after.clone());
            }
            Ok(preview)
        });
        tracing::info!(
            would_apply = report.succeeded(),
            failed = report.failed(),
            "dry run finished"
        );
        report
    }
}

fn run_batch<F>(suggestions: &[Suggestion], mut step: F) -> BatchReport
where
    F: FnMut(&Suggestion) -> PatchResult<PatchPreview>,
{
    let mut report = BatchReport::default();
    for suggestion in suggestions {
        match step(suggestion) {
            Ok(preview) => report.applied.push(preview),
            Err(error) => {
                tracing::warn!(
                    suggestion = %suggestion.description,
                    error = %error,
                    "suggestion skipped"
                );
                report.failures.push(BatchFailure {
                    suggestion_id: suggestion.id,
                    description: suggestion.description.clone(),
                    error,
                });
            }
        }
    }
    report
}

#[cfg(test)]
mod tests;
