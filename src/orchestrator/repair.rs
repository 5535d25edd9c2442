use super::PatchOrchestrator;
use crate::analyzer::Analyzer;
use crate::error::{PatchError, PatchResult};
use crate::extract::extract;
use crate::workspace::Workspace;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};

/// What one analyze, extract, apply pass did
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IterationRecord {
    pub number: usize,
    pub summary: String,
    pub issues: usize,
    pub suggestions: usize,
    pub applied: usize,
    pub failed: usize,
    /// Reasons for every suggestion that failed to apply
    pub failures: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RepairOutcome {
    /// An analysis came back with no issues and no suggestions
    Clean,
    /// The loop stopped before reaching a clean analysis
    Stopped(PatchError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RepairReport {
    pub path: String,
    pub iterations: Vec<IterationRecord>,
    pub outcome: RepairOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RepairReport {
    pub fn is_clean(&self) -> bool {
        self.outcome == RepairOutcome::Clean
    }

    pub fn total_applied(&self) -> usize {
        self.iterations.iter().map(|i| i.applied).sum()
    }

    pub fn into_result(self) -> PatchResult<RepairReport> {
        match &self.outcome {
            RepairOutcome::Clean => Ok(self),
            RepairOutcome::Stopped(err) => Err(err.clone()),
        }
    }
}

impl<W: Workspace> PatchOrchestrator<W> {
    /// Re-analyze and patch `path` until an analysis comes back clean.
    ///
    /// Stops with `CouldNotApply` as soon as an iteration finds work but
    /// applies none of it, with `MaxIterations` at the iteration cap, and
    /// with `Cancelled` when `cancel` is set at an iteration boundary.
    /// Only claiming the path can fail outright; every other stop is
    /// reported in the returned report.
    pub async fn repair(
        &self,
        path: &str,
        analyzer: &dyn Analyzer,
        cancel: &AtomicBool,
    ) -> PatchResult<RepairReport> {
        let path = self
            .workspace
            .locate(path)
            .unwrap_or_else(|| path.to_string());
        let _guard = self.begin_repair(&path)?;

        let started_at = Utc::now();
        let mut iterations = Vec::new();
        let outcome = self
            .repair_iterations(&path, analyzer, cancel, &mut iterations)
            .await;

        match &outcome {
            RepairOutcome::Clean => {
                tracing::info!(path = %path, iterations = iterations.len(), "repair finished clean")
            }
            RepairOutcome::Stopped(err) => {
                tracing::warn!(path = %path, kind = err.kind().label(), "repair stopped: {}", err)
            }
        }

        Ok(RepairReport {
            path,
            iterations,
            outcome,
            started_at,
            finished_at: Utc::now(),
        })
    }

    async fn repair_iterations(
        &self,
        path: &str,
        analyzer: &dyn Analyzer,
        cancel: &AtomicBool,
        iterations: &mut Vec<IterationRecord>,
    ) -> RepairOutcome {
        for number in 1..=self.max_iterations {
            if cancel.load(Ordering::SeqCst) {
                return RepairOutcome::Stopped(PatchError::Cancelled {
                    completed_iterations: number - 1,
                });
            }

            let content = match self.workspace.read(path) {
                Ok(content) => content,
                Err(err) => return RepairOutcome::Stopped(err),
            };
            let text = match analyzer.analyze(path, &content).await {
                Ok(text) => text,
                Err(err) => return RepairOutcome::Stopped(PatchError::Analyzer(format!("{:#}", err))),
            };
            let report = match extract(&text) {
                Ok(report) => report,
                Err(err) => return RepairOutcome::Stopped(err),
            };

            if report.is_clean() {
                iterations.push(IterationRecord {
                    number,
                    summary: report.summary_or_default().to_string(),
                    issues: 0,
                    suggestions: 0,
                    applied: 0,
                    failed: 0,
                    failures: Vec::new(),
                });
                return RepairOutcome::Clean;
            }

            let batch = self.apply_batch_with_fallback(&report.suggestions, Some(path));
            tracing::info!(
                iteration = number,
                issues = report.issues.len(),
                applied = batch.succeeded(),
                failed = batch.failed(),
                "repair iteration"
            );
            iterations.push(IterationRecord {
                number,
                summary: report.summary_or_default().to_string(),
                issues: report.issues.len(),
                suggestions: report.suggestions.len(),
                applied: batch.succeeded(),
                failed: batch.failed(),
                failures: batch
                    .failures
                    .iter()
                    .map(|f| format!("{}: {}", f.description, f.error))
                    .collect(),
            });

            if batch.succeeded() == 0 {
                return RepairOutcome::Stopped(PatchError::CouldNotApply {
                    remaining_issues: report.issues.len().max(report.suggestions.len()),
                });
            }
        }

        RepairOutcome::Stopped(PatchError::MaxIterations {
            iterations: self.max_iterations,
        })
    }
}
