use super::*;
use crate::analyzer::Analyzer;
use crate::error::ErrorKind;
use crate::protocol::{content_hash, parse_envelope};
use crate::workspace::MemoryWorkspace;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

const FILE: &str = "src/main.cpp";
const ORIGINAL: &str = "a\nb\nc\n";

fn orchestrator() -> PatchOrchestrator<MemoryWorkspace> {
    PatchOrchestrator::new(MemoryWorkspace::new().with_file(FILE, ORIGINAL))
}

fn diff(hunk: &str) -> Suggestion {
    Suggestion::new(
        "fix",
        format!("--- a/{}\n+++ b/{}\n{}", FILE, FILE, hunk),
    )
}

/// Replays canned responses, then keeps answering with the last one
struct ScriptedAnalyzer {
    responses: Mutex<VecDeque<String>>,
    last: String,
    calls: AtomicUsize,
}

impl ScriptedAnalyzer {
    fn new(responses: &[&str]) -> Self {
        Self {
            responses: Mutex::new(responses.iter().map(|r| r.to_string()).collect()),
            last: responses.last().map(|r| r.to_string()).unwrap_or_default(),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Analyzer for ScriptedAnalyzer {
    fn analyze<'a>(
        &'a self,
        _path: &'a str,
        _content: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.last.clone());
        Box::pin(async move { Ok::<_, anyhow::Error>(next) })
    }
}

struct FailingAnalyzer;

impl Analyzer for FailingAnalyzer {
    fn analyze<'a>(
        &'a self,
        _path: &'a str,
        _content: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>> {
        Box::pin(async { Err::<String, _>(anyhow::anyhow!("rate limited")) })
    }
}

const CLEAN: &str = "# Summary\nNo issues found.";
const UNFIXABLE: &str = "# Summary\nWiring problem.\n\n# Recommendations\n- Check the sensor wiring";

fn fix_response(hunk: &str) -> String {
    format!(
        "# Summary\nOne fix.\n\n# Recommendations\n- apply it\n\nFix:\n```diff\n--- a/{}\n+++ b/{}\n{}\n```\n",
        FILE, FILE, hunk
    )
}

#[test]
fn test_apply_suggestion_writes_file() {
    let orch = orchestrator();
    let preview = orch.apply_suggestion(&diff("@@ -1 +1 @@\n-a\n+A")).unwrap();
    assert_eq!(preview.changes[0].path, FILE);
    assert_eq!(preview.changes[0].before.as_deref(), Some(ORIGINAL));
    assert_eq!(orch.workspace().get(FILE).as_deref(), Some("A\nb\nc\n"));
}

#[test]
fn test_preview_does_not_write() {
    let orch = orchestrator();
    let preview = orch.preview(&diff("@@ -2 +2 @@\n-b\n+B")).unwrap();
    assert_eq!(preview.changes[0].after, "a\nB\nc\n");
    assert_eq!(orch.workspace().get(FILE).as_deref(), Some(ORIGINAL));
}

#[test]
fn test_batch_survives_malformed_diff() {
    let orch = orchestrator();
    let suggestions = vec![
        diff("@@ -1 +1 @@\n-a\n+A"),
        diff("@@ -2 +2 @@\n-zzz\n+yyy"),
        diff("@@ -3 +3 @@\n-c\n+C"),
    ];
    let report = orch.apply_batch(&suggestions);
    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.failed(), 1);
    assert_eq!(report.failures[0].suggestion_id, suggestions[1].id);
    assert_eq!(report.failures[0].error.kind(), ErrorKind::InvalidPatch);
    assert_eq!(report.summary(), "applied 2, failed 1");
    assert_eq!(orch.workspace().get(FILE).as_deref(), Some("A\nb\nC\n"));
}

#[test]
fn test_mismatched_diff_leaves_file_untouched() {
    let orch = orchestrator();
    let err = orch
        .apply_suggestion(&diff("@@ -1,2 +1,2 @@\n-a\n-x\n+A\n+X"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidPatch);
    assert_eq!(orch.workspace().get(FILE).as_deref(), Some(ORIGINAL));
}

#[test]
fn test_rewrite_falls_back_to_last_analyzed_file() {
    let orch = orchestrator();
    let rewrite = Suggestion::new("rewrite", "int main() { return 0; }\n");
    assert_eq!(
        orch.apply_suggestion(&rewrite).unwrap_err().kind(),
        ErrorKind::TargetUnresolved
    );

    orch.set_last_analyzed(FILE);
    orch.apply_suggestion(&rewrite).unwrap();
    assert_eq!(
        orch.workspace().get(FILE).as_deref(),
        Some("int main() { return 0; }\n")
    );
}

#[test]
fn test_short_rewrite_rejected() {
    let orch = orchestrator();
    orch.set_last_analyzed(FILE);
    let err = orch.apply_suggestion(&Suggestion::new("rewrite", "oops")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidPatch);
    assert_eq!(orch.workspace().get(FILE).as_deref(), Some(ORIGINAL));
}

#[test]
fn test_target_resolved_by_suffix() {
    let orch = PatchOrchestrator::new(MemoryWorkspace::new().with_file("firmware/src/main.cpp", ORIGINAL));
    orch.apply_suggestion(&diff("@@ -1 +1 @@\n-a\n+A")).unwrap();
    assert_eq!(
        orch.workspace().get("firmware/src/main.cpp").as_deref(),
        Some("A\nb\nc\n")
    );
    assert_eq!(orch.workspace().get(FILE), None);
}

#[test]
fn test_envelope_applies_atomically_across_files() {
    let orch = PatchOrchestrator::new(
        MemoryWorkspace::new()
            .with_file("a.c", "one\ntwo\n")
            .with_file("b.c", "three\n"),
    );
    let text = r#"{"edits": [
        {"file_path": "a.c", "operation": "replace", "start_line": 2, "end_line": 2, "content": "TWO"},
        {"file_path": "b.c", "operation": "delete", "start_line": 1, "end_line": 5}
    ]}"#;
    let envelope = parse_envelope(text).unwrap().envelope;
    assert!(orch.apply(&envelope).is_err());
    assert_eq!(orch.workspace().get("a.c").as_deref(), Some("one\ntwo\n"));

    let text = text.replace("\"end_line\": 5", "\"end_line\": 1");
    let envelope = parse_envelope(&text).unwrap().envelope;
    let preview = orch.apply(&envelope).unwrap();
    assert_eq!(preview.changes.len(), 2);
    assert_eq!(orch.workspace().get("a.c").as_deref(), Some("one\nTWO\n"));
    assert_eq!(orch.workspace().get("b.c").as_deref(), Some(""));
}

#[test]
fn test_stale_envelope_rejected_before_any_edit() {
    let orch = orchestrator();
    let text = format!(
        r#"{{"file_hash": "{}", "edits": [{{"file_path": "{}", "operation": "replace", "start_line": 1, "end_line": 1, "content": "A"}}]}}"#,
        content_hash("a\nb\n"),
        FILE
    );
    let envelope = parse_envelope(&text).unwrap().envelope;
    let err = orch.apply(&envelope).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StaleFile);
    assert_eq!(orch.workspace().get(FILE).as_deref(), Some(ORIGINAL));
}

#[test]
fn test_single_flight_guard() {
    let orch = orchestrator();
    let guard = orch.begin_repair(FILE).unwrap();
    assert_eq!(
        orch.begin_repair(FILE).unwrap_err().kind(),
        ErrorKind::RepairInFlight
    );
    assert!(orch.begin_repair("other.cpp").is_ok());
    drop(guard);
    assert!(orch.begin_repair(FILE).is_ok());
}

#[tokio::test]
async fn test_repair_clean_on_first_pass() {
    let orch = orchestrator();
    let analyzer = ScriptedAnalyzer::new(&[CLEAN]);
    let report = orch.repair(FILE, &analyzer, &AtomicBool::new(false)).await.unwrap();
    assert!(report.is_clean());
    assert_eq!(report.iterations.len(), 1);
    assert_eq!(analyzer.calls(), 1);
}

#[tokio::test]
async fn test_repair_applies_then_verifies() {
    let orch = orchestrator();
    let first = fix_response("@@ -1 +1 @@\n-a\n+A");
    let analyzer = ScriptedAnalyzer::new(&[&first, CLEAN]);
    let report = orch.repair(FILE, &analyzer, &AtomicBool::new(false)).await.unwrap();
    assert!(report.is_clean());
    assert_eq!(report.iterations.len(), 2);
    assert_eq!(report.total_applied(), 1);
    assert_eq!(orch.workspace().get(FILE).as_deref(), Some("A\nb\nc\n"));
    assert!(report.finished_at >= report.started_at);
}

#[tokio::test]
async fn test_repair_halts_when_nothing_applies() {
    let orch = orchestrator();
    let analyzer = ScriptedAnalyzer::new(&[UNFIXABLE]);
    let report = orch.repair(FILE, &analyzer, &AtomicBool::new(false)).await.unwrap();
    assert_eq!(report.iterations.len(), 1);
    assert_eq!(analyzer.calls(), 1);
    assert_eq!(
        report.outcome,
        RepairOutcome::Stopped(PatchError::CouldNotApply {
            remaining_issues: 1
        })
    );
    assert_eq!(
        report.into_result().unwrap_err().kind(),
        ErrorKind::CouldNotApply
    );
}

#[tokio::test]
async fn test_repair_stops_at_iteration_cap() {
    let orch = orchestrator().with_max_iterations(2);
    let analyzer = ScriptedAnalyzer::new(&[
        &fix_response("@@ -1 +1 @@\n-a\n+A"),
        &fix_response("@@ -2 +2 @@\n-b\n+B"),
        &fix_response("@@ -3 +3 @@\n-c\n+C"),
    ]);
    let report = orch.repair(FILE, &analyzer, &AtomicBool::new(false)).await.unwrap();
    assert_eq!(analyzer.calls(), 2);
    assert_eq!(
        report.outcome,
        RepairOutcome::Stopped(PatchError::MaxIterations { iterations: 2 })
    );
    assert_eq!(orch.workspace().get(FILE).as_deref(), Some("A\nB\nc\n"));
}

#[tokio::test]
async fn test_repair_cancelled_at_boundary() {
    let orch = orchestrator();
    let analyzer = ScriptedAnalyzer::new(&[CLEAN]);
    let report = orch.repair(FILE, &analyzer, &AtomicBool::new(true)).await.unwrap();
    assert_eq!(analyzer.calls(), 0);
    assert_eq!(
        report.outcome,
        RepairOutcome::Stopped(PatchError::Cancelled {
            completed_iterations: 0
        })
    );
}

#[tokio::test]
async fn test_repair_reports_analyzer_failure() {
    let orch = orchestrator();
    let report = orch
        .repair(FILE, &FailingAnalyzer, &AtomicBool::new(false))
        .await
        .unwrap();
    match report.outcome {
        RepairOutcome::Stopped(err) => {
            assert_eq!(err.kind(), ErrorKind::Analyzer);
            assert!(err.to_string().contains("rate limited"));
        }
        RepairOutcome::Clean => panic!("expected analyzer failure"),
    }
}

#[tokio::test]
async fn test_repair_refuses_concurrent_loop() {
    let orch = orchestrator();
    let _guard = orch.begin_repair(FILE).unwrap();
    let analyzer = ScriptedAnalyzer::new(&[CLEAN]);
    let err = orch
        .repair(FILE, &analyzer, &AtomicBool::new(false))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RepairInFlight);
}

/// Scripted responses that only arrive after a few scheduler turns
struct SlowAnalyzer {
    inner: ScriptedAnalyzer,
    turns: usize,
}

impl Analyzer for SlowAnalyzer {
    fn analyze<'a>(
        &'a self,
        path: &'a str,
        content: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>> {
        let response = self.inner.analyze(path, content);
        Box::pin(async move {
            for _ in 0..self.turns {
                tokio::task::yield_now().await;
            }
            response.await
        })
    }
}

fn rewrite_response(name: &str) -> String {
    format!(
        "# Summary\nRewrote {name}.\n\n# Recommendations\n- rewrite it\n\n```cpp\n#include <Arduino.h>\n// {name}\nvoid setup() {{}}\nvoid loop() {{}}\n```\n"
    )
}

#[tokio::test]
async fn test_concurrent_repairs_keep_their_own_targets() {
    let orch = PatchOrchestrator::new(
        MemoryWorkspace::new()
            .with_file("a.cpp", "int a\n")
            .with_file("b.cpp", "int b\n"),
    );
    let slow = SlowAnalyzer {
        inner: ScriptedAnalyzer::new(&[&rewrite_response("a.cpp"), CLEAN]),
        turns: 8,
    };
    let fast = ScriptedAnalyzer::new(&[&rewrite_response("b.cpp"), CLEAN]);
    let cancel = AtomicBool::new(false);

    let (a, b) = tokio::join!(
        orch.repair("a.cpp", &slow, &cancel),
        orch.repair("b.cpp", &fast, &cancel)
    );
    assert!(a.unwrap().is_clean());
    assert!(b.unwrap().is_clean());

    let a = orch.workspace().get("a.cpp").unwrap();
    let b = orch.workspace().get("b.cpp").unwrap();
    assert!(a.contains("// a.cpp") && !a.contains("// b.cpp"), "{a}");
    assert!(b.contains("// b.cpp") && !b.contains("// a.cpp"), "{b}");
    assert_eq!(orch.last_analyzed(), None);
}

#[test]
fn test_dry_run_chains_suggestions_without_writing() {
    let orch = orchestrator();
    let first = diff("@@ -1 +1 @@\n-a\n+A");
    let second = diff("@@ -1,2 +1,2 @@\n A\n-b\n+B");
    let stale = diff("@@ -1 +1 @@\n-a\n+x");

    let report = orch.dry_run_batch(&[first, second, stale], None);
    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.failed(), 1);
    assert_eq!(report.applied[1].changes[0].before.as_deref(), Some("A\nb\nc\n"));
    assert_eq!(report.applied[1].changes[0].after, "A\nB\nc\n");
    assert_eq!(orch.workspace().get(FILE).as_deref(), Some(ORIGINAL));
}

#[test]
fn test_dry_run_uses_given_fallback() {
    let orch = orchestrator();
    let rewrite = Suggestion::new("rewrite", "int main() { return 0; }\n");
    let report = orch.dry_run_batch(std::slice::from_ref(&rewrite), Some(FILE));
    assert_eq!(report.succeeded(), 1);
    assert_eq!(report.applied[0].changes[0].path, FILE);
    assert_eq!(orch.workspace().get(FILE).as_deref(), Some(ORIGINAL));
}
