use super::{FileEdit, FileSnapshot, PatchEnvelope, PatchOperation};
use crate::error::{PatchError, PatchResult};
use crate::util::normalize_newlines;

/// One edit resolved to a byte region of its target's original text
#[derive(Debug)]
struct Splice<'a> {
    start: usize,
    end: usize,
    text: String,
    edit: &'a FileEdit,
}

/// Byte offset where 0-based line `line` begins, clamped to the end of the text
fn line_start(text: &str, line: usize) -> usize {
    if line == 0 {
        return 0;
    }
    text.match_indices('\n')
        .nth(line - 1)
        .map(|(idx, _)| idx + 1)
        .unwrap_or(text.len())
}

fn with_trailing_newline(content: Option<&str>) -> String {
    let mut text = normalize_newlines(content.unwrap_or(""));
    if !text.ends_with('\n') {
        text.push('\n');
    }
    text
}

fn to_splice<'a>(text: &str, edit: &'a FileEdit) -> PatchResult<Splice<'a>> {
    let path = &edit.file_path;
    let (start, end, replacement) = match edit.operation {
        PatchOperation::Replace | PatchOperation::Delete => {
            let end_line = edit.end_line.ok_or_else(|| {
                PatchError::invalid(format!(
                    "missing end_line for {} in {}",
                    edit.operation.label(),
                    path
                ))
            })?;
            if edit.start_line < 1 || end_line < edit.start_line {
                return Err(PatchError::invalid(format!(
                    "invalid range {}..={} in {}",
                    edit.start_line, end_line, path
                )));
            }
            // Lines S..=E (1-based) cover [start of S, start of E+1)
            let start = line_start(text, (edit.start_line - 1) as usize);
            let end = line_start(text, end_line as usize);
            let replacement = if edit.operation == PatchOperation::Replace {
                with_trailing_newline(edit.content.as_deref())
            } else {
                String::new()
            };
            (start, end, replacement)
        }
        PatchOperation::InsertAfter => {
            if edit.start_line < 0 {
                return Err(PatchError::invalid(format!(
                    "invalid insert_after line {} in {}",
                    edit.start_line, path
                )));
            }
            let at = line_start(text, edit.start_line as usize);
            (at, at, with_trailing_newline(edit.content.as_deref()))
        }
        PatchOperation::Create => (
            0,
            0,
            normalize_newlines(edit.content.as_deref().unwrap_or("")),
        ),
    };

    // Text landing after an unterminated last line starts on a line of its own
    let mut replacement = replacement;
    if start == text.len() && !replacement.is_empty() && !text.is_empty() && !text.ends_with('\n') {
        replacement.insert(0, '\n');
    }

    Ok(Splice {
        start,
        end,
        text: replacement,
        edit,
    })
}

/// Apply every edit targeting one file, all against its original numbering
fn apply_to_file(path: &str, original: &str, edits: &[&FileEdit]) -> PatchResult<String> {
    let mut splices = edits
        .iter()
        .map(|edit| to_splice(original, edit))
        .collect::<PatchResult<Vec<_>>>()?;

    // Stable: insertions at one point keep envelope order
    splices.sort_by_key(|s| (s.start, s.end));
    for pair in splices.windows(2) {
        if pair[0].end > pair[1].start {
            return Err(PatchError::invalid(format!(
                "{} at line {} overlaps {} at line {} in {}",
                pair[1].edit.operation.label(),
                pair[1].edit.start_line,
                pair[0].edit.operation.label(),
                pair[0].edit.start_line,
                path
            )));
        }
    }

    let mut text = original.to_string();
    for splice in splices.iter().rev() {
        text.replace_range(splice.start..splice.end, &splice.text);
    }
    Ok(text)
}

/// Apply an envelope to the current file text, producing new text per target.
///
/// Pure and all-or-nothing: any failing edit fails the whole envelope and
/// `current` is never modified. A file with a `create` edit starts empty.
/// Run [`super::validate`] first; this only guards against edits that
/// cannot be placed at all.
pub fn apply_envelope(envelope: &PatchEnvelope, current: &FileSnapshot) -> PatchResult<FileSnapshot> {
    if envelope.edits.is_empty() {
        return Err(PatchError::invalid("envelope contains no edits"));
    }

    let mut patched = FileSnapshot::new();
    for path in envelope.edited_paths() {
        let edits: Vec<&FileEdit> = envelope
            .edits
            .iter()
            .filter(|e| e.file_path == path)
            .collect();
        let creates = edits.iter().any(|e| e.operation == PatchOperation::Create);

        let original = if creates {
            String::new()
        } else {
            let text = current
                .get(&path)
                .ok_or_else(|| PatchError::invalid(format!("file not found: {}", path)))?;
            normalize_newlines(text)
        };

        let text = apply_to_file(&path, &original, &edits)?;
        tracing::debug!(path = %path, edits = edits.len(), "envelope edits applied");
        patched.insert(path, text);
    }

    Ok(patched)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SKETCH: &str = "void loop() {\n  int x = 0\n}\n";

    fn edit(operation: PatchOperation, start: i64, end: Option<i64>, content: Option<&str>) -> FileEdit {
        FileEdit {
            file_path: "main.cpp".into(),
            operation,
            start_line: start,
            end_line: end,
            content: content.map(str::to_string),
            explanation: String::new(),
        }
    }

    fn run(edits: Vec<FileEdit>) -> PatchResult<String> {
        let envelope = PatchEnvelope {
            file_hash: None,
            summary: String::new(),
            edits,
        };
        let current = FileSnapshot::from([("main.cpp".to_string(), SKETCH.to_string())]);
        apply_envelope(&envelope, &current).map(|mut out| out.remove("main.cpp").unwrap_or_default())
    }

    #[test]
    fn test_replace_adds_missing_newline() {
        let out = run(vec![edit(PatchOperation::Replace, 2, Some(2), Some("  int x = 0;"))]).unwrap();
        assert_eq!(out, "void loop() {\n  int x = 0;\n}\n");
    }

    #[test]
    fn test_delete_removes_whole_lines() {
        let out = run(vec![edit(PatchOperation::Delete, 2, Some(2), None)]).unwrap();
        assert_eq!(out, "void loop() {\n}\n");
    }

    #[test]
    fn test_insert_after_top_and_end() {
        let out = run(vec![
            edit(PatchOperation::InsertAfter, 0, None, Some("#include <Arduino.h>")),
            edit(PatchOperation::InsertAfter, 3, None, Some("// end")),
        ])
        .unwrap();
        assert_eq!(out, "#include <Arduino.h>\nvoid loop() {\n  int x = 0\n}\n// end\n");
    }

    #[test]
    fn test_edits_use_original_numbering() {
        let out = run(vec![
            edit(PatchOperation::InsertAfter, 1, None, Some("  // a\n  // b")),
            edit(PatchOperation::Replace, 2, Some(2), Some("  int x = 1;")),
        ])
        .unwrap();
        assert_eq!(out, "void loop() {\n  // a\n  // b\n  int x = 1;\n}\n");
    }

    #[test]
    fn test_overlapping_edits_rejected() {
        let err = run(vec![
            edit(PatchOperation::Replace, 1, Some(2), Some("a")),
            edit(PatchOperation::Delete, 2, Some(3), None),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("overlaps"));
    }

    #[test]
    fn test_missing_end_line_fails_whole_envelope() {
        let err = run(vec![
            edit(PatchOperation::Replace, 2, Some(2), Some("  int x = 0;")),
            edit(PatchOperation::Delete, 1, None, None),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("missing end_line"));
    }

    #[test]
    fn test_create_starts_empty() {
        let envelope = PatchEnvelope {
            file_hash: None,
            summary: String::new(),
            edits: vec![FileEdit {
                file_path: "config.h".into(),
                ..edit(PatchOperation::Create, 0, None, Some("#pragma once\n"))
            }],
        };
        let out = apply_envelope(&envelope, &FileSnapshot::new()).unwrap();
        assert_eq!(out["config.h"], "#pragma once\n");
    }

    #[test]
    fn test_unknown_target_fails() {
        let envelope = PatchEnvelope {
            file_hash: None,
            summary: String::new(),
            edits: vec![FileEdit {
                file_path: "ghost.cpp".into(),
                ..edit(PatchOperation::Delete, 1, Some(1), None)
            }],
        };
        assert!(apply_envelope(&envelope, &FileSnapshot::new()).is_err());
    }

    #[test]
    fn test_unterminated_last_line_keeps_its_break() {
        let unterminated = "void loop() {\n  int x = 0\n}";
        let current = FileSnapshot::from([("main.cpp".to_string(), unterminated.to_string())]);
        let apply = |e: FileEdit| {
            let envelope = PatchEnvelope {
                file_hash: None,
                summary: String::new(),
                edits: vec![e],
            };
            assert!(crate::protocol::validate(&envelope, &current, &Default::default()).is_valid());
            apply_envelope(&envelope, &current).unwrap().remove("main.cpp").unwrap()
        };

        assert_eq!(
            apply(edit(PatchOperation::InsertAfter, 3, None, Some("// end"))),
            "void loop() {\n  int x = 0\n}\n// end\n"
        );
        assert_eq!(
            apply(edit(PatchOperation::Replace, 3, Some(3), Some("} // loop"))),
            "void loop() {\n  int x = 0\n} // loop\n"
        );
        assert_eq!(
            apply(edit(PatchOperation::Delete, 3, Some(3), None)),
            "void loop() {\n  int x = 0\n"
        );
    }

    #[test]
    fn test_line_start_clamps() {
        assert_eq!(line_start("a\nb", 0), 0);
        assert_eq!(line_start("a\nb", 1), 2);
        assert_eq!(line_start("a\nb", 5), 3);
    }
}
