use super::PatchEnvelope;
use crate::error::{PatchError, PatchResult};
use crate::extract::fenced_blocks;
use crate::util::truncate;
use regex::Regex;
use std::sync::LazyLock;

static TRAILING_COMMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*([}\]])").expect("valid trailing comma regex"));

/// An envelope recovered from model text
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedEnvelope {
    pub envelope: PatchEnvelope,
    /// Whatever the model wrote before the JSON
    pub thoughts: Option<String>,
}

/// `None` when the candidate is not an envelope at all, `Some(Err)` when it
/// has an `edits` array but doesn't fit the schema
fn decode(candidate: &str) -> Option<Result<PatchEnvelope, String>> {
    let value: serde_json::Value = serde_json::from_str(candidate.trim()).ok()?;
    if !value.get("edits").is_some_and(serde_json::Value::is_array) {
        return None;
    }
    Some(serde_json::from_value(value).map_err(|e| e.to_string()))
}

/// Try to fix common JSON issues from model responses
fn fix_json_issues(json: &str) -> String {
    let mut fixed = json.to_string();

    // Smart quotes to regular quotes
    fixed = fixed.replace(['\u{201C}', '\u{201D}'], "\"");
    fixed = fixed.replace(['\u{2018}', '\u{2019}'], "'");

    // `\'` is not a JSON escape
    fixed = fixed.replace("\\'", "'");

    fixed = TRAILING_COMMA.replace_all(&fixed, "$1").into_owned();

    fixed
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t' || *c == '\r')
        .collect()
}

/// Byte ranges of top-level `{...}` objects, skipping braces inside strings
fn balanced_objects(text: &str) -> Vec<(usize, usize)> {
    let mut found = Vec::new();
    let mut depth: i32 = 0;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start.take() {
                        found.push((s, i + 1));
                    }
                }
            }
            _ => {}
        }
    }

    found
}

fn from_json_fence(text: &str) -> Located {
    fenced_blocks(text)
        .into_iter()
        .filter(|b| b.lang == "json")
        .find_map(|b| decode(&b.content).map(|d| (b.start, d)))
}

fn from_any_fence(text: &str) -> Located {
    fenced_blocks(text)
        .into_iter()
        .find_map(|b| decode(&b.content).map(|d| (b.start, d)))
}

fn from_balanced_braces(text: &str) -> Located {
    balanced_objects(text)
        .into_iter()
        .find_map(|(start, end)| decode(&text[start..end]).map(|d| (start, d)))
}

fn from_cleaned_text(text: &str) -> Located {
    let stripped: Vec<&str> = text
        .lines()
        .filter(|l| {
            let t = l.trim_start();
            !t.starts_with("```") && !t.starts_with('#')
        })
        .collect();
    let stripped = stripped.join("\n");
    let stripped = stripped.trim().trim_matches(['"', '\'', '`']);
    let fixed = fix_json_issues(stripped);

    let start = fixed.find('{')?;
    let end = fixed.rfind('}')?;
    if start > end {
        return None;
    }
    let decoded = decode(&fixed[start..=end])?;
    Some((text.find('{').unwrap_or(0), decoded))
}

/// Offset where the envelope starts, and its decoding
type Located = Option<(usize, Result<PatchEnvelope, String>)>;

type EnvelopeStrategy = fn(&str) -> Located;

/// Recovery strategies in priority order
const ENVELOPE_STRATEGIES: &[(&str, EnvelopeStrategy)] = &[
    ("json-fence", from_json_fence),
    ("any-fence", from_any_fence),
    ("balanced-braces", from_balanced_braces),
    ("cleanup", from_cleaned_text),
];

/// Recover a structured edit envelope from raw model text.
///
/// Accepts bare JSON, fenced JSON, JSON surrounded by prose, and JSON with
/// smart quotes, trailing commas, or `\'` escapes. Only an object with an
/// `edits` array counts.
pub fn parse_envelope(text: &str) -> PatchResult<ParsedEnvelope> {
    if text.trim().is_empty() {
        return Err(PatchError::ExtractionEmpty);
    }

    for (name, strategy) in ENVELOPE_STRATEGIES {
        let Some((offset, decoded)) = strategy(text) else {
            continue;
        };
        tracing::debug!(strategy = name, "envelope located");
        let envelope = decoded.map_err(|e| {
            PatchError::invalid(format!("envelope does not match the edit schema: {}", e))
        })?;
        let thoughts = text[..offset.min(text.len())].trim();
        let thoughts = if thoughts.is_empty() {
            None
        } else {
            Some(thoughts.to_string())
        };
        return Ok(ParsedEnvelope { envelope, thoughts });
    }

    Err(PatchError::invalid(format!(
        "no JSON object with an edits array found in: {}",
        truncate(text.trim(), 120)
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::protocol::PatchOperation;

    const ENVELOPE: &str = r#"{"file_hash": "abc", "summary": "fix", "edits": [{"file_path": "src/main.cpp", "operation": "replace", "start_line": 2, "end_line": 2, "content": "  if (x) { y(); }", "explanation": "brace"}]}"#;

    #[test]
    fn test_bare_json() {
        let parsed = parse_envelope(ENVELOPE).unwrap();
        assert_eq!(parsed.envelope.edits.len(), 1);
        assert_eq!(parsed.envelope.edits[0].operation, PatchOperation::Replace);
        assert_eq!(parsed.thoughts, None);
    }

    #[test]
    fn test_fenced_json_with_thoughts() {
        let text = format!("I will fix the brace.\n\n```json\n{}\n```\nDone.", ENVELOPE);
        let parsed = parse_envelope(&text).unwrap();
        assert_eq!(parsed.thoughts.as_deref(), Some("I will fix the brace."));
        assert_eq!(parsed.envelope.summary, "fix");
    }

    #[test]
    fn test_braces_inside_strings_do_not_confuse_scanner() {
        let text = format!("Plan: keep {{ scope }} small.\n{}", ENVELOPE);
        let parsed = parse_envelope(&text).unwrap();
        assert_eq!(
            parsed.envelope.edits[0].content.as_deref(),
            Some("  if (x) { y(); }")
        );
        assert!(parsed.thoughts.unwrap().starts_with("Plan"));
    }

    #[test]
    fn test_cleanup_repairs_sloppy_json() {
        let text = "Here you go:\n{\u{201C}edits\u{201D}: [{\"file_path\": \"a.c\", \"operation\": \"delete\", \"start_line\": 1, \"end_line\": 1, \"explanation\": \"don\\'t need it\",},],}";
        let parsed = parse_envelope(text).unwrap();
        assert_eq!(parsed.envelope.edits[0].operation, PatchOperation::Delete);
        assert_eq!(parsed.envelope.edits[0].explanation, "don't need it");
    }

    #[test]
    fn test_objects_without_edits_are_skipped() {
        let text = format!("{{\"note\": 1}}\n{}", ENVELOPE);
        assert_eq!(parse_envelope(&text).unwrap().envelope.edits.len(), 1);
    }

    #[test]
    fn test_schema_mismatch_is_reported() {
        let err = parse_envelope(r#"{"edits": [{"file_path": "a.c", "operation": "rename"}]}"#)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidPatch);
        assert!(err.to_string().contains("schema"));
    }

    #[test]
    fn test_no_envelope() {
        assert_eq!(parse_envelope("").unwrap_err().kind(), ErrorKind::ExtractionEmpty);
        assert_eq!(
            parse_envelope("just prose").unwrap_err().kind(),
            ErrorKind::InvalidPatch
        );
    }

    #[test]
    fn test_fix_json_issues() {
        assert_eq!(fix_json_issues("[1, 2, ]"), "[1, 2]");
        assert_eq!(fix_json_issues("{\"a\": 1,\n}"), "{\"a\": 1}");
    }
}
