use super::sections::strip_bold;
use super::Suggestion;
use crate::diff::{header_path, is_unified_diff};
use regex::Regex;
use std::sync::LazyLock;

const DEFAULT_DESCRIPTION: &str = "Code Fix";

static FILE_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?:#{1,6}\s*)?(?:[-*]\s*)?(?:\*\*)?(?:(?:file|path)\s*:\s*)?`?([\w./\\-]+\.[a-z0-9]+)`?(?:\*\*)?:?$",
    )
    .expect("valid file marker regex")
});

/// A fenced code block found in model text
#[derive(Debug, Clone, PartialEq)]
pub struct FencedBlock {
    /// Lowercased info string (`cpp`, `diff`, ...), empty if none
    pub lang: String,
    pub content: String,
    /// Byte offset of the opening fence line
    pub start: usize,
}

/// Find every fenced block regardless of language tag.
///
/// An unterminated final fence runs to the end of the text, since models
/// sometimes stop before closing it.
pub fn fenced_blocks(text: &str) -> Vec<FencedBlock> {
    let mut blocks = Vec::new();
    let mut open: Option<(String, usize, Vec<&str>)> = None;
    let mut offset = 0;

    for raw in text.split_inclusive('\n') {
        let line = raw.trim_end_matches(['\n', '\r']);
        let trimmed = line.trim_start();

        let closes = open.is_some() && trimmed.starts_with("```");
        if closes {
            if let Some((lang, start, lines)) = open.take() {
                blocks.push(build_block(lang, start, &lines));
            }
        } else if let Some((_, _, lines)) = open.as_mut() {
            lines.push(line);
        } else if let Some(info) = trimmed.strip_prefix("```") {
            let lang = info
                .split_whitespace()
                .next()
                .unwrap_or("")
                .to_ascii_lowercase();
            open = Some((lang, offset, Vec::new()));
        }
        offset += raw.len();
    }

    if let Some((lang, start, lines)) = open {
        blocks.push(build_block(lang, start, &lines));
    }

    blocks
}

fn build_block(lang: String, start: usize, lines: &[&str]) -> FencedBlock {
    let content = lines.join("\n");
    let content = content.trim_matches('\n').trim_end().to_string();
    FencedBlock {
        lang,
        content,
        start,
    }
}

/// Last non-empty line before `offset`, if it isn't a fence marker
fn preceding_line(text: &str, offset: usize) -> Option<&str> {
    let line = text[..offset].trim_end().lines().last()?.trim();
    if line.is_empty() || line.starts_with("```") {
        None
    } else {
        Some(line)
    }
}

fn describe(preceding: Option<&str>) -> String {
    let Some(line) = preceding else {
        return DEFAULT_DESCRIPTION.to_string();
    };
    let line = strip_bold(line);
    let line = match line.trim_start().strip_prefix(['-', '*', '•']) {
        Some(rest) if rest.starts_with(char::is_whitespace) => rest.trim().to_string(),
        _ => line.trim().to_string(),
    };
    if line.is_empty() {
        DEFAULT_DESCRIPTION.to_string()
    } else {
        line
    }
}

fn file_marker(preceding: Option<&str>) -> Option<String> {
    let caps = FILE_MARKER.captures(preceding?.trim())?;
    header_path(caps.get(1)?.as_str())
}

/// Target declared by a block's headers: `---` first, then `+++`.
fn declared_target(content: &str) -> Option<String> {
    let header = |prefix: &str| {
        content
            .lines()
            .find_map(|l| l.strip_prefix(prefix))
            .and_then(header_path)
    };
    header("--- ").or_else(|| header("+++ "))
}

/// Turn every fenced block that classifies as a unified diff into a suggestion.
///
/// Returns `None` when no block qualifies so the next strategy can run.
pub fn harvest_diff_blocks(text: &str) -> Option<Vec<Suggestion>> {
    let suggestions: Vec<Suggestion> = fenced_blocks(text)
        .into_iter()
        .filter(|block| is_unified_diff(&block.content))
        .map(|block| {
            let preceding = preceding_line(text, block.start);
            let target = declared_target(&block.content).or_else(|| file_marker(preceding));
            Suggestion::new(describe(preceding), block.content).with_target(target)
        })
        .collect();

    if suggestions.is_empty() {
        None
    } else {
        Some(suggestions)
    }
}
