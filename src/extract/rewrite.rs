use super::blocks::{fenced_blocks, FencedBlock};
use super::Suggestion;
use regex::Regex;
use std::sync::LazyLock;

pub const FULL_REWRITE_DESCRIPTION: &str = "Full File Rewrite (All Fixes Applied)";

const MIN_REWRITE_CHARS: usize = 50;

static CODE_ANCHOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)#include\s+<|void\s+setup\s*\(|int\s+main\s*\(|\bclass\s+\w+|#if\s+defined")
        .expect("valid anchor regex")
});
static PROSE_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*#{1,6}\s*(?:\*\*)?(?:thinking process|final summary|summary|recommendations)\b")
        .expect("valid prose heading regex")
});
static NUMBERED_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.").expect("valid list regex"));
static CORRECTED_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)corrected\s+code").expect("valid marker regex"));
static INCLUDE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#include\s+<").expect("valid include regex"));
static SETUP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"void\s+setup\s*\(").expect("valid setup regex"));
static MAIN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"int\s+main\s*\(").expect("valid main regex"));

/// Tags that say nothing about the block being source code
const GENERIC_LANGS: &[&str] = &[
    "", "json", "diff", "patch", "bash", "sh", "shell", "console", "text", "txt", "markdown", "md",
    "plaintext", "output",
];

/// Heuristic test for "this fenced block is a whole source file".
pub fn is_likely_code(content: &str) -> bool {
    if content.chars().count() < MIN_REWRITE_CHARS {
        return false;
    }
    if content.contains("```") {
        return false;
    }
    if content.starts_with("---") || content.starts_with("+++") {
        return false;
    }
    if content.starts_with("### ") || PROSE_HEADING.is_match(content) {
        return false;
    }
    if CODE_ANCHOR.is_match(content) {
        return true;
    }

    let lines: Vec<&str> = content.lines().collect();
    let list_items = lines
        .iter()
        .map(|l| l.trim())
        .filter(|l| l.starts_with("- ") || NUMBERED_ITEM.is_match(l))
        .count();
    if list_items * 2 > lines.len() {
        return false;
    }

    content.contains([';', '{', '}'])
}

fn score(block: &FencedBlock) -> usize {
    let mut score = block.content.len();
    if INCLUDE.is_match(&block.content) {
        score += 5000;
    }
    if SETUP.is_match(&block.content) {
        score += 5000;
    }
    if MAIN.is_match(&block.content) {
        score += 3000;
    }
    if !GENERIC_LANGS.contains(&block.lang.as_str()) {
        score += 500;
    }
    score
}

fn looks_like_code_start(line: &str) -> bool {
    let t = line.trim();
    t.is_empty()
        || t.starts_with('#')
        || t.starts_with("//")
        || t.starts_with("/*")
        || t.contains(';')
        || t.contains('{')
        || t.starts_with("using")
        || t.starts_with("class")
        || t.starts_with("void")
        || t.starts_with("int")
        || t.starts_with("import")
        || t.starts_with("---")
}

/// Drop headings, bold titles, and chatter the model put above the code
fn strip_leading_prose(content: &str) -> String {
    let mut kept = Vec::new();
    let mut in_code = false;

    for line in content.lines() {
        if !in_code {
            let t = line.trim();
            let is_heading = t.starts_with('#')
                && t.trim_start_matches('#').starts_with(' ')
                && t.chars().take_while(|c| *c == '#').count() <= 6;
            let is_bold_title = t.len() > 4 && t.starts_with("**") && t.ends_with("**");
            if is_heading || is_bold_title || t.starts_with("This implementation") {
                continue;
            }
            if !looks_like_code_start(line) {
                continue;
            }
            in_code = true;
        }
        kept.push(line);
    }

    kept.join("\n").trim().to_string()
}

/// Pick the one fenced block most likely to be a complete corrected file.
///
/// A qualifying block after a "Corrected Code" marker wins outright;
/// otherwise the highest-scoring qualifying block is chosen.
pub fn select_rewrite_block(text: &str) -> Option<FencedBlock> {
    let blocks: Vec<FencedBlock> = fenced_blocks(text)
        .into_iter()
        .filter(|b| is_likely_code(&b.content))
        .collect();

    if let Some(marker) = CORRECTED_CODE.find(text) {
        if let Some(after) = blocks.iter().find(|b| b.start > marker.start()) {
            return Some(after.clone());
        }
    }

    let mut best: Option<(usize, &FencedBlock)> = None;
    for block in &blocks {
        let s = score(block);
        if best.is_none_or(|(best_score, _)| s > best_score) {
            best = Some((s, block));
        }
    }
    best.map(|(_, block)| block.clone())
}

/// Fall back to a single full-file rewrite suggestion
pub fn full_rewrite_fallback(text: &str) -> Option<Vec<Suggestion>> {
    let block = select_rewrite_block(text)?;
    let content = strip_leading_prose(&block.content);
    if content.is_empty() {
        return None;
    }
    Some(vec![Suggestion::new(FULL_REWRITE_DESCRIPTION, content)])
}
