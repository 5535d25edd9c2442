use regex::Regex;
use std::sync::LazyLock;

static HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s{0,3}#{1,6}\s*(.+?)\s*#*\s*$").expect("valid heading regex"));
static BULLET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\s>*-]*[-*•]\s+(.+)$").expect("valid bullet regex"));
static BOLD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*(.*?)\*\*").expect("valid bold regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SectionKind {
    Summary,
    Recommendations,
    Suggestions,
    Thinking,
}

/// Sections recovered from markdown headings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sections {
    pub summary: Option<String>,
    pub thought_process: Option<String>,
    pub recommendations: Vec<String>,
}

fn classify_heading(line: &str) -> Option<SectionKind> {
    let caps = HEADING.captures(line)?;
    let title = strip_bold(caps.get(1)?.as_str());
    let title = title.trim_end_matches(':').trim().to_ascii_lowercase();
    let title = title.split_whitespace().collect::<Vec<_>>().join(" ");

    if title.starts_with("final summary") || title.starts_with("summary") {
        Some(SectionKind::Summary)
    } else if title.starts_with("recommendations") {
        Some(SectionKind::Recommendations)
    } else if title.starts_with("suggestions") {
        Some(SectionKind::Suggestions)
    } else if title.starts_with("thinking") {
        Some(SectionKind::Thinking)
    } else {
        None
    }
}

pub(crate) fn strip_bold(line: &str) -> String {
    BOLD.replace_all(line, "$1").into_owned()
}

/// Split text into the bodies of recognized headings.
///
/// A body runs until the next recognized heading. Headings inside fenced
/// code are ignored. Only the first occurrence of each kind is kept.
fn section_bodies(text: &str) -> Vec<(SectionKind, String)> {
    let mut bodies: Vec<(SectionKind, String)> = Vec::new();
    let mut current: Option<(SectionKind, Vec<&str>)> = None;
    let mut in_fence = false;

    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
        }

        let heading = if in_fence { None } else { classify_heading(line) };
        match heading {
            Some(kind) => {
                if let Some((prev, body)) = current.take() {
                    bodies.push((prev, body.join("\n")));
                }
                current = Some((kind, Vec::new()));
            }
            None => {
                if let Some((_, body)) = current.as_mut() {
                    body.push(line);
                }
            }
        }
    }
    if let Some((kind, body)) = current {
        bodies.push((kind, body.join("\n")));
    }

    let mut seen = Vec::new();
    bodies.retain(|(kind, _)| {
        if seen.contains(kind) {
            false
        } else {
            seen.push(*kind);
            true
        }
    });
    bodies
}

/// Lines of a body outside fenced code, fence markers included
fn prose_lines(body: &str) -> Vec<&str> {
    let mut in_fence = false;
    body.lines()
        .filter(|line| {
            if line.trim_start().starts_with("```") {
                in_fence = !in_fence;
                return false;
            }
            !in_fence
        })
        .collect()
}

/// Bullet lines of a recommendations body, or its non-empty lines if it has no bullets.
/// Fenced code never contributes.
fn recommendation_lines(body: &str) -> Vec<String> {
    let prose = prose_lines(body);
    let bullets: Vec<&str> = prose
        .iter()
        .filter_map(|l| BULLET.captures(l).and_then(|c| c.get(1)))
        .map(|m| m.as_str().trim())
        .collect();

    let lines: Vec<&str> = if bullets.is_empty() {
        prose.into_iter().map(str::trim).filter(|l| !l.is_empty()).collect()
    } else {
        bullets
    };

    lines
        .into_iter()
        .map(|l| strip_bold(l).trim().to_string())
        .filter(|l| !l.is_empty())
        .collect()
}

/// Parse summary, thinking, and recommendations sections out of model text
pub fn parse_sections(text: &str) -> Sections {
    let mut sections = Sections::default();

    for (kind, body) in section_bodies(text) {
        let trimmed = body.trim();
        match kind {
            SectionKind::Summary if !trimmed.is_empty() => {
                sections.summary = Some(trimmed.to_string());
            }
            SectionKind::Thinking if !trimmed.is_empty() => {
                sections.thought_process = Some(trimmed.to_string());
            }
            SectionKind::Recommendations => {
                sections.recommendations = recommendation_lines(&body);
            }
            _ => {}
        }
    }

    sections
}
