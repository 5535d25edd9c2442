use super::is_unified_diff;

/// Reduce a noisy diff block to a minimal well-formed unified diff.
///
/// Leading commentary before the `---` header is dropped, as is anything
/// between the headers and the first hunk that isn't a header. Once inside
/// hunks, copying stops at the first line that is not diff syntax (prose,
/// a fence marker). Returns `None` if the result isn't a valid diff.
pub fn sanitize(text: &str) -> Option<String> {
    let lines: Vec<&str> = text.lines().map(|l| l.trim_end_matches('\r')).collect();

    let start = lines.iter().position(|l| l.starts_with("--- "))?;
    let plus = start + 1 + lines[start + 1..].iter().position(|l| l.starts_with("+++ "))?;
    lines[plus + 1..].iter().position(|l| l.starts_with("@@"))?;

    let mut output: Vec<&str> = Vec::new();
    let mut in_hunk = false;

    for &line in &lines[start..] {
        if line.starts_with("```") {
            break;
        }

        if !in_hunk {
            if line.starts_with("--- ") || line.starts_with("+++ ") || line.starts_with("@@") {
                output.push(line);
                in_hunk = line.starts_with("@@");
            }
            continue;
        }

        if line.starts_with(' ')
            || line.starts_with('+')
            || line.starts_with('-')
            || line.starts_with("\\ No newline")
            || line.starts_with("@@")
        {
            output.push(line);
        } else if line.trim().is_empty() {
            output.push("");
        } else {
            tracing::debug!(line = %crate::util::truncate(line, 60), "diff truncated at prose");
            break;
        }
    }

    while output.last().is_some_and(|l| l.trim().is_empty()) {
        output.pop();
    }

    let sanitized = output.join("\n");
    if is_unified_diff(&sanitized) {
        Some(sanitized)
    } else {
        None
    }
}
