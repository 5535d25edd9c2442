use regex::Regex;
use std::sync::LazyLock;

static OLD_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^---\s+\S+").expect("valid header regex"));
static NEW_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+\+\+\s+\S+").expect("valid header regex"));
static HUNK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@@\s+-\d+(,\d+)?\s+\+\d+(,\d+)?\s+@@").expect("valid hunk regex")
});

/// Decide whether a candidate edit is a unified diff or a full-file rewrite.
///
/// True iff a `---` header, a later `+++` header, and a later-still hunk
/// header all appear, not necessarily adjacent.
pub fn is_unified_diff(text: &str) -> bool {
    let mut stage = 0;
    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        match stage {
            0 if OLD_HEADER.is_match(line) => stage = 1,
            1 if NEW_HEADER.is_match(line) => stage = 2,
            2 if HUNK.is_match(line) => return true,
            _ => {}
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_diff_is_recognized() {
        assert!(is_unified_diff("--- a/x.c\n+++ b/x.c\n@@ -1 +1 @@\n-a\n+b"));
    }

    #[test]
    fn test_headers_need_not_be_adjacent() {
        let text = "intro\n--- a/x.c\nindex 123\n+++ b/x.c\nnoise\n@@ -1,2 +1,2 @@\n a\n";
        assert!(is_unified_diff(text));
    }

    #[test]
    fn test_missing_any_marker_is_not_a_diff() {
        assert!(!is_unified_diff("+++ b/x.c\n@@ -1 +1 @@\n-a"));
        assert!(!is_unified_diff("--- a/x.c\n@@ -1 +1 @@\n-a"));
        assert!(!is_unified_diff("--- a/x.c\n+++ b/x.c\n-a\n+b"));
        assert!(!is_unified_diff("int main() { return 0; }"));
        assert!(!is_unified_diff(""));
    }

    #[test]
    fn test_order_matters() {
        assert!(!is_unified_diff("@@ -1 +1 @@\n+++ b/x.c\n--- a/x.c"));
        assert!(!is_unified_diff("+++ b/x.c\n--- a/x.c\n@@ -1 +1 @@"));
    }

    #[test]
    fn test_malformed_hunk_header() {
        assert!(!is_unified_diff("--- a/x.c\n+++ b/x.c\n@@ -a,b +c,d @@"));
        assert!(!is_unified_diff("--- \n+++ b/x.c\n@@ -1 +1 @@"));
    }
}
