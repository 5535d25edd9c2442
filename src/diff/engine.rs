use super::{parse_unified_diff, DiffHunk, DiffLine, UnifiedDiff};
use crate::error::{PatchError, PatchResult};
use crate::util::{split_lines, truncate};

/// Splice state for applying hunks in order against a working buffer.
///
/// Hunk headers address the *original* file. `running_offset` maps those
/// positions onto the working buffer after earlier hunks grew or shrank it,
/// and `original_cursor` is the first original line not yet consumed by a
/// previous hunk, so hunks can't overlap.
#[derive(Debug)]
pub struct HunkApplier {
    working: Vec<String>,
    original_cursor: usize,
    running_offset: isize,
}

impl HunkApplier {
    pub fn new(original: &str) -> Self {
        Self {
            working: split_lines(original),
            original_cursor: 0,
            running_offset: 0,
        }
    }

    pub fn running_offset(&self) -> isize {
        self.running_offset
    }

    pub fn original_cursor(&self) -> usize {
        self.original_cursor
    }

    pub fn lines(&self) -> &[String] {
        &self.working
    }

    /// Apply one hunk. `number` is 1-based and only used in error messages.
    pub fn apply_hunk(&mut self, hunk: &DiffHunk, number: usize) -> PatchResult<()> {
        // "-N,0" means "insert after line N"; everything else starts at line N
        let original_start = if hunk.is_pure_insertion() {
            hunk.old_start
        } else {
            hunk.old_start.saturating_sub(1)
        };

        if original_start < self.original_cursor {
            return Err(PatchError::invalid(format!(
                "hunk {} starts at line {} which overlaps the previous hunk",
                number, hunk.old_start
            )));
        }

        let splice_at = original_start as isize + self.running_offset;
        if splice_at < 0 || splice_at as usize > self.working.len() {
            return Err(PatchError::invalid(format!(
                "hunk {} starts at line {} past end of file ({} lines)",
                number,
                hunk.old_start,
                self.working.len()
            )));
        }
        let splice_at = splice_at as usize;

        let remove_count = hunk.derived_old_count();
        if splice_at + remove_count > self.working.len() {
            return Err(PatchError::invalid(format!(
                "hunk {} removes {} line(s) from line {} but the file has {} lines",
                number,
                remove_count,
                hunk.old_start,
                self.working.len()
            )));
        }

        self.verify_expected_lines(hunk, splice_at, number)?;

        let replacement = hunk.replacement();
        let inserted = replacement.len();
        self.working
            .splice(splice_at..splice_at + remove_count, replacement);

        self.running_offset += inserted as isize - remove_count as isize;
        self.original_cursor = original_start + remove_count;
        Ok(())
    }

    /// Context and removed lines must match the buffer, or the diff is stale
    fn verify_expected_lines(
        &self,
        hunk: &DiffHunk,
        splice_at: usize,
        number: usize,
    ) -> PatchResult<()> {
        let expected = hunk.lines.iter().filter(|l| l.consumes_original());
        for (pos, line) in expected.enumerate() {
            let actual = &self.working[splice_at + pos];
            if actual.trim_end() != line.content().trim_end() {
                let kind = match line {
                    DiffLine::Remove(_) => "removed",
                    _ => "context",
                };
                return Err(PatchError::invalid(format!(
                    "hunk {} {} line {} does not match file: expected {:?}, found {:?}",
                    number,
                    kind,
                    splice_at + pos + 1,
                    truncate(line.content(), 80),
                    truncate(actual, 80)
                )));
            }
        }
        Ok(())
    }

    pub fn finish(self) -> String {
        self.working.join("\n")
    }
}

/// Apply a parsed unified diff to the original content.
///
/// Hunks are applied in the order they appear, each against original line
/// numbers shifted by the running offset of the hunks before it.
pub fn apply_diff(original: &str, diff: &UnifiedDiff) -> PatchResult<String> {
    let mut applier = HunkApplier::new(original);
    for (idx, hunk) in diff.hunks.iter().enumerate() {
        if let Err(err) = applier.apply_hunk(hunk, idx + 1) {
            tracing::warn!(hunk = idx + 1, error = %err, "hunk rejected");
            return Err(err);
        }
    }
    Ok(applier.finish())
}

/// Parse `diff` and apply it to `original`.
pub fn apply_patch(original: &str, diff: &str) -> PatchResult<String> {
    let parsed = parse_unified_diff(diff)?;
    apply_diff(original, &parsed)
}
