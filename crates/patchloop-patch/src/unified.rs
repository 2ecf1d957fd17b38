//! Strict unified diff application on top of `diffy`.
//!
//! `diffy` parses the patch and checks every hunk body against its header
//! counts. A strict diff must also touch a single file, keep its hunk ranges
//! inside the prior content, and match the prior content exactly at the
//! offsets its headers state. `diffy::apply` searches around the stated
//! position, so that anchor check runs before it.

use diffy::{Line, Patch};
use thiserror::Error;

/// Header placed in front of bare hunks so `diffy` sees a complete patch
const SYNTHETIC_HEADER: &str = "--- a/file\n+++ b/file\n";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiffError {
    #[error("No hunks found in diff")]
    NoHunks,

    #[error("Invalid hunk header at line {line}: {header}")]
    InvalidHunkHeader { line: usize, header: String },

    #[error("File header '---' at line {0} is not followed by '+++'")]
    UnpairedHeader(usize),

    #[error("Diff touches more than one file (second header at line {0})")]
    MultipleFiles(usize),

    #[error("Hunk at old line {0} overlaps the previous hunk or lies past the end of the file")]
    OutOfRange(usize),

    #[error("Malformed diff: {0}")]
    Parse(String),

    #[error("Old line {line} should be {expected:?} but is {found:?}")]
    ContextMismatch {
        line: usize,
        expected: String,
        found: Option<String>,
    },

    #[error("Diff does not apply: {0}")]
    Apply(String),
}

/// Returns true when the text contains hunk headers or a `---`/`+++` header pair
pub fn has_diff_markers(text: &str) -> bool {
    let lines: Vec<&str> = text.lines().collect();
    lines.iter().enumerate().any(|(i, line)| {
        line.starts_with("@@") || is_file_header_pair(&lines, i) || is_new_file_header(&lines, i)
    })
}

pub(crate) fn is_file_header_pair(lines: &[&str], idx: usize) -> bool {
    lines[idx].starts_with("--- ")
        && lines
            .get(idx + 1)
            .is_some_and(|next| next.starts_with("+++ "))
}

pub(crate) fn is_new_file_header(lines: &[&str], idx: usize) -> bool {
    idx > 0 && lines[idx].starts_with("+++ ") && lines[idx - 1].starts_with("--- ")
}

/// Old and new ranges of one hunk header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HunkHeader {
    old_start: usize,
    old_count: usize,
    new_start: usize,
    new_count: usize,
}

impl HunkHeader {
    /// First old line after the hunk, `None` when the header overflows
    fn old_end(&self) -> Option<usize> {
        self.old_start.checked_add(self.old_count)
    }

    fn new_end(&self) -> Option<usize> {
        self.new_start.checked_add(self.new_count)
    }
}

/// Parse a range like "10,5" or "10" into (start, count)
fn parse_range(s: &str) -> Option<(usize, usize)> {
    match s.split_once(',') {
        Some((start, count)) => Some((start.parse().ok()?, count.parse().ok()?)),
        None => Some((s.parse().ok()?, 1)),
    }
}

/// Parse `@@ -old_start,old_count +new_start,new_count @@ optional section`
fn parse_hunk_header(header: &str) -> Option<HunkHeader> {
    let rest = header.strip_prefix("@@ -")?;
    let end = rest.find(" @@")?;
    let (old, new) = rest[..end].split_once(" +")?;
    let (old_start, old_count) = parse_range(old)?;
    let (new_start, new_count) = parse_range(new)?;

    if old_start == 0 && old_count != 0 {
        return None;
    }
    Some(HunkHeader {
        old_start,
        old_count,
        new_start,
        new_count,
    })
}

/// A single-file unified diff that `diffy` accepts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnifiedDiff {
    /// Patch text as handed to `diffy`, header included
    text: String,
    headers: Vec<HunkHeader>,
    pub old_path: Option<String>,
    pub new_path: Option<String>,
}

impl UnifiedDiff {
    /// Parse a strictly well-formed single-file unified diff.
    ///
    /// Text before the file header is ignored, the way `git apply` skips
    /// commit messages. Bare hunks without a header are accepted.
    pub fn parse(text: &str) -> Result<Self, DiffError> {
        let lines: Vec<&str> = text.lines().collect();
        let mut header_line = None;
        let mut headers: Vec<HunkHeader> = Vec::new();

        for (i, line) in lines.iter().enumerate() {
            if line.starts_with("--- ") {
                if !is_file_header_pair(&lines, i) {
                    return Err(DiffError::UnpairedHeader(i + 1));
                }
                if header_line.is_some() || !headers.is_empty() {
                    return Err(DiffError::MultipleFiles(i + 1));
                }
                header_line = Some(i);
            } else if line.starts_with("diff --git ")
                && (header_line.is_some() || !headers.is_empty())
            {
                return Err(DiffError::MultipleFiles(i + 1));
            } else if line.starts_with("@@") {
                let header =
                    parse_hunk_header(line).ok_or_else(|| DiffError::InvalidHunkHeader {
                        line: i + 1,
                        header: line.to_string(),
                    })?;
                let (Some(_), Some(_)) = (header.old_end(), header.new_end()) else {
                    return Err(DiffError::OutOfRange(header.old_start));
                };
                if let Some(prev) = headers.last() {
                    if prev.old_end().map_or(true, |end| header.old_start < end) {
                        return Err(DiffError::OutOfRange(header.old_start));
                    }
                }
                headers.push(header);
            }
        }

        if headers.is_empty() {
            return Err(DiffError::NoHunks);
        }

        let start = match header_line {
            Some(_) => line_offset(text, |line| line.starts_with("--- ")),
            None => line_offset(text, |line| line.starts_with("@@")),
        };
        let body = text[start..].trim_end_matches('\n');
        let mut patch_text = String::with_capacity(SYNTHETIC_HEADER.len() + body.len() + 1);
        if header_line.is_none() {
            patch_text.push_str(SYNTHETIC_HEADER);
        }
        patch_text.push_str(body);
        patch_text.push('\n');
        let text = patch_text;

        let patch = Patch::from_str(&text).map_err(|e| DiffError::Parse(e.to_string()))?;
        if patch.hunks().len() != headers.len() {
            return Err(DiffError::Parse(format!(
                "expected {} hunks, parsed {}",
                headers.len(),
                patch.hunks().len()
            )));
        }
        let (old_path, new_path) = match header_line {
            Some(_) => (
                patch.original().and_then(|p| header_path(p, "a/")),
                patch.modified().and_then(|p| header_path(p, "b/")),
            ),
            None => (None, None),
        };

        Ok(Self {
            text,
            headers,
            old_path,
            new_path,
        })
    }

    /// Apply the diff to `prior`, requiring every context and removed line
    /// to sit exactly where the hunk header says
    pub fn apply(&self, prior: &str) -> Result<String, DiffError> {
        let patch = Patch::from_str(&self.text).map_err(|e| DiffError::Parse(e.to_string()))?;
        let old: Vec<&str> = prior.split_inclusive('\n').collect();
        let inserted = self
            .headers
            .iter()
            .fold(0usize, |acc, h| acc.saturating_add(h.new_count));
        let new_limit = old.len().saturating_add(inserted).saturating_add(1);

        for (hunk, header) in patch.hunks().iter().zip(&self.headers) {
            let start = header.old_start.saturating_sub(1);
            let in_range = header.old_end().is_some_and(|end| end <= old.len() + 1)
                && header.new_start <= new_limit;
            if !in_range {
                return Err(DiffError::OutOfRange(header.old_start));
            }

            let mut pos = if header.old_count == 0 {
                header.old_start
            } else {
                start
            };
            for line in hunk.lines() {
                let expected = match line {
                    Line::Context(text) | Line::Delete(text) => *text,
                    Line::Insert(_) => continue,
                };
                match old.get(pos) {
                    Some(found) if *found == expected => {}
                    found => {
                        return Err(DiffError::ContextMismatch {
                            line: pos + 1,
                            expected: expected.trim_end_matches('\n').to_string(),
                            found: found.map(|f| f.trim_end_matches('\n').to_string()),
                        })
                    }
                }
                pos += 1;
            }
        }

        diffy::apply(prior, &patch).map_err(|e| DiffError::Apply(e.to_string()))
    }
}

/// Byte offset of the first line matching `pred`, or the end of the text
fn line_offset(text: &str, pred: impl Fn(&str) -> bool) -> usize {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if pred(line) {
            return offset;
        }
        offset += line.len();
    }
    offset
}

fn header_path(raw: &str, side_prefix: &str) -> Option<String> {
    let path = raw.split('\t').next().unwrap_or(raw).trim();
    if path == "/dev/null" {
        return None;
    }
    Some(path.strip_prefix(side_prefix).unwrap_or(path).to_string())
}
