//! Minimal, localized document rewrites.
//!
//! The rewrite step never regenerates a document. It splices individual
//! lines keyed by their recorded position and exact prior content, so every
//! byte the engine did not touch survives unchanged, including human
//! formatting and comments. A drifted anchor line is a `Rewrite` error, not
//! a silent overwrite.

use std::fs;
use std::path::Path;

use crate::error::{Result, RoadsyncError};

/// One line-level edit operation, keyed by anchor position and prior text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineEdit {
    /// 1-based line number recorded at parse time.
    pub line_number: usize,
    /// Exact line content expected at that position.
    pub old_line: String,
    /// Replacement content (without line terminator).
    pub new_line: String,
}

/// Flip the first checkbox glyph on a line. Returns `None` if the line
/// carries no checkbox.
#[must_use]
pub fn flip_checkbox(line: &str, done: bool) -> Option<String> {
    let glyph = if done { "[x]" } else { "[ ]" };
    for probe in ["[ ]", "[x]", "[X]"] {
        if let Some(pos) = line.find(probe) {
            let mut out = String::with_capacity(line.len());
            out.push_str(&line[..pos]);
            out.push_str(glyph);
            out.push_str(&line[pos + probe.len()..]);
            return Some(out);
        }
    }
    None
}

/// Replace the title text on a line, leaving markers and tags intact.
/// Returns `None` if the old title is not present.
#[must_use]
pub fn replace_title(line: &str, old_title: &str, new_title: &str) -> Option<String> {
    if old_title.is_empty() || !line.contains(old_title) {
        return None;
    }
    Some(line.replacen(old_title, new_title, 1))
}

/// Apply edits to document text, verifying each anchor line still matches.
///
/// Line terminators are preserved exactly; applying zero edits returns the
/// input byte-for-byte.
///
/// # Errors
///
/// Returns `Rewrite` if an edit's line number is out of range or the line
/// content has drifted since parse.
pub fn apply_edits(path: &Path, content: &str, edits: &[LineEdit]) -> Result<String> {
    if edits.is_empty() {
        return Ok(content.to_string());
    }

    let mut lines: Vec<String> = content.split_inclusive('\n').map(str::to_string).collect();

    for edit in edits {
        let idx = edit.line_number.checked_sub(1).ok_or_else(|| {
            RoadsyncError::Rewrite {
                path: path.to_path_buf(),
                reason: "edit references line 0".to_string(),
            }
        })?;
        let Some(slot) = lines.get_mut(idx) else {
            return Err(RoadsyncError::Rewrite {
                path: path.to_path_buf(),
                reason: format!("line {} no longer exists", edit.line_number),
            });
        };

        let (body, terminator) = split_terminator(slot);
        if body != edit.old_line {
            return Err(RoadsyncError::Rewrite {
                path: path.to_path_buf(),
                reason: format!(
                    "line {} changed since parse (expected '{}', found '{}')",
                    edit.line_number, edit.old_line, body
                ),
            });
        }

        *slot = format!("{}{}", edit.new_line, terminator);
    }

    Ok(lines.concat())
}

/// Read, edit, and write back a document in one pass.
///
/// # Errors
///
/// Propagates `apply_edits` failures and I/O errors as `Rewrite`.
pub fn rewrite_file(path: &Path, edits: &[LineEdit]) -> Result<()> {
    if edits.is_empty() {
        return Ok(());
    }
    let content = fs::read_to_string(path).map_err(|e| RoadsyncError::Rewrite {
        path: path.to_path_buf(),
        reason: format!("cannot read document: {e}"),
    })?;
    let updated = apply_edits(path, &content, edits)?;
    fs::write(path, updated).map_err(|e| RoadsyncError::Rewrite {
        path: path.to_path_buf(),
        reason: format!("cannot write document: {e}"),
    })
}

fn split_terminator(line: &str) -> (&str, &str) {
    if let Some(stripped) = line.strip_suffix("\r\n") {
        (stripped, "\r\n")
    } else if let Some(stripped) = line.strip_suffix('\n') {
        (stripped, "\n")
    } else {
        (line, "")
    }
}
