//! Document model parsers.
//!
//! Each framework's markdown convention parses into the same normalized
//! `Document` graph. Parsing is a pure function of text: no I/O, no side
//! effects. Unknown `[TAG]`s are preserved as opaque metadata so documents
//! the engine does not fully understand still round-trip losslessly.

mod gsd;
mod speckit;

use std::collections::HashSet;
use std::path::Path;

use crate::error::{Result, RoadsyncError};
use crate::model::{Document, Framework, TaskStatus};

/// Parse document text into the normalized task/phase graph.
///
/// # Errors
///
/// Returns `Parse` for a malformed checklist line, `MissingSection` when the
/// framework's required structure is absent, and `DuplicateAnchor` when two
/// entries in one document share an anchor.
pub fn parse_document(path: &Path, framework: Framework, content: &str) -> Result<Document> {
    let mut doc = match framework {
        Framework::Speckit => speckit::parse(path, content)?,
        Framework::Gsd => gsd::parse(path, content)?,
    };
    check_unique_anchors(&doc)?;
    apply_removed_tags(&mut doc);
    link_phase_children(&mut doc);
    Ok(doc)
}

/// Suffix written when a task's remote counterpart was deleted and the
/// mark-removed policy tagged the local line.
pub const REMOVED_TAG: &str = "[REMOVED]";

/// Map a checkbox glyph to a task status. `None` for unrecognized glyphs.
pub(crate) fn checkbox_status(glyph: &str) -> Option<TaskStatus> {
    match glyph {
        " " => Some(TaskStatus::Pending),
        "x" | "X" => Some(TaskStatus::Done),
        _ => None,
    }
}

/// A trailing `[REMOVED]` tag marks a task as removed regardless of its
/// checkbox glyph. The tag is stripped from the title so fingerprints and
/// pushes see the clean title.
fn apply_removed_tags(doc: &mut Document) {
    for task in &mut doc.tasks {
        if let Some(stripped) = task.title.strip_suffix(REMOVED_TAG) {
            task.title = stripped.trim_end().to_string();
            task.status = TaskStatus::Removed;
        }
    }
}

fn check_unique_anchors(doc: &Document) -> Result<()> {
    let mut seen: HashSet<&str> = HashSet::new();
    for anchor in doc
        .tasks
        .iter()
        .map(|t| t.anchor.as_str())
        .chain(doc.phases.iter().map(|p| p.anchor.as_str()))
    {
        if !seen.insert(anchor) {
            return Err(RoadsyncError::DuplicateAnchor {
                path: doc.path.clone(),
                anchor: anchor.to_string(),
            });
        }
    }
    Ok(())
}

/// Populate each phase's ordered child list from the tasks' parent links.
/// Document order is the total order.
fn link_phase_children(doc: &mut Document) {
    for phase in &mut doc.phases {
        phase.task_ids = doc
            .tasks
            .iter()
            .filter(|t| t.parent_phase_id.as_deref() == Some(phase.local_id.as_str()))
            .map(|t| t.local_id.clone())
            .collect();
    }
}
