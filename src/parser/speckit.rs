//! Speckit `tasks.md` parser.
//!
//! # Grammar
//!
//! - Phases are `## Phase <n>: <title>` headings.
//! - Tasks are checklist lines: `- [ ] T008 [P1] [PARALLEL] Title`.
//! - `[Pn]` maps to priority, `[P]`/`[PARALLEL]` to parallel eligibility.
//! - Any other `[TAG]` is kept as opaque metadata.

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

use crate::error::{Result, RoadsyncError};
use crate::model::{local_id, Document, Framework, Phase, Priority, Task, TaskStatus};
use crate::parser::checkbox_status;

static PHASE_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^##\s+Phase\s+(\d+(?:\.\d+)?)\s*:\s*(.+)$").unwrap());

/// Checklist line with a task anchor. The glyph group is deliberately loose
/// so a bad glyph is reported as malformed rather than silently skipped.
static TASK_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*-\s*\[(.?)\]\s*(T\d+)\s+(.*)$").unwrap());

static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\[([A-Za-z0-9:_.-]+)\]\s*").unwrap());

pub(crate) fn parse(path: &Path, content: &str) -> Result<Document> {
    let mut tasks: Vec<Task> = Vec::new();
    let mut phases: Vec<Phase> = Vec::new();
    let mut current_phase: Option<String> = None;

    for (idx, line) in content.lines().enumerate() {
        let line_number = idx + 1;

        if let Some(caps) = PHASE_HEADING.captures(line) {
            let number = normalize_number(&caps[1]);
            let anchor = format!("Phase-{number}");
            let phase_id = local_id(path, &anchor);
            phases.push(Phase {
                local_id: phase_id.clone(),
                anchor,
                number,
                title: caps[2].trim().to_string(),
                status: TaskStatus::Pending,
                goal: String::new(),
                task_ids: vec![],
                line_number,
                line_text: line.to_string(),
            });
            current_phase = Some(phase_id);
            continue;
        }

        if let Some(caps) = TASK_LINE.captures(line) {
            let Some(status) = checkbox_status(&caps[1]) else {
                return Err(RoadsyncError::Parse {
                    path: path.to_path_buf(),
                    line: line_number,
                    reason: format!("unrecognized checkbox glyph '[{}]'", &caps[1]),
                });
            };
            let anchor = caps[2].to_string();
            let (priority, parallel, extra_tags, title) = split_tags(&caps[3]);

            if title.is_empty() {
                return Err(RoadsyncError::Parse {
                    path: path.to_path_buf(),
                    line: line_number,
                    reason: format!("task {anchor} has no title"),
                });
            }

            tasks.push(Task {
                local_id: local_id(path, &anchor),
                anchor,
                title,
                status,
                priority,
                parallel_eligible: parallel,
                parent_phase_id: current_phase.clone(),
                extra_tags,
                line_number,
                line_text: line.to_string(),
            });
        }
    }

    if tasks.is_empty() {
        return Err(RoadsyncError::MissingSection {
            path: path.to_path_buf(),
            section: "task checklist".to_string(),
        });
    }

    Ok(Document {
        path: path.to_path_buf(),
        framework: Framework::Speckit,
        tasks,
        phases,
    })
}

fn normalize_number(raw: &str) -> String {
    let mut parts: Vec<String> = raw.split('.').map(str::to_string).collect();
    if let Ok(n) = parts[0].parse::<u32>() {
        parts[0] = n.to_string();
    }
    parts.join(".")
}

/// Consume leading `[TAG]` tokens from the text after the anchor.
fn split_tags(rest: &str) -> (Option<Priority>, bool, Vec<String>, String) {
    let mut priority = None;
    let mut parallel = false;
    let mut extra = Vec::new();
    let mut remainder = rest.trim_start();

    while let Some(caps) = TAG.captures(remainder) {
        let tag = caps[1].to_string();
        let upper = tag.to_uppercase();
        if upper == "P" || upper == "PARALLEL" {
            parallel = true;
        } else if let Ok(p) = upper.parse::<Priority>() {
            priority = Some(p);
        } else {
            extra.push(tag);
        }
        remainder = &remainder[caps[0].len()..];
    }

    (priority, parallel, extra, remainder.trim().to_string())
}
