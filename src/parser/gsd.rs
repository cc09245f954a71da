//! GSD `ROADMAP.md` parser.
//!
//! # Grammar
//!
//! - Phase checklist entries: `- [ ] **Phase 1: Name** - description`
//! - Phase detail headers (after `## Phase Details`): `### Phase 1: Name`,
//!   with `**Goal**: ...` lines below. Detail and checklist entries for the
//!   same phase number merge; `01` and `1` are the same phase.
//! - Plan lines: `- [ ] 01-02: Description`, anchored as `Plan-01-02`
//!   (dots stripped from the phase part).

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

use crate::error::{Result, RoadsyncError};
use crate::model::{local_id, Document, Framework, Phase, Task, TaskStatus};
use crate::parser::checkbox_status;

static PHASE_CHECKBOX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*-\s*\[(.?)\]\s*\*\*Phase\s+(\d+(?:\.\d+)?)\s*:\s*(.+?)\*\*\s*(?:-\s*(.+))?$")
        .unwrap()
});

static PHASE_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^###\s*Phase\s+(\d+(?:\.\d+)?)\s*:\s*(.+)$").unwrap());

static PLAN_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*-\s*\[(.?)\]\s*(\d+(?:\.\d+)?)-(\d+)\s*:\s*(.+)$").unwrap());

static GOAL_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\*\*Goal\*\*:\s*(.+)$").unwrap());

/// Normalize a phase number for comparison: `01` -> `1`, `02.1` -> `2.1`.
fn normalize_phase(raw: &str) -> String {
    let mut parts: Vec<String> = raw.split('.').map(str::to_string).collect();
    if let Ok(n) = parts[0].parse::<u32>() {
        parts[0] = n.to_string();
    }
    parts.join(".")
}

pub(crate) fn parse(path: &Path, content: &str) -> Result<Document> {
    let mut phases: Vec<Phase> = Vec::new();
    let mut tasks: Vec<Task> = Vec::new();
    let mut in_phase_details = false;
    let mut current_phase_idx: Option<usize> = None;

    for (idx, line) in content.lines().enumerate() {
        let line_number = idx + 1;

        if line.contains("## Phase Details") {
            in_phase_details = true;
            continue;
        }

        if in_phase_details {
            if let Some(caps) = PHASE_HEADER.captures(line) {
                let number = normalize_phase(&caps[1]);
                let title = caps[2].trim().to_string();
                let pos = find_or_insert_phase(
                    &mut phases,
                    path,
                    &number,
                    &title,
                    line_number,
                    line,
                );
                current_phase_idx = Some(pos);
                continue;
            }
            if let (Some(pos), Some(caps)) = (current_phase_idx, GOAL_LINE.captures(line)) {
                phases[pos].goal = caps[1].trim().to_string();
                continue;
            }
        } else if let Some(caps) = PHASE_CHECKBOX.captures(line) {
            let Some(status) = checkbox_status(&caps[1]) else {
                return Err(RoadsyncError::Parse {
                    path: path.to_path_buf(),
                    line: line_number,
                    reason: format!("unrecognized checkbox glyph '[{}]'", &caps[1]),
                });
            };
            let number = normalize_phase(&caps[2]);
            let title = caps[3].trim().to_string();
            let pos =
                find_or_insert_phase(&mut phases, path, &number, &title, line_number, line);
            // Checklist entry carries the authoritative status and anchor line.
            phases[pos].status = status;
            phases[pos].line_number = line_number;
            phases[pos].line_text = line.to_string();
            continue;
        }

        if let Some(caps) = PLAN_LINE.captures(line) {
            let Some(status) = checkbox_status(&caps[1]) else {
                return Err(RoadsyncError::Parse {
                    path: path.to_path_buf(),
                    line: line_number,
                    reason: format!("unrecognized checkbox glyph '[{}]'", &caps[1]),
                });
            };
            let phase_num = caps[2].to_string();
            let plan_num = caps[3].to_string();
            let anchor = format!("Plan-{}-{}", phase_num.replace('.', ""), plan_num);
            let normalized = normalize_phase(&phase_num);
            let parent = phases
                .iter()
                .find(|p| p.number == normalized)
                .map(|p| p.local_id.clone());

            tasks.push(Task {
                local_id: local_id(path, &anchor),
                anchor,
                title: caps[4].trim().to_string(),
                status,
                priority: None,
                parallel_eligible: false,
                parent_phase_id: parent,
                extra_tags: vec![],
                line_number,
                line_text: line.to_string(),
            });
        }
    }

    if phases.is_empty() {
        return Err(RoadsyncError::MissingSection {
            path: path.to_path_buf(),
            section: "phases".to_string(),
        });
    }

    // Plans can appear before their phase's checklist entry; resolve the
    // stragglers once all phases are known.
    for task in &mut tasks {
        if task.parent_phase_id.is_none() {
            if let Some((num, _)) = task.anchor.trim_start_matches("Plan-").split_once('-') {
                let normalized = normalize_phase(num);
                task.parent_phase_id = phases
                    .iter()
                    .find(|p| p.number == normalized)
                    .map(|p| p.local_id.clone());
            }
        }
    }

    Ok(Document {
        path: path.to_path_buf(),
        framework: Framework::Gsd,
        tasks,
        phases,
    })
}

fn find_or_insert_phase(
    phases: &mut Vec<Phase>,
    path: &Path,
    number: &str,
    title: &str,
    line_number: usize,
    line: &str,
) -> usize {
    if let Some(pos) = phases.iter().position(|p| p.number == number) {
        return pos;
    }
    let anchor = format!("Phase-{number}");
    phases.push(Phase {
        local_id: local_id(path, &anchor),
        anchor,
        number: number.to_string(),
        title: title.to_string(),
        status: TaskStatus::Pending,
        goal: String::new(),
        task_ids: vec![],
        line_number,
        line_text: line.to_string(),
    });
    phases.len() - 1
}
