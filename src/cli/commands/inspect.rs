//! Inspect command implementation.
//!
//! Parses planning documents and prints the normalized graph without any
//! remote access, so it works offline and in CI.

use std::path::Path;

use crate::cli::InspectArgs;
use crate::config::{discover_roadsync_dir, guess_framework, ProjectConfig};
use crate::driver::load_documents;
use crate::error::Result;
use crate::model::{Document, TaskStatus};

/// Execute the inspect command.
///
/// # Errors
///
/// Returns parse-family errors for malformed documents, and config errors
/// when no explicit path is given and the workspace is uninitialized.
pub fn execute(args: &InspectArgs, json: bool) -> Result<()> {
    let sources = match (&args.path, args.framework) {
        (Some(path), Some(framework)) => vec![(path.clone(), framework)],
        (Some(path), None) => {
            let framework = guess_framework(path)?;
            vec![(path.clone(), framework)]
        }
        (None, _) => {
            let roadsync_dir = discover_roadsync_dir(Some(Path::new(".")))?;
            let config = ProjectConfig::load(&roadsync_dir)?;
            config.resolved_sources(&roadsync_dir)
        }
    };

    let documents = load_documents(&sources)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&documents)?);
        return Ok(());
    }

    for doc in &documents {
        print_document(doc);
    }
    Ok(())
}

fn print_document(doc: &Document) {
    println!("{} ({})", doc.path.display(), doc.framework);
    for phase in &doc.phases {
        println!("  Phase {}: {} [{}]", phase.number, phase.title, phase.status);
        for task_id in &phase.task_ids {
            if let Some(task) = doc.task(task_id) {
                println!("    {} {}", status_glyph(task.status), task_line(task));
            }
        }
    }
    let orphans: Vec<_> = doc
        .tasks
        .iter()
        .filter(|t| t.parent_phase_id.is_none())
        .collect();
    if !orphans.is_empty() {
        println!("  (no phase)");
        for task in orphans {
            println!("    {} {}", status_glyph(task.status), task_line(task));
        }
    }
}

const fn status_glyph(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "[ ]",
        TaskStatus::Done => "[x]",
        TaskStatus::Removed => "[-]",
    }
}

fn task_line(task: &crate::model::Task) -> String {
    let mut line = format!("{} {}", task.anchor, task.title);
    if let Some(p) = task.priority {
        line.push_str(&format!(" ({p})"));
    }
    if task.parallel_eligible {
        line.push_str(" (parallel)");
    }
    line
}
