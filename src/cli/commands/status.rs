//! Status command implementation.
//!
//! Shows identity map bindings and the last cycle timestamp without
//! touching the remote tracker.

use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::config::{discover_roadsync_dir, resolve_db_path};
use crate::error::Result;
use crate::identity::{IdentityStore, Mapping, MappingKind};

#[derive(Serialize)]
struct StatusOutput<'a> {
    mappings: &'a [Mapping],
    tasks: usize,
    phases: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_cycle_at: Option<String>,
}

/// Execute the status command.
///
/// # Errors
///
/// Returns an error when the workspace is uninitialized or the identity
/// map cannot be read.
pub fn execute(json: bool, db_override: Option<&PathBuf>) -> Result<()> {
    let roadsync_dir = discover_roadsync_dir(Some(Path::new(".")))?;
    let store = IdentityStore::open(&resolve_db_path(&roadsync_dir, db_override))?;

    let mappings = store.all_mappings()?;
    let tasks = mappings.iter().filter(|m| m.kind == MappingKind::Task).count();
    let phases = mappings.len() - tasks;
    let last_cycle_at = store.get_meta("last_cycle_at")?;

    if json {
        let output = StatusOutput {
            mappings: &mappings,
            tasks,
            phases,
            last_cycle_at,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("{tasks} task binding(s), {phases} phase binding(s)");
    match last_cycle_at {
        Some(ts) => println!("Last cycle: {ts}"),
        None => println!("No sync cycle has run yet"),
    }
    for m in &mappings {
        println!(
            "  {} -> #{} ({}, last {})",
            m.local_id,
            m.remote_id,
            m.kind,
            m.last_synced_direction.as_str()
        );
    }
    Ok(())
}
