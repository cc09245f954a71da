//! Init command implementation.

use std::fs;
use std::path::Path;

use crate::cli::InitArgs;
use crate::config::{DocumentSource, ProjectConfig};
use crate::driver::discover_sources;
use crate::error::{Result, RoadsyncError};
use crate::identity::IdentityStore;

/// Execute the init command.
///
/// # Errors
///
/// Returns `AlreadyInitialized` when a config exists and `--force` was not
/// given, or an error if the directory or identity map cannot be created.
pub fn execute(args: &InitArgs, root_dir: Option<&Path>) -> Result<()> {
    let base_dir = root_dir.unwrap_or_else(|| Path::new("."));
    let roadsync_dir = base_dir.join(".roadsync");

    if roadsync_dir.join("config.yaml").exists() && !args.force {
        return Err(RoadsyncError::AlreadyInitialized { path: roadsync_dir });
    }
    if !roadsync_dir.exists() {
        fs::create_dir(&roadsync_dir)?;
    }

    let documents = discover_sources(base_dir)
        .into_iter()
        .map(|(path, framework)| DocumentSource {
            path: path.strip_prefix(base_dir).unwrap_or(&path).to_path_buf(),
            framework,
        })
        .collect::<Vec<_>>();

    let config = ProjectConfig {
        owner: args.owner.clone(),
        repo: args.repo.clone(),
        api_base: args.api_base.clone(),
        documents,
        on_remote_delete: Default::default(),
    };
    config.save(&roadsync_dir)?;

    // Create the identity map up front so a first sync on a read-only
    // checkout fails at init, not mid-cycle.
    IdentityStore::open(&roadsync_dir.join("identity.db"))?;

    let gitignore_path = roadsync_dir.join(".gitignore");
    if !gitignore_path.exists() {
        fs::write(
            gitignore_path,
            "# Identity map\n*.db\n*.db-shm\n*.db-wal\n",
        )?;
    }

    println!("Initialized roadsync for {}/{}", config.owner, config.repo);
    if config.documents.is_empty() {
        println!("No planning documents found; add them to .roadsync/config.yaml");
    } else {
        for doc in &config.documents {
            println!("  tracking {} ({})", doc.path.display(), doc.framework);
        }
    }
    Ok(())
}
