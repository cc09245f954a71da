//! Sync command implementation.

use std::path::{Path, PathBuf};
use tracing::info;

use crate::cli::SyncArgs;
use crate::config::{
    discover_roadsync_dir, guess_framework, project_root, resolve_db_path, resolve_token,
    ProjectConfig,
};
use crate::driver::{load_documents, run_cycle, SyncOptions, SyncReport};
use crate::error::{Result, RoadsyncError};
use crate::identity::IdentityStore;
use crate::reconcile::ReconcileOptions;
use crate::remote::{GithubClient, DEFAULT_API_BASE};

/// Execute the sync command.
///
/// # Errors
///
/// Returns an error when the workspace is uninitialized, documents fail to
/// parse, the identity map is locked, or the remote snapshot fails. Per-item
/// apply failures are reported and surface as a nonzero exit.
pub fn execute(
    args: &SyncArgs,
    json: bool,
    db_override: Option<&PathBuf>,
    token_override: Option<&str>,
) -> Result<()> {
    let roadsync_dir = discover_roadsync_dir(Some(Path::new(".")))?;
    let config = ProjectConfig::load(&roadsync_dir)?;

    let mut sources = if args.docs.is_empty() {
        config.resolved_sources(&roadsync_dir)
    } else {
        let root = project_root(&roadsync_dir);
        args.docs
            .iter()
            .map(|path| {
                let framework = match args.framework {
                    Some(framework) => framework,
                    None => guess_framework(path)?,
                };
                let resolved = if path.is_absolute() {
                    path.clone()
                } else {
                    root.join(path)
                };
                Ok((resolved, framework))
            })
            .collect::<Result<Vec<_>>>()?
    };
    if let Some(framework) = args.framework {
        sources.retain(|(_, f)| *f == framework);
    }
    if sources.is_empty() {
        return Err(RoadsyncError::Config(
            "no planning documents selected; add them to .roadsync/config.yaml".to_string(),
        ));
    }
    // Parse everything before touching the identity map or the network.
    let documents = load_documents(&sources)?;

    let token = resolve_token(token_override)?;
    let api_base = config.api_base.as_deref().unwrap_or(DEFAULT_API_BASE);
    let mut client = GithubClient::new(api_base, &config.owner, &config.repo, &token);

    let mut store = IdentityStore::open(&resolve_db_path(&roadsync_dir, db_override))?;
    let opts = SyncOptions {
        dry_run: args.dry_run,
        reconcile: ReconcileOptions {
            on_remote_delete: args.on_remote_delete.unwrap_or(config.on_remote_delete),
        },
    };

    info!(owner = %config.owner, repo = %config.repo, dry_run = args.dry_run, "starting sync cycle");
    let report = run_cycle(&documents, &mut client, &mut store, &opts)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, args.dry_run);
    }

    if report.is_clean() {
        Ok(())
    } else {
        Err(RoadsyncError::Other(anyhow::anyhow!(
            "{} item(s) failed to sync",
            report.errors.len()
        )))
    }
}

fn print_report(report: &SyncReport, dry_run: bool) {
    if dry_run {
        if report.planned.is_empty() {
            println!("Nothing to do; both sides are in sync.");
        } else {
            println!("Planned mutations ({}):", report.planned.len());
            for line in &report.planned {
                println!("  {line}");
            }
        }
        if report.conflicts > 0 {
            println!("{} conflict(s) would be tie-broken.", report.conflicts);
        }
        return;
    }

    if report.changed() == 0 && report.errors.is_empty() {
        println!("Nothing to do; both sides are in sync.");
    } else {
        println!(
            "Synced: {} issue(s) created, {} milestone(s) created, {} pushed, {} pulled, {} removed",
            report.created_issues,
            report.created_milestones,
            report.updated,
            report.pulled,
            report.removed
        );
        if report.adopted > 0 {
            println!("Adopted {} orphaned issue(s) from an interrupted cycle.", report.adopted);
        }
    }
    if report.conflicts > 0 {
        println!("{} conflict(s) resolved (remote status, local metadata).", report.conflicts);
    }
    for (local_id, error) in &report.errors {
        eprintln!("  failed: {local_id}: {error}");
    }
    if report.aborted {
        eprintln!("Cycle stopped early on a fatal remote error; applied work was kept.");
    }
}
