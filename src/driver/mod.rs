//! Sync cycle driver.
//!
//! Orchestrates one full cycle: parse every document, lock the identity
//! map, snapshot the remote, plan, then apply. Parsing happens before any
//! remote call so a malformed document aborts the cycle with zero side
//! effects. Application is resumable: every mutation is individually
//! recorded in the identity map as it lands, so a crash mid-cycle leaves a
//! state the next cycle converges from rather than duplicates.

use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{Result, RoadsyncError};
use crate::identity::{IdentityStore, MappingKind};
use crate::model::{
    Document, Framework, IssueState, Phase, RemoteIssue, SyncDirection,
};
use crate::parser::parse_document;
use crate::reconcile::{
    build_plan, Mutation, MutationKind, PushFields, ReconcileOptions, Snapshot,
};
use crate::remote::{compose_body, with_retry, IssueClient, IssueUpdate, NewIssue};
use crate::rewrite::rewrite_file;
use crate::util::hash::{local_phase_fingerprint, remote_fingerprint_from_parts};

/// Options for one sync cycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Plan and report without mutating either side.
    pub dry_run: bool,
    pub reconcile: ReconcileOptions,
}

/// Outcome of one sync cycle.
#[derive(Debug, Default, Serialize)]
pub struct SyncReport {
    pub created_issues: usize,
    pub created_milestones: usize,
    /// Unmapped tasks rebound to marker-matched issues instead of created.
    pub adopted: usize,
    pub updated: usize,
    pub pulled: usize,
    pub removed: usize,
    pub unlinked: usize,
    pub conflicts: usize,
    pub skipped: usize,
    /// Dry-run only: human renderings of the planned mutations.
    pub planned: Vec<String>,
    /// Per-item failures that did not abort the cycle, as `(local_id, error)`.
    pub errors: Vec<(String, String)>,
    /// A fatal remote error stopped application early; applied work was
    /// still committed.
    pub aborted: bool,
}

impl SyncReport {
    #[must_use]
    pub fn changed(&self) -> usize {
        self.created_issues
            + self.created_milestones
            + self.adopted
            + self.updated
            + self.pulled
            + self.removed
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && !self.aborted
    }
}

/// Read and parse every configured document.
///
/// # Errors
///
/// Returns `Io` for unreadable files and parse-family errors for malformed
/// content; any failure aborts before remote access.
pub fn load_documents(sources: &[(PathBuf, Framework)]) -> Result<Vec<Document>> {
    let mut documents = Vec::with_capacity(sources.len());
    for (path, framework) in sources {
        let content = fs::read_to_string(path)?;
        documents.push(parse_document(path, *framework, &content)?);
    }
    Ok(documents)
}

/// Run one sync cycle end to end.
///
/// # Errors
///
/// Returns `StoreLocked` when another cycle is running, and remote errors
/// from the snapshot reads. Application-phase failures are reported per
/// item in the returned `SyncReport` instead of failing the whole cycle.
pub fn run_cycle(
    documents: &[Document],
    client: &mut dyn IssueClient,
    store: &mut IdentityStore,
    opts: &SyncOptions,
) -> Result<SyncReport> {
    store.begin_cycle()?;
    let result = run_locked(documents, client, store, opts);
    match &result {
        Ok(report) if opts.dry_run => {
            debug!(planned = report.planned.len(), "dry run, rolling back");
            store.rollback_cycle()?;
        }
        Ok(_) => store.commit_cycle()?,
        Err(_) => store.rollback_cycle()?,
    }
    result
}

fn run_locked(
    documents: &[Document],
    client: &mut dyn IssueClient,
    store: &mut IdentityStore,
    opts: &SyncOptions,
) -> Result<SyncReport> {
    let issues = with_retry("list_issues", || client.list_issues())?;
    let milestones = with_retry("list_milestones", || client.list_milestones())?;
    info!(
        documents = documents.len(),
        issues = issues.len(),
        milestones = milestones.len(),
        "snapshot complete"
    );

    let snapshot = Snapshot {
        documents,
        issues: &issues,
        milestones: &milestones,
    };
    let plan = build_plan(&snapshot, store, &opts.reconcile)?;

    let mut report = SyncReport {
        conflicts: plan.conflicts,
        skipped: plan.skipped,
        ..SyncReport::default()
    };

    if opts.dry_run {
        report.planned = plan.mutations.iter().map(Mutation::describe).collect();
        return Ok(report);
    }

    let issue_index: HashMap<u64, &RemoteIssue> =
        issues.iter().map(|i| (i.remote_id, i)).collect();
    let phase_index: HashMap<&str, &Phase> = documents
        .iter()
        .flat_map(|d| d.phases.iter())
        .map(|p| (p.local_id.as_str(), p))
        .collect();
    // Milestones created this cycle, keyed by phase local id.
    let mut new_milestones: HashMap<String, u64> = HashMap::new();

    for mutation in &plan.mutations {
        debug!(key = %mutation.key, action = mutation.kind.name(), "applying");
        let applied = apply_mutation(
            mutation,
            client,
            store,
            &issue_index,
            &phase_index,
            &mut new_milestones,
            &mut report,
        );
        match applied {
            Ok(()) => {}
            Err(e) if matches!(e, RoadsyncError::RemoteFatal { .. } | RoadsyncError::MissingToken) => {
                warn!(local_id = %mutation.local_id, error = %e, "fatal remote error, stopping cycle");
                report.errors.push((mutation.local_id.clone(), e.to_string()));
                report.aborted = true;
                break;
            }
            Err(e) => {
                warn!(local_id = %mutation.local_id, error = %e, "mutation failed, continuing");
                report.errors.push((mutation.local_id.clone(), e.to_string()));
            }
        }
    }

    store.set_meta("last_cycle_at", &chrono::Utc::now().to_rfc3339())?;
    info!(
        created_issues = report.created_issues,
        updated = report.updated,
        pulled = report.pulled,
        conflicts = report.conflicts,
        errors = report.errors.len(),
        "cycle applied"
    );
    Ok(report)
}

#[allow(clippy::too_many_lines)]
fn apply_mutation(
    mutation: &Mutation,
    client: &mut dyn IssueClient,
    store: &mut IdentityStore,
    issue_index: &HashMap<u64, &RemoteIssue>,
    phase_index: &HashMap<&str, &Phase>,
    new_milestones: &mut HashMap<String, u64>,
    report: &mut SyncReport,
) -> Result<()> {
    match &mutation.kind {
        MutationKind::EnsureLabel { name, color } => {
            with_retry("create_label", || client.create_label_if_absent(name, color))
        }

        MutationKind::CreateMilestone { title, description, rebind } => {
            let milestone =
                with_retry("create_milestone", || client.create_milestone(title, description))?;
            if *rebind {
                store.unbind(&mutation.local_id)?;
            }
            store.bind(&mutation.local_id, milestone.remote_id, MappingKind::Phase)?;
            store.clear_tombstone(&mutation.local_id)?;
            let local_fp = phase_index
                .get(mutation.local_id.as_str())
                .map(|p| local_phase_fingerprint(p))
                .unwrap_or_default();
            let remote_fp =
                remote_fingerprint_from_parts(&milestone.title, IssueState::Open, &[], None);
            store.record_sync(&mutation.local_id, SyncDirection::LocalToRemote, &local_fp, &remote_fp)?;
            new_milestones.insert(mutation.local_id.clone(), milestone.remote_id);
            report.created_milestones += 1;
            Ok(())
        }

        MutationKind::CreateIssue {
            title,
            doc_path,
            labels,
            phase_local_id,
            phase_title,
            close_after,
            rebind,
            new_local_fp,
        } => {
            let milestone = phase_local_id
                .as_deref()
                .and_then(|pid| resolve_milestone(pid, store, new_milestones));
            let new = NewIssue {
                title: title.clone(),
                body: compose_body(&mutation.local_id, doc_path, phase_title.as_deref()),
                labels: labels.clone(),
                milestone,
            };
            let issue = create_with_adoption(client, &mutation.local_id, &new)?;

            if *rebind {
                store.unbind(&mutation.local_id)?;
            }
            store.bind(&mutation.local_id, issue.remote_id, MappingKind::Task)?;

            let mut state = issue.state;
            if *close_after && state == IssueState::Open {
                with_retry("close_issue", || client.close_issue(issue.remote_id))?;
                state = IssueState::Closed;
            }

            let mut label_refs: Vec<&str> = labels.iter().map(String::as_str).collect();
            label_refs.sort_unstable();
            let remote_fp = remote_fingerprint_from_parts(title, state, &label_refs, milestone);
            store.record_sync(&mutation.local_id, SyncDirection::LocalToRemote, new_local_fp, &remote_fp)?;
            report.created_issues += 1;
            Ok(())
        }

        MutationKind::AdoptIssue { remote_id, fields, doc_path, edit, new_local_fp } => {
            store.bind(&mutation.local_id, *remote_id, MappingKind::Task)?;
            let remote_fp = push_to_remote(
                client,
                store,
                issue_index,
                new_milestones,
                *remote_id,
                fields,
            )?;
            if let Some(edit) = edit {
                rewrite_file(doc_path, std::slice::from_ref(edit))?;
            }
            store.record_sync(&mutation.local_id, SyncDirection::LocalToRemote, new_local_fp, &remote_fp)?;
            report.adopted += 1;
            Ok(())
        }

        MutationKind::PushIssue { remote_id, fields, new_local_fp } => {
            let remote_fp = push_to_remote(
                client,
                store,
                issue_index,
                new_milestones,
                *remote_id,
                fields,
            )?;
            store.record_sync(&mutation.local_id, SyncDirection::LocalToRemote, new_local_fp, &remote_fp)?;
            report.updated += 1;
            Ok(())
        }

        MutationKind::PullLocal { doc_path, edit, new_local_fp, remote_fp } => {
            if edit.old_line != edit.new_line {
                rewrite_file(doc_path, std::slice::from_ref(edit))?;
            }
            store.record_sync(&mutation.local_id, SyncDirection::RemoteToLocal, new_local_fp, remote_fp)?;
            report.pulled += 1;
            Ok(())
        }

        MutationKind::ResolveConflict { remote_id, fields, doc_path, edit, new_local_fp } => {
            let remote_fp = push_to_remote(
                client,
                store,
                issue_index,
                new_milestones,
                *remote_id,
                fields,
            )?;
            if let Some(edit) = edit {
                rewrite_file(doc_path, std::slice::from_ref(edit))?;
            }
            store.record_sync(&mutation.local_id, SyncDirection::LocalToRemote, new_local_fp, &remote_fp)?;
            report.updated += 1;
            Ok(())
        }

        MutationKind::MarkRemoved { doc_path, edit } => {
            rewrite_file(doc_path, std::slice::from_ref(edit))?;
            store.unbind(&mutation.local_id)?;
            report.removed += 1;
            Ok(())
        }

        MutationKind::RetirePhase => {
            store.unbind(&mutation.local_id)?;
            store.add_tombstone(&mutation.local_id, MappingKind::Phase)?;
            report.removed += 1;
            Ok(())
        }

        MutationKind::Unlink => {
            store.unbind(&mutation.local_id)?;
            report.unlinked += 1;
            Ok(())
        }
    }
}

/// Apply a push's field updates and state change, returning the predicted
/// remote fingerprint after the mutation.
fn push_to_remote(
    client: &mut dyn IssueClient,
    store: &IdentityStore,
    issue_index: &HashMap<u64, &RemoteIssue>,
    new_milestones: &HashMap<String, u64>,
    remote_id: u64,
    fields: &PushFields,
) -> Result<String> {
    let current = issue_index.get(&remote_id).ok_or_else(|| RoadsyncError::RemoteFatal {
        status: 404,
        message: format!("issue #{remote_id} vanished between snapshot and apply"),
    })?;

    let milestone = match fields.milestone_phase.as_deref() {
        Some(pid) => resolve_milestone(pid, store, new_milestones),
        None => current.milestone,
    };

    let update = IssueUpdate {
        title: fields.title.clone(),
        labels: fields.labels.clone(),
        milestone: if milestone == current.milestone { None } else { milestone },
    };
    if !update.is_empty() {
        with_retry("update_issue", || client.update_issue(remote_id, &update))?;
    }

    let mut state = current.state;
    match fields.set_state {
        Some(IssueState::Closed) if state == IssueState::Open => {
            with_retry("close_issue", || client.close_issue(remote_id))?;
            state = IssueState::Closed;
        }
        Some(IssueState::Open) if state == IssueState::Closed => {
            with_retry("reopen_issue", || client.reopen_issue(remote_id))?;
            state = IssueState::Open;
        }
        _ => {}
    }

    let title = fields.title.as_deref().unwrap_or(&current.title);
    let labels: Vec<&str> = match &fields.labels {
        Some(names) => names.iter().map(String::as_str).collect(),
        None => current.labels.iter().map(String::as_str).collect(),
    };
    Ok(remote_fingerprint_from_parts(title, state, &labels, milestone))
}

/// Milestone number for a phase: bound earlier, or created this cycle.
fn resolve_milestone(
    phase_local_id: &str,
    store: &IdentityStore,
    new_milestones: &HashMap<String, u64>,
) -> Option<u64> {
    if let Some(id) = new_milestones.get(phase_local_id) {
        return Some(*id);
    }
    store
        .lookup(phase_local_id)
        .ok()
        .flatten()
        .map(|m| m.remote_id)
}

/// Create an issue, never blind-retrying the create itself.
///
/// A transient create failure is ambiguous: the issue may have landed even
/// though the response was lost. Before each retry the remote is re-read
/// and an issue carrying our marker is adopted instead of re-created, so a
/// flaky network cannot duplicate issues.
fn create_with_adoption(
    client: &mut dyn IssueClient,
    local_id: &str,
    new: &NewIssue,
) -> Result<RemoteIssue> {
    let mut attempt = 0;
    loop {
        match client.create_issue(new) {
            Ok(issue) => return Ok(issue),
            Err(e) if e.is_transient() => {
                if let Some(issue) = adopt_by_marker(client, local_id)? {
                    info!(local_id, remote_id = issue.remote_id, "adopted issue by marker");
                    return Ok(issue);
                }
                attempt += 1;
                if attempt >= crate::remote::MAX_ATTEMPTS {
                    return Err(e);
                }
                warn!(local_id, attempt, error = %e, "create failed without landing, retrying");
            }
            Err(e) => return Err(e),
        }
    }
}

/// Look for an existing issue carrying our marker.
fn adopt_by_marker(client: &mut dyn IssueClient, local_id: &str) -> Result<Option<RemoteIssue>> {
    let issues = with_retry("list_issues", || client.list_issues())?;
    Ok(issues
        .into_iter()
        .find(|i| i.marker.as_deref() == Some(local_id)))
}

/// Default document sources under a project root, probing the known
/// framework conventions.
#[must_use]
pub fn discover_sources(root: &Path) -> Vec<(PathBuf, Framework)> {
    let mut sources = Vec::new();
    let speckit = root.join("tasks.md");
    if speckit.is_file() {
        sources.push((speckit, Framework::Speckit));
    }
    for candidate in [root.join("ROADMAP.md"), root.join(".planning/ROADMAP.md")] {
        if candidate.is_file() {
            sources.push((candidate, Framework::Gsd));
            break;
        }
    }
    sources
}
