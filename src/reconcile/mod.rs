//! Reconciliation engine.
//!
//! Compares the local document graph and the remote snapshot through the
//! identity map and emits a minimal, ordered plan of mutations. Pure with
//! respect to the outside world: nothing here touches the network or the
//! filesystem; the driver executes the plan.
//!
//! # Conflict policy
//!
//! When both sides changed since the last sync and disagree, the tie-break
//! is deterministic and asymmetric: remote wins `status` (a closed issue is
//! an authoritative completion signal), local wins `title`/`priority`/
//! `labels` (the document is authoritative for descriptive metadata).
//!
//! # Ordering
//!
//! Labels → milestone creates → issue creates → pushes/conflicts → pulls →
//! removals. Creates precede anything that references them, so the sequence
//! stays referentially valid at every step and is safely resumable.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

use crate::error::Result;
use crate::identity::{IdentityStore, Mapping, MappingKind};
use crate::model::{
    labels_for_task, Document, IssueState, Label, Phase, RemoteIssue, RemoteMilestone, Task,
    TaskStatus,
};
use crate::rewrite::{flip_checkbox, replace_title, LineEdit};
use crate::util::hash::{
    idempotency_key, local_phase_fingerprint, local_task_fingerprint, remote_issue_fingerprint,
};

/// Policy for a mapped task whose remote counterpart was deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum, Default)]
#[serde(rename_all = "kebab-case")]
pub enum OnRemoteDelete {
    /// Mark the task removed locally (default; avoids issue-creation storms
    /// from accidental remote deletions).
    #[default]
    MarkRemoved,
    /// Recreate the remote issue and rebind.
    Recreate,
}

/// Reconciliation options.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReconcileOptions {
    pub on_remote_delete: OnRemoteDelete,
}

/// Everything the engine reads for one cycle.
#[derive(Debug)]
pub struct Snapshot<'a> {
    pub documents: &'a [Document],
    pub issues: &'a [RemoteIssue],
    pub milestones: &'a [RemoteMilestone],
}

/// One proposed change to one side, carrying its idempotency key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    /// `sha256(local_id ∥ kind ∥ fingerprint)`, truncated.
    pub key: String,
    pub local_id: String,
    pub kind: MutationKind,
}

/// Field updates pushed to an existing remote issue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushFields {
    pub title: Option<String>,
    pub labels: Option<Vec<String>>,
    /// Owning phase's local id; the driver resolves the milestone number at
    /// apply time, after milestone creates have run.
    pub milestone_phase: Option<String>,
    pub set_state: Option<IssueState>,
}

impl PushFields {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.labels.is_none()
            && self.milestone_phase.is_none()
            && self.set_state.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationKind {
    /// Ensure a derived label exists remotely.
    EnsureLabel { name: String, color: String },

    /// Create the milestone for an unmapped phase.
    CreateMilestone {
        title: String,
        description: String,
        /// Replace an existing binding (remote milestone was deleted).
        rebind: bool,
    },

    /// An unmapped task whose issue already exists remotely (sync marker
    /// match): a prior cycle created it but was interrupted before the
    /// binding committed. Bind instead of creating a duplicate, then
    /// converge the pair under the conflict tie-break.
    AdoptIssue {
        remote_id: u64,
        fields: PushFields,
        doc_path: std::path::PathBuf,
        edit: Option<LineEdit>,
        new_local_fp: String,
    },

    /// Create the issue for an unmapped task and bind it.
    CreateIssue {
        title: String,
        doc_path: String,
        labels: Vec<String>,
        phase_local_id: Option<String>,
        phase_title: Option<String>,
        /// Local task is already done; close right after creating.
        close_after: bool,
        /// Replace an existing binding (remote issue was deleted).
        rebind: bool,
        new_local_fp: String,
    },

    /// Push local changes to the mapped remote issue.
    PushIssue {
        remote_id: u64,
        fields: PushFields,
        new_local_fp: String,
    },

    /// Pull remote changes into the document (localized rewrite).
    PullLocal {
        doc_path: std::path::PathBuf,
        edit: LineEdit,
        new_local_fp: String,
        remote_fp: String,
    },

    /// Both sides changed: push descriptive fields, pull status.
    ResolveConflict {
        remote_id: u64,
        fields: PushFields,
        doc_path: std::path::PathBuf,
        edit: Option<LineEdit>,
        new_local_fp: String,
    },

    /// Remote issue deleted under the mark-removed policy: tag the local
    /// line as removed and unlink the mapping (gone on both sides).
    MarkRemoved {
        doc_path: std::path::PathBuf,
        edit: LineEdit,
    },

    /// Mapped milestone deleted remotely under the mark-removed policy:
    /// unlink and tombstone the phase so later cycles do not recreate it.
    RetirePhase,

    /// Mapping whose local and remote sides are both gone.
    Unlink,
}

impl MutationKind {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::EnsureLabel { .. } => "ensure_label",
            Self::CreateMilestone { .. } => "create_milestone",
            Self::AdoptIssue { .. } => "adopt_issue",
            Self::CreateIssue { .. } => "create_issue",
            Self::PushIssue { .. } => "push_issue",
            Self::PullLocal { .. } => "pull_local",
            Self::ResolveConflict { .. } => "resolve_conflict",
            Self::MarkRemoved { .. } => "mark_removed",
            Self::RetirePhase => "retire_phase",
            Self::Unlink => "unlink",
        }
    }
}

impl Mutation {
    fn new(local_id: &str, fingerprint: &str, kind: MutationKind) -> Self {
        Self {
            key: idempotency_key(local_id, kind.name(), fingerprint),
            local_id: local_id.to_string(),
            kind,
        }
    }

    /// One-line human rendering for dry-run output.
    #[must_use]
    pub fn describe(&self) -> String {
        match &self.kind {
            MutationKind::EnsureLabel { name, .. } => format!("ensure label '{name}'"),
            MutationKind::CreateMilestone { title, rebind, .. } => {
                if *rebind {
                    format!("recreate milestone '{title}' for {}", self.local_id)
                } else {
                    format!("create milestone '{title}' for {}", self.local_id)
                }
            }
            MutationKind::AdoptIssue { remote_id, .. } => {
                format!("adopt issue #{remote_id} for {}", self.local_id)
            }
            MutationKind::CreateIssue { title, rebind, close_after, .. } => {
                let verb = if *rebind { "recreate" } else { "create" };
                let suffix = if *close_after { " (and close)" } else { "" };
                format!("{verb} issue '{title}' for {}{suffix}", self.local_id)
            }
            MutationKind::PushIssue { remote_id, fields, .. } => {
                format!("push {} -> issue #{remote_id} ({})", self.local_id, push_summary(fields))
            }
            MutationKind::PullLocal { edit, .. } => {
                format!("pull remote state into {} (line {})", self.local_id, edit.line_number)
            }
            MutationKind::ResolveConflict { remote_id, .. } => {
                format!("resolve conflict on {} (issue #{remote_id})", self.local_id)
            }
            MutationKind::MarkRemoved { .. } => {
                format!("mark {} removed (remote issue deleted)", self.local_id)
            }
            MutationKind::RetirePhase => {
                format!("retire {} (remote milestone deleted)", self.local_id)
            }
            MutationKind::Unlink => format!("unlink {} (gone on both sides)", self.local_id),
        }
    }
}

fn push_summary(fields: &PushFields) -> String {
    let mut parts = Vec::new();
    if fields.title.is_some() {
        parts.push("title");
    }
    if fields.labels.is_some() {
        parts.push("labels");
    }
    if fields.milestone_phase.is_some() {
        parts.push("milestone");
    }
    match fields.set_state {
        Some(IssueState::Closed) => parts.push("close"),
        Some(IssueState::Open) => parts.push("reopen"),
        None => {}
    }
    parts.join(", ")
}

/// Ordered mutation plan for one cycle.
#[derive(Debug, Default)]
pub struct MutationPlan {
    pub mutations: Vec<Mutation>,
    /// Items where both sides changed and the tie-break fired.
    pub conflicts: usize,
    /// Items examined and left untouched.
    pub skipped: usize,
}

impl MutationPlan {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }
}

/// Compute the mutation plan for one sync cycle.
///
/// # Errors
///
/// Returns a database error if identity map lookups fail.
pub fn build_plan(
    snapshot: &Snapshot<'_>,
    store: &IdentityStore,
    opts: &ReconcileOptions,
) -> Result<MutationPlan> {
    let mut plan = MutationPlan::default();

    let issues: HashMap<u64, &RemoteIssue> =
        snapshot.issues.iter().map(|i| (i.remote_id, i)).collect();
    let milestones: HashMap<u64, &RemoteMilestone> =
        snapshot.milestones.iter().map(|m| (m.remote_id, m)).collect();
    // Sync markers left in issue bodies identify issues a prior interrupted
    // cycle created before its bindings were rolled back.
    let by_marker: HashMap<&str, &RemoteIssue> = snapshot
        .issues
        .iter()
        .filter_map(|i| i.marker.as_deref().map(|m| (m, i)))
        .collect();

    let mut labels_needed: BTreeMap<String, Label> = BTreeMap::new();
    let mut milestone_creates = Vec::new();
    let mut issue_creates = Vec::new();
    let mut pushes = Vec::new();
    let mut pulls = Vec::new();
    let mut removals = Vec::new();

    // Phases first: milestone existence gates task milestone references.
    for doc in snapshot.documents {
        for phase in &doc.phases {
            reconcile_phase(
                phase,
                store,
                &milestones,
                opts,
                &mut milestone_creates,
                &mut removals,
                &mut plan,
            )?;
        }
    }

    for doc in snapshot.documents {
        for task in &doc.tasks {
            reconcile_task(
                doc,
                task,
                store,
                &issues,
                &by_marker,
                opts,
                &mut labels_needed,
                &mut issue_creates,
                &mut pushes,
                &mut pulls,
                &mut removals,
                &mut plan,
            )?;
        }
    }

    reconcile_orphans(snapshot, store, &issues, &milestones, &mut removals, &mut plan)?;

    for label in labels_needed.into_values() {
        let color = label.color().to_string();
        plan.mutations.push(Mutation::new(
            &label.name,
            "",
            MutationKind::EnsureLabel {
                name: label.name.clone(),
                color,
            },
        ));
    }
    plan.mutations.append(&mut milestone_creates);
    plan.mutations.append(&mut issue_creates);
    plan.mutations.append(&mut pushes);
    plan.mutations.append(&mut pulls);
    plan.mutations.append(&mut removals);

    debug!(mutations = plan.mutations.len(), conflicts = plan.conflicts, "plan built");
    Ok(plan)
}

fn reconcile_phase(
    phase: &Phase,
    store: &IdentityStore,
    milestones: &HashMap<u64, &RemoteMilestone>,
    opts: &ReconcileOptions,
    milestone_creates: &mut Vec<Mutation>,
    removals: &mut Vec<Mutation>,
    plan: &mut MutationPlan,
) -> Result<()> {
    let fp = local_phase_fingerprint(phase);
    match store.lookup(&phase.local_id)? {
        None => {
            // Milestones are only worth creating for phases with children.
            if phase.task_ids.is_empty() {
                plan.skipped += 1;
                return Ok(());
            }
            // Retired under mark-removed in an earlier cycle; stay retired.
            if opts.on_remote_delete == OnRemoteDelete::MarkRemoved
                && store.is_tombstoned(&phase.local_id)?
            {
                plan.skipped += 1;
                return Ok(());
            }
            milestone_creates.push(Mutation::new(
                &phase.local_id,
                &fp,
                MutationKind::CreateMilestone {
                    title: milestone_title(phase),
                    description: phase.goal.clone(),
                    rebind: false,
                },
            ));
        }
        Some(mapping) if !milestones.contains_key(&mapping.remote_id) => {
            match opts.on_remote_delete {
                OnRemoteDelete::Recreate => milestone_creates.push(Mutation::new(
                    &phase.local_id,
                    &fp,
                    MutationKind::CreateMilestone {
                        title: milestone_title(phase),
                        description: phase.goal.clone(),
                        rebind: true,
                    },
                )),
                OnRemoteDelete::MarkRemoved => {
                    removals.push(Mutation::new(&phase.local_id, &fp, MutationKind::RetirePhase));
                }
            }
        }
        Some(_) => plan.skipped += 1, // no milestone-update capability; creation-only
    }
    Ok(())
}

fn milestone_title(phase: &Phase) -> String {
    format!("Phase {}: {}", phase.number, phase.title)
}

#[allow(clippy::too_many_arguments)]
fn reconcile_task(
    doc: &Document,
    task: &Task,
    store: &IdentityStore,
    issues: &HashMap<u64, &RemoteIssue>,
    by_marker: &HashMap<&str, &RemoteIssue>,
    opts: &ReconcileOptions,
    labels_needed: &mut BTreeMap<String, Label>,
    issue_creates: &mut Vec<Mutation>,
    pushes: &mut Vec<Mutation>,
    pulls: &mut Vec<Mutation>,
    removals: &mut Vec<Mutation>,
    plan: &mut MutationPlan,
) -> Result<()> {
    let local_fp = local_task_fingerprint(task);
    let mapping = store.lookup(&task.local_id)?;

    match mapping {
        None => {
            if task.status == TaskStatus::Removed {
                plan.skipped += 1;
                return Ok(());
            }
            if let Some(issue) = by_marker.get(task.local_id.as_str()).copied() {
                queue_adopt(doc, task, issue, &local_fp, labels_needed, issue_creates);
                return Ok(());
            }
            queue_create(doc, task, &local_fp, false, labels_needed, issue_creates);
        }
        Some(mapping) => match issues.get(&mapping.remote_id) {
            None => match opts.on_remote_delete {
                OnRemoteDelete::Recreate => {
                    queue_create(doc, task, &local_fp, true, labels_needed, issue_creates);
                }
                OnRemoteDelete::MarkRemoved => {
                    if task.status == TaskStatus::Removed {
                        // Already marked in an earlier interrupted cycle.
                        removals.push(Mutation::new(&task.local_id, &local_fp, MutationKind::Unlink));
                    } else if let Some(new_line) = append_removed_tag(&task.line_text) {
                        removals.push(Mutation::new(
                            &task.local_id,
                            &local_fp,
                            MutationKind::MarkRemoved {
                                doc_path: doc.path.clone(),
                                edit: LineEdit {
                                    line_number: task.line_number,
                                    old_line: task.line_text.clone(),
                                    new_line,
                                },
                            },
                        ));
                    }
                }
            },
            Some(issue) => reconcile_mapped(
                doc, task, &mapping, issue, &local_fp, labels_needed, pushes, pulls, plan,
            ),
        },
    }
    Ok(())
}

fn queue_create(
    doc: &Document,
    task: &Task,
    local_fp: &str,
    rebind: bool,
    labels_needed: &mut BTreeMap<String, Label>,
    issue_creates: &mut Vec<Mutation>,
) {
    let labels = labels_for_task(task);
    for label in &labels {
        labels_needed
            .entry(label.name.clone())
            .or_insert_with(|| label.clone());
    }
    let phase = task
        .parent_phase_id
        .as_deref()
        .and_then(|pid| doc.phase(pid));

    issue_creates.push(Mutation::new(
        &task.local_id,
        local_fp,
        MutationKind::CreateIssue {
            title: task.title.clone(),
            doc_path: doc.path.display().to_string(),
            labels: labels.into_iter().map(|l| l.name).collect(),
            phase_local_id: task.parent_phase_id.clone(),
            phase_title: phase.map(milestone_title),
            close_after: task.status == TaskStatus::Done,
            rebind,
            new_local_fp: local_fp.to_string(),
        },
    ));
}

/// Rebind an unmapped task to the marker-matched issue and converge the
/// pair in the same plan. With no stored fingerprints to diff against, the
/// conflict tie-break applies: remote wins status, local wins the rest.
fn queue_adopt(
    doc: &Document,
    task: &Task,
    issue: &RemoteIssue,
    local_fp: &str,
    labels_needed: &mut BTreeMap<String, Label>,
    issue_creates: &mut Vec<Mutation>,
) {
    let fields = push_fields(task, issue, false, labels_needed);
    let (edit, new_local_fp) = conflict_status_edit(task, issue)
        .map_or((None, local_fp.to_string()), |(e, fp)| (Some(e), fp));
    issue_creates.push(Mutation::new(
        &task.local_id,
        local_fp,
        MutationKind::AdoptIssue {
            remote_id: issue.remote_id,
            fields,
            doc_path: doc.path.clone(),
            edit,
            new_local_fp,
        },
    ));
}

/// Three-way comparison for a task present and mapped on both sides.
#[allow(clippy::too_many_arguments)]
fn reconcile_mapped(
    doc: &Document,
    task: &Task,
    mapping: &Mapping,
    issue: &RemoteIssue,
    local_fp: &str,
    labels_needed: &mut BTreeMap<String, Label>,
    pushes: &mut Vec<Mutation>,
    pulls: &mut Vec<Mutation>,
    plan: &mut MutationPlan,
) {
    let remote_fp = remote_issue_fingerprint(issue);
    let local_changed = local_fp != mapping.local_fingerprint;
    let remote_changed = remote_fp != mapping.remote_fingerprint;

    match (local_changed, remote_changed) {
        (false, false) => plan.skipped += 1,
        (true, false) => {
            let fields = push_fields(task, issue, true, labels_needed);
            if fields.is_empty() {
                plan.skipped += 1;
            } else {
                pushes.push(Mutation::new(
                    &task.local_id,
                    local_fp,
                    MutationKind::PushIssue {
                        remote_id: issue.remote_id,
                        fields,
                        new_local_fp: local_fp.to_string(),
                    },
                ));
            }
        }
        (false, true) => {
            match pull_edit(task, issue) {
                Some((edit, new_local_fp)) => pulls.push(Mutation::new(
                    &task.local_id,
                    &remote_fp,
                    MutationKind::PullLocal {
                        doc_path: doc.path.clone(),
                        edit,
                        new_local_fp,
                        remote_fp: remote_fp.clone(),
                    },
                )),
                // Remote drift with no local representation (e.g. labels
                // edited by hand): accept it by refreshing the stored
                // fingerprint via a no-edit pull.
                None => pulls.push(Mutation::new(
                    &task.local_id,
                    &remote_fp,
                    MutationKind::PullLocal {
                        doc_path: doc.path.clone(),
                        edit: LineEdit {
                            line_number: task.line_number,
                            old_line: task.line_text.clone(),
                            new_line: task.line_text.clone(),
                        },
                        new_local_fp: local_fp.to_string(),
                        remote_fp: remote_fp.clone(),
                    },
                )),
            }
        }
        (true, true) => {
            // Tie-break: remote wins status, local wins descriptive fields.
            plan.conflicts += 1;
            let fields = push_fields(task, issue, false, labels_needed);
            let (edit, new_local_fp) = conflict_status_edit(task, issue)
                .map_or((None, local_fp.to_string()), |(e, fp)| (Some(e), fp));
            pushes.push(Mutation::new(
                &task.local_id,
                local_fp,
                MutationKind::ResolveConflict {
                    remote_id: issue.remote_id,
                    fields,
                    doc_path: doc.path.clone(),
                    edit,
                    new_local_fp,
                },
            ));
        }
    }
}

/// Compute the fields a push must send. With `include_state`, status flows
/// local→remote; without it (conflict), status stays with the remote side.
fn push_fields(
    task: &Task,
    issue: &RemoteIssue,
    include_state: bool,
    labels_needed: &mut BTreeMap<String, Label>,
) -> PushFields {
    let mut fields = PushFields::default();

    if task.title != issue.title {
        fields.title = Some(task.title.clone());
    }

    let derived = labels_for_task(task);
    let derived_names: HashSet<&str> = derived.iter().map(|l| l.name.as_str()).collect();
    let current: HashSet<&str> = issue.labels.iter().map(String::as_str).collect();
    if derived_names != current {
        for label in &derived {
            labels_needed
                .entry(label.name.clone())
                .or_insert_with(|| label.clone());
        }
        let mut names: Vec<String> = derived.into_iter().map(|l| l.name).collect();
        names.sort();
        fields.labels = Some(names);
    }

    if include_state {
        match (task.status, issue.state) {
            (TaskStatus::Done, IssueState::Open) => fields.set_state = Some(IssueState::Closed),
            (TaskStatus::Pending, IssueState::Closed) => fields.set_state = Some(IssueState::Open),
            _ => {}
        }
        fields.milestone_phase = task.parent_phase_id.clone();
    }

    fields
}

/// Build the local edit that pulls remote status/title into the document.
/// Returns the edit plus the task's fingerprint after the edit.
fn pull_edit(task: &Task, issue: &RemoteIssue) -> Option<(LineEdit, String)> {
    let mut line = task.line_text.clone();
    let mut updated = task.clone();
    let mut touched = false;

    let remote_status = match issue.state {
        IssueState::Closed => TaskStatus::Done,
        IssueState::Open => TaskStatus::Pending,
    };
    if task.status != remote_status && task.status != TaskStatus::Removed {
        if let Some(flipped) = flip_checkbox(&line, remote_status == TaskStatus::Done) {
            line = flipped;
            updated.status = remote_status;
            touched = true;
        }
    }

    if task.title != issue.title {
        if let Some(retitled) = replace_title(&line, &task.title, &issue.title) {
            line = retitled;
            updated.title = issue.title.clone();
            touched = true;
        }
    }

    if !touched {
        return None;
    }

    let edit = LineEdit {
        line_number: task.line_number,
        old_line: task.line_text.clone(),
        new_line: line,
    };
    let new_fp = local_task_fingerprint(&updated);
    Some((edit, new_fp))
}

/// Conflict branch: only the status half of a pull (remote wins status).
fn conflict_status_edit(task: &Task, issue: &RemoteIssue) -> Option<(LineEdit, String)> {
    let remote_status = match issue.state {
        IssueState::Closed => TaskStatus::Done,
        IssueState::Open => TaskStatus::Pending,
    };
    if task.status == remote_status || task.status == TaskStatus::Removed {
        return None;
    }
    let flipped = flip_checkbox(&task.line_text, remote_status == TaskStatus::Done)?;
    let mut updated = task.clone();
    updated.status = remote_status;
    let new_fp = local_task_fingerprint(&updated);
    Some((
        LineEdit {
            line_number: task.line_number,
            old_line: task.line_text.clone(),
            new_line: flipped,
        },
        new_fp,
    ))
}

/// Tag a line as removed; parsers map the suffix back to `removed` status.
fn append_removed_tag(line: &str) -> Option<String> {
    if line.trim_end().ends_with("[REMOVED]") {
        return None;
    }
    Some(format!("{} [REMOVED]", line.trim_end()))
}

/// Mappings whose local side vanished from the documents.
fn reconcile_orphans(
    snapshot: &Snapshot<'_>,
    store: &IdentityStore,
    issues: &HashMap<u64, &RemoteIssue>,
    milestones: &HashMap<u64, &RemoteMilestone>,
    removals: &mut Vec<Mutation>,
    plan: &mut MutationPlan,
) -> Result<()> {
    let local_ids: HashSet<&str> = snapshot
        .documents
        .iter()
        .flat_map(|d| {
            d.tasks
                .iter()
                .map(|t| t.local_id.as_str())
                .chain(d.phases.iter().map(|p| p.local_id.as_str()))
        })
        .collect();

    for mapping in store.all_mappings()? {
        if local_ids.contains(mapping.local_id.as_str()) {
            continue;
        }
        let remote_present = match mapping.kind {
            MappingKind::Task => issues.contains_key(&mapping.remote_id),
            MappingKind::Phase => milestones.contains_key(&mapping.remote_id),
        };
        if remote_present {
            // Local side gone, remote still alive: never delete remotely on
            // our own; leave for the operator.
            plan.skipped += 1;
        } else {
            removals.push(Mutation::new(&mapping.local_id, "", MutationKind::Unlink));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Framework;
    use std::collections::BTreeSet;
    use std::path::PathBuf;

    fn task(anchor: &str, title: &str, status: TaskStatus) -> Task {
        let checkbox = if status == TaskStatus::Done { "x" } else { " " };
        Task {
            local_id: format!("tasks.md#{anchor}"),
            anchor: anchor.to_string(),
            title: title.to_string(),
            status,
            priority: None,
            parallel_eligible: false,
            parent_phase_id: None,
            extra_tags: vec![],
            line_number: 1,
            line_text: format!("- [{checkbox}] {anchor} {title}"),
        }
    }

    fn doc(tasks: Vec<Task>) -> Document {
        Document {
            path: PathBuf::from("tasks.md"),
            framework: Framework::Speckit,
            tasks,
            phases: vec![],
        }
    }

    fn issue(remote_id: u64, title: &str, state: IssueState) -> RemoteIssue {
        RemoteIssue {
            remote_id,
            title: title.to_string(),
            state,
            milestone: None,
            labels: BTreeSet::new(),
            marker: None,
        }
    }

    fn plan_for(
        documents: &[Document],
        issues: &[RemoteIssue],
        store: &IdentityStore,
    ) -> MutationPlan {
        let snapshot = Snapshot {
            documents,
            issues,
            milestones: &[],
        };
        build_plan(&snapshot, store, &ReconcileOptions::default()).unwrap()
    }

    fn bind_synced(
        store: &mut IdentityStore,
        task: &Task,
        issue: &RemoteIssue,
    ) {
        store
            .bind(&task.local_id, issue.remote_id, MappingKind::Task)
            .unwrap();
        store
            .record_sync(
                &task.local_id,
                crate::model::SyncDirection::LocalToRemote,
                &local_task_fingerprint(task),
                &remote_issue_fingerprint(issue),
            )
            .unwrap();
    }

    #[test]
    fn unmapped_task_queues_create() {
        let store = IdentityStore::open_in_memory().unwrap();
        let docs = vec![doc(vec![task("T008", "Create priority labels", TaskStatus::Pending)])];
        let plan = plan_for(&docs, &[], &store);

        assert_eq!(plan.mutations.len(), 1);
        assert!(matches!(
            plan.mutations[0].kind,
            MutationKind::CreateIssue { rebind: false, close_after: false, .. }
        ));
    }

    #[test]
    fn synced_pair_is_a_noop() {
        let mut store = IdentityStore::open_in_memory().unwrap();
        let t = task("T001", "Stable task", TaskStatus::Pending);
        let i = issue(1, "Stable task", IssueState::Open);
        bind_synced(&mut store, &t, &i);

        let docs = vec![doc(vec![t])];
        let plan = plan_for(&docs, &[i], &store);
        assert!(plan.is_empty());
        assert_eq!(plan.skipped, 1);
    }

    #[test]
    fn local_only_change_pushes() {
        let mut store = IdentityStore::open_in_memory().unwrap();
        let t = task("T001", "Old title", TaskStatus::Pending);
        let i = issue(1, "Old title", IssueState::Open);
        bind_synced(&mut store, &t, &i);

        let mut renamed = t.clone();
        renamed.title = "New title".to_string();
        renamed.line_text = "- [ ] T001 New title".to_string();

        let docs = vec![doc(vec![renamed])];
        let plan = plan_for(&docs, &[i], &store);
        assert_eq!(plan.mutations.len(), 1);
        match &plan.mutations[0].kind {
            MutationKind::PushIssue { remote_id, fields, .. } => {
                assert_eq!(*remote_id, 1);
                assert_eq!(fields.title.as_deref(), Some("New title"));
                assert!(fields.set_state.is_none());
            }
            other => panic!("expected push, got {other:?}"),
        }
    }

    #[test]
    fn local_completion_closes_remote() {
        let mut store = IdentityStore::open_in_memory().unwrap();
        let t = task("T001", "Finish it", TaskStatus::Pending);
        let i = issue(1, "Finish it", IssueState::Open);
        bind_synced(&mut store, &t, &i);

        let done = task("T001", "Finish it", TaskStatus::Done);
        let docs = vec![doc(vec![done])];
        let plan = plan_for(&docs, &[i], &store);
        assert_eq!(plan.mutations.len(), 1);
        match &plan.mutations[0].kind {
            MutationKind::PushIssue { fields, .. } => {
                assert_eq!(fields.set_state, Some(IssueState::Closed));
            }
            other => panic!("expected push, got {other:?}"),
        }
    }

    #[test]
    fn remote_close_pulls_checkbox_flip() {
        let mut store = IdentityStore::open_in_memory().unwrap();
        let t = task("T010", "Remote finishes this", TaskStatus::Pending);
        let open = issue(10, "Remote finishes this", IssueState::Open);
        bind_synced(&mut store, &t, &open);

        let closed = issue(10, "Remote finishes this", IssueState::Closed);
        let docs = vec![doc(vec![t])];
        let plan = plan_for(&docs, &[closed], &store);

        assert_eq!(plan.mutations.len(), 1);
        match &plan.mutations[0].kind {
            MutationKind::PullLocal { edit, .. } => {
                assert_eq!(edit.new_line, "- [x] T010 Remote finishes this");
            }
            other => panic!("expected pull, got {other:?}"),
        }
    }

    #[test]
    fn conflict_remote_wins_status_local_wins_title() {
        let mut store = IdentityStore::open_in_memory().unwrap();
        let t = task("T001", "Original title", TaskStatus::Pending);
        let i = issue(1, "Original title", IssueState::Open);
        bind_synced(&mut store, &t, &i);

        // Local renamed; remote closed. Both changed since last sync.
        let mut renamed = task("T001", "Renamed locally", TaskStatus::Pending);
        renamed.line_text = "- [ ] T001 Renamed locally".to_string();
        let closed = issue(1, "Original title", IssueState::Closed);

        let docs = vec![doc(vec![renamed])];
        let plan = plan_for(&docs, &[closed], &store);

        assert_eq!(plan.conflicts, 1);
        assert_eq!(plan.mutations.len(), 1);
        match &plan.mutations[0].kind {
            MutationKind::ResolveConflict { fields, edit, .. } => {
                assert_eq!(fields.title.as_deref(), Some("Renamed locally"));
                assert!(fields.set_state.is_none(), "status must stay with remote");
                let edit = edit.as_ref().expect("status pull edit");
                assert_eq!(edit.new_line, "- [x] T001 Renamed locally");
            }
            other => panic!("expected conflict resolution, got {other:?}"),
        }
    }

    #[test]
    fn remote_deletion_marks_removed_by_default() {
        let mut store = IdentityStore::open_in_memory().unwrap();
        let t = task("T001", "Deleted remotely", TaskStatus::Pending);
        let i = issue(1, "Deleted remotely", IssueState::Open);
        bind_synced(&mut store, &t, &i);

        let docs = vec![doc(vec![t])];
        let plan = plan_for(&docs, &[], &store);
        assert_eq!(plan.mutations.len(), 1);
        match &plan.mutations[0].kind {
            MutationKind::MarkRemoved { edit, .. } => {
                assert!(edit.new_line.ends_with("[REMOVED]"));
            }
            other => panic!("expected mark-removed, got {other:?}"),
        }
    }

    #[test]
    fn remote_deletion_recreate_policy_queues_rebind_create() {
        let mut store = IdentityStore::open_in_memory().unwrap();
        let t = task("T001", "Deleted remotely", TaskStatus::Pending);
        let i = issue(1, "Deleted remotely", IssueState::Open);
        bind_synced(&mut store, &t, &i);

        let docs = vec![doc(vec![t])];
        let snapshot = Snapshot {
            documents: &docs,
            issues: &[],
            milestones: &[],
        };
        let plan = build_plan(
            &snapshot,
            &store,
            &ReconcileOptions {
                on_remote_delete: OnRemoteDelete::Recreate,
            },
        )
        .unwrap();

        assert_eq!(plan.mutations.len(), 1);
        assert!(matches!(
            plan.mutations[0].kind,
            MutationKind::CreateIssue { rebind: true, .. }
        ));
    }

    #[test]
    fn milestone_create_precedes_issue_create() {
        let store = IdentityStore::open_in_memory().unwrap();
        let mut t = task("T001", "Child task", TaskStatus::Pending);
        t.parent_phase_id = Some("tasks.md#Phase-1".to_string());
        let phase = Phase {
            local_id: "tasks.md#Phase-1".to_string(),
            anchor: "Phase-1".to_string(),
            number: "1".to_string(),
            title: "Foundation".to_string(),
            status: TaskStatus::Pending,
            goal: "Working skeleton".to_string(),
            task_ids: vec![t.local_id.clone()],
            line_number: 1,
            line_text: "## Phase 1: Foundation".to_string(),
        };
        let docs = vec![Document {
            path: PathBuf::from("tasks.md"),
            framework: Framework::Speckit,
            tasks: vec![t],
            phases: vec![phase],
        }];

        let plan = plan_for(&docs, &[], &store);
        let kinds: Vec<&str> = plan.mutations.iter().map(|m| m.kind.name()).collect();
        let milestone_pos = kinds.iter().position(|k| *k == "create_milestone").unwrap();
        let issue_pos = kinds.iter().position(|k| *k == "create_issue").unwrap();
        assert!(milestone_pos < issue_pos);
    }

    #[test]
    fn orphan_mapping_with_dead_remote_unlinks() {
        let mut store = IdentityStore::open_in_memory().unwrap();
        store.bind("tasks.md#T099", 99, MappingKind::Task).unwrap();

        let docs = vec![doc(vec![])];
        let plan = plan_for(&docs, &[], &store);
        assert_eq!(plan.mutations.len(), 1);
        assert!(matches!(plan.mutations[0].kind, MutationKind::Unlink));
    }

    #[test]
    fn orphan_mapping_with_live_remote_is_left_alone() {
        let mut store = IdentityStore::open_in_memory().unwrap();
        store.bind("tasks.md#T099", 99, MappingKind::Task).unwrap();
        let i = issue(99, "Still alive", IssueState::Open);

        let docs = vec![doc(vec![])];
        let plan = plan_for(&docs, &[i], &store);
        assert!(plan.is_empty());
        assert_eq!(plan.skipped, 1);
    }

    #[test]
    fn unmapped_done_task_creates_then_closes() {
        let store = IdentityStore::open_in_memory().unwrap();
        let docs = vec![doc(vec![task("T001", "Already finished", TaskStatus::Done)])];
        let plan = plan_for(&docs, &[], &store);
        assert!(matches!(
            plan.mutations[0].kind,
            MutationKind::CreateIssue { close_after: true, .. }
        ));
    }

    #[test]
    fn marker_match_adopts_existing_issue_instead_of_creating() {
        // A previous cycle created the issue but its binding was rolled
        // back; the marker in the body identifies it.
        let store = IdentityStore::open_in_memory().unwrap();
        let t = task("T001", "Interrupted create", TaskStatus::Pending);
        let mut i = issue(7, "Interrupted create", IssueState::Open);
        i.marker = Some(t.local_id.clone());

        let docs = vec![doc(vec![t])];
        let plan = plan_for(&docs, std::slice::from_ref(&i), &store);

        assert_eq!(plan.mutations.len(), 1);
        match &plan.mutations[0].kind {
            MutationKind::AdoptIssue { remote_id, .. } => assert_eq!(*remote_id, 7),
            other => panic!("expected adoption, got {other:?}"),
        }
    }

    #[test]
    fn adoption_applies_conflict_tie_break() {
        let store = IdentityStore::open_in_memory().unwrap();
        let t = task("T001", "Renamed locally", TaskStatus::Pending);
        let mut i = issue(7, "Old title", IssueState::Closed);
        i.marker = Some(t.local_id.clone());

        let docs = vec![doc(vec![t])];
        let plan = plan_for(&docs, std::slice::from_ref(&i), &store);
        match &plan.mutations[0].kind {
            MutationKind::AdoptIssue { fields, edit, .. } => {
                assert_eq!(fields.title.as_deref(), Some("Renamed locally"));
                assert!(fields.set_state.is_none(), "status must stay with remote");
                let edit = edit.as_ref().expect("status pull edit");
                assert_eq!(edit.new_line, "- [x] T001 Renamed locally");
            }
            other => panic!("expected adoption, got {other:?}"),
        }
    }

    fn phase_doc() -> Document {
        let mut t = task("T001", "Child task", TaskStatus::Pending);
        t.parent_phase_id = Some("tasks.md#Phase-1".to_string());
        let phase = Phase {
            local_id: "tasks.md#Phase-1".to_string(),
            anchor: "Phase-1".to_string(),
            number: "1".to_string(),
            title: "Foundation".to_string(),
            status: TaskStatus::Pending,
            goal: "Working skeleton".to_string(),
            task_ids: vec![t.local_id.clone()],
            line_number: 1,
            line_text: "## Phase 1: Foundation".to_string(),
        };
        Document {
            path: PathBuf::from("tasks.md"),
            framework: Framework::Speckit,
            tasks: vec![t],
            phases: vec![phase],
        }
    }

    #[test]
    fn deleted_milestone_retires_phase_under_default_policy() {
        let mut store = IdentityStore::open_in_memory().unwrap();
        let docs = vec![phase_doc()];
        store.bind("tasks.md#Phase-1", 1, MappingKind::Phase).unwrap();
        bind_synced(
            &mut store,
            &docs[0].tasks[0],
            &issue(1, "Child task", IssueState::Open),
        );

        // Milestone deleted remotely, issue still present.
        let issues = vec![issue(1, "Child task", IssueState::Open)];
        let plan = plan_for(&docs, &issues, &store);
        assert_eq!(plan.mutations.len(), 1);
        assert!(matches!(plan.mutations[0].kind, MutationKind::RetirePhase));
    }

    #[test]
    fn tombstoned_phase_is_not_recreated() {
        let mut store = IdentityStore::open_in_memory().unwrap();
        store
            .add_tombstone("tasks.md#Phase-1", MappingKind::Phase)
            .unwrap();

        let docs = vec![phase_doc()];
        bind_synced(
            &mut store,
            &docs[0].tasks[0],
            &issue(1, "Child task", IssueState::Open),
        );

        let issues = vec![issue(1, "Child task", IssueState::Open)];
        let plan = plan_for(&docs, &issues, &store);
        assert!(
            !plan.mutations.iter().any(|m| m.kind.name() == "create_milestone"),
            "retired phase must stay retired: {plan:?}"
        );
    }

    #[test]
    fn priority_label_create_includes_ensure_label() {
        let store = IdentityStore::open_in_memory().unwrap();
        let mut t = task("T008", "Create priority labels", TaskStatus::Pending);
        t.priority = Some(crate::model::Priority::HIGH);
        let docs = vec![doc(vec![t])];
        let plan = plan_for(&docs, &[], &store);

        let kinds: Vec<&str> = plan.mutations.iter().map(|m| m.kind.name()).collect();
        let label_pos = kinds.iter().position(|k| *k == "ensure_label").unwrap();
        let issue_pos = kinds.iter().position(|k| *k == "create_issue").unwrap();
        assert!(label_pos < issue_pos);
    }
}
