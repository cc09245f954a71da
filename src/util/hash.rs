//! Content fingerprints for change detection.
//!
//! SHA256 over stable ordered fields with null separators. Fingerprints cover
//! only the sync-relevant state: two values hashing equal means there is no
//! real change to push or pull.

use sha2::{Digest, Sha256};

use crate::model::{labels_for_task, Phase, RemoteIssue, Task};

fn finish(hasher: Sha256) -> String {
    format!("{:x}", hasher.finalize())
}

fn update(hasher: &mut Sha256, s: &str) {
    hasher.update(s.as_bytes());
    hasher.update([0]);
}

/// Fingerprint of a local task's sync-relevant fields.
///
/// Included: title, status, priority, sorted derived labels, owning phase.
/// Excluded: line position, raw line text, unknown tags' ordering quirks
/// (tags participate via the derived labels).
#[must_use]
pub fn local_task_fingerprint(task: &Task) -> String {
    let mut hasher = Sha256::new();
    update(&mut hasher, &task.title);
    update(&mut hasher, task.status.as_str());
    update(
        &mut hasher,
        &task.priority.map(|p| p.to_string()).unwrap_or_default(),
    );

    let mut labels: Vec<String> = labels_for_task(task).into_iter().map(|l| l.name).collect();
    labels.sort();
    for label in &labels {
        update(&mut hasher, label);
    }

    update(&mut hasher, task.parent_phase_id.as_deref().unwrap_or(""));
    finish(hasher)
}

/// Fingerprint of a local phase's sync-relevant fields.
///
/// Child ordering is deliberately excluded: reordering is a local-only
/// concern and must not trigger remote mutations.
#[must_use]
pub fn local_phase_fingerprint(phase: &Phase) -> String {
    let mut hasher = Sha256::new();
    update(&mut hasher, &phase.title);
    update(&mut hasher, &phase.number);
    update(&mut hasher, phase.status.as_str());
    finish(hasher)
}

/// Fingerprint of a remote issue snapshot.
#[must_use]
pub fn remote_issue_fingerprint(issue: &RemoteIssue) -> String {
    let labels: Vec<&str> = issue.labels.iter().map(String::as_str).collect();
    remote_fingerprint_from_parts(&issue.title, issue.state, &labels, issue.milestone)
}

/// Remote fingerprint from raw components, for predicting post-mutation
/// state without a re-read. Labels must be sorted (`BTreeSet` order).
#[must_use]
pub fn remote_fingerprint_from_parts(
    title: &str,
    state: crate::model::IssueState,
    labels: &[&str],
    milestone: Option<u64>,
) -> String {
    let mut hasher = Sha256::new();
    update(&mut hasher, title);
    update(&mut hasher, state.as_str());
    for label in labels {
        update(&mut hasher, label);
    }
    update(&mut hasher, &milestone.map(|m| m.to_string()).unwrap_or_default());
    finish(hasher)
}

/// Idempotency key for one queued mutation: `local_id` + kind + fingerprint.
///
/// A retried call after an ambiguous failure carries the same key, so the
/// driver can recognize already-applied work via a reconciling read.
#[must_use]
pub fn idempotency_key(local_id: &str, kind: &str, fingerprint: &str) -> String {
    let mut hasher = Sha256::new();
    update(&mut hasher, local_id);
    update(&mut hasher, kind);
    update(&mut hasher, fingerprint);
    finish(hasher)[..16].to_string()
}
