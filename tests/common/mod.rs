//! Shared test support: an in-memory tracker fake and document fixtures.

#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use roadsync::error::{Result, RoadsyncError};
use roadsync::model::{IssueState, RemoteIssue, RemoteMilestone};
use roadsync::remote::{extract_marker, IssueClient, IssueUpdate, NewIssue};

/// In-memory `IssueClient` with scripted failure injection.
///
/// Failures are queued per operation name; each queued error is returned
/// once, in order, before the operation succeeds. `create_issue` failures
/// still record the issue, modeling a create that landed but whose response
/// was lost.
#[derive(Debug, Default)]
pub struct InMemoryRemote {
    pub issues: HashMap<u64, RemoteIssue>,
    pub milestones: HashMap<u64, RemoteMilestone>,
    pub labels: BTreeSet<String>,
    next_issue_id: u64,
    next_milestone_id: u64,
    failures: HashMap<&'static str, VecDeque<RoadsyncError>>,
    pub calls: Vec<String>,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        roadsync::logging::init_test_logging();
        Self {
            next_issue_id: 1,
            next_milestone_id: 1,
            ..Self::default()
        }
    }

    /// Queue an error for the next invocation of `op`.
    pub fn fail_next(&mut self, op: &'static str, error: RoadsyncError) {
        self.failures.entry(op).or_default().push_back(error);
    }

    pub fn transient(message: &str) -> RoadsyncError {
        RoadsyncError::RemoteTransient {
            status: 503,
            message: message.to_string(),
        }
    }

    pub fn fatal(status: u16, message: &str) -> RoadsyncError {
        RoadsyncError::RemoteFatal {
            status,
            message: message.to_string(),
        }
    }

    /// Seed an issue directly, as if it already existed remotely.
    pub fn seed_issue(&mut self, title: &str, state: IssueState) -> u64 {
        let id = self.next_issue_id;
        self.next_issue_id += 1;
        self.issues.insert(
            id,
            RemoteIssue {
                remote_id: id,
                title: title.to_string(),
                state,
                milestone: None,
                labels: BTreeSet::new(),
                marker: None,
            },
        );
        id
    }

    pub fn issue(&self, id: u64) -> &RemoteIssue {
        self.issues.get(&id).unwrap_or_else(|| panic!("no issue #{id}"))
    }

    pub fn calls_named(&self, op: &str) -> usize {
        self.calls.iter().filter(|c| c.as_str() == op).count()
    }

    fn take_failure(&mut self, op: &'static str) -> Option<RoadsyncError> {
        self.failures.get_mut(op).and_then(VecDeque::pop_front)
    }
}

impl IssueClient for InMemoryRemote {
    fn list_issues(&self) -> Result<Vec<RemoteIssue>> {
        let mut out: Vec<RemoteIssue> = self.issues.values().cloned().collect();
        out.sort_by_key(|i| i.remote_id);
        Ok(out)
    }

    fn list_milestones(&self) -> Result<Vec<RemoteMilestone>> {
        let mut out: Vec<RemoteMilestone> = self.milestones.values().cloned().collect();
        out.sort_by_key(|m| m.remote_id);
        Ok(out)
    }

    fn create_issue(&mut self, new: &NewIssue) -> Result<RemoteIssue> {
        self.calls.push("create_issue".to_string());
        let id = self.next_issue_id;
        self.next_issue_id += 1;
        let issue = RemoteIssue {
            remote_id: id,
            title: new.title.clone(),
            state: IssueState::Open,
            milestone: new.milestone,
            labels: new.labels.iter().cloned().collect(),
            marker: extract_marker(&new.body),
        };
        self.issues.insert(id, issue.clone());
        if let Some(err) = self.take_failure("create_issue") {
            // The issue landed; only the response was lost.
            return Err(err);
        }
        Ok(issue)
    }

    fn update_issue(&mut self, remote_id: u64, update: &IssueUpdate) -> Result<()> {
        self.calls.push("update_issue".to_string());
        if let Some(err) = self.take_failure("update_issue") {
            return Err(err);
        }
        let issue = self
            .issues
            .get_mut(&remote_id)
            .ok_or_else(|| Self::fatal(404, "no such issue"))?;
        if let Some(title) = &update.title {
            issue.title = title.clone();
        }
        if let Some(labels) = &update.labels {
            issue.labels = labels.iter().cloned().collect();
        }
        if let Some(milestone) = update.milestone {
            issue.milestone = Some(milestone);
        }
        Ok(())
    }

    fn close_issue(&mut self, remote_id: u64) -> Result<()> {
        self.calls.push("close_issue".to_string());
        if let Some(err) = self.take_failure("close_issue") {
            return Err(err);
        }
        self.issues
            .get_mut(&remote_id)
            .ok_or_else(|| Self::fatal(404, "no such issue"))?
            .state = IssueState::Closed;
        Ok(())
    }

    fn reopen_issue(&mut self, remote_id: u64) -> Result<()> {
        self.calls.push("reopen_issue".to_string());
        if let Some(err) = self.take_failure("reopen_issue") {
            return Err(err);
        }
        self.issues
            .get_mut(&remote_id)
            .ok_or_else(|| Self::fatal(404, "no such issue"))?
            .state = IssueState::Open;
        Ok(())
    }

    fn create_milestone(&mut self, title: &str, _description: &str) -> Result<RemoteMilestone> {
        self.calls.push("create_milestone".to_string());
        if let Some(err) = self.take_failure("create_milestone") {
            return Err(err);
        }
        let id = self.next_milestone_id;
        self.next_milestone_id += 1;
        let milestone = RemoteMilestone {
            remote_id: id,
            title: title.to_string(),
            state: IssueState::Open,
        };
        self.milestones.insert(id, milestone.clone());
        Ok(milestone)
    }

    fn create_label_if_absent(&mut self, name: &str, _color: &str) -> Result<()> {
        self.calls.push("create_label".to_string());
        if let Some(err) = self.take_failure("create_label") {
            return Err(err);
        }
        self.labels.insert(name.to_string());
        Ok(())
    }
}

/// Write a speckit `tasks.md` fixture and return its path.
pub fn write_tasks_md(dir: &Path, content: &str) -> PathBuf {
    let path = dir.join("tasks.md");
    fs::write(&path, content).unwrap();
    path
}

/// A small two-phase speckit document used across scenarios.
pub const TASKS_FIXTURE: &str = "\
# Tasks

## Phase 1: Foundation
- [ ] T001 [P0] Set up project scaffolding
- [x] T002 Configure continuous integration

## Phase 2: Sync engine
- [ ] T008 [P1] [P] Create priority labels
- [ ] T010 Wire up remote snapshots
";

/// A GSD roadmap fixture exercising both checklist and detail sections.
pub const ROADMAP_FIXTURE: &str = "\
# Roadmap

- [ ] **Phase 1: Foundation** - get the basics standing
- [ ] **Phase 2: Sync** - talk to the tracker

## Phase Details

### Phase 1: Foundation
**Goal**: A working skeleton
Plans:
- [ ] 01-01: Project scaffolding
- [x] 01-02: Continuous integration

### Phase 2: Sync
**Goal**: Bidirectional flow
Plans:
- [ ] 02-01: Remote snapshots
";
