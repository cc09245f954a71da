//! Core data types for `roadsync`.
//!
//! This module defines the types shared across the parser, reconciliation
//! engine, and remote client:
//! - `Task` / `Phase` - local planning-document entities
//! - `TaskStatus` / `Priority` - task attributes
//! - `Label` - derived issue labels
//! - `RemoteIssue` / `RemoteMilestone` - snapshots of tracker state
//! - `Framework` - document schema selector
//! - `SyncDirection` - provenance for identity mappings

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Done,
    /// Absent from a re-parse or deleted remotely under the mark-removed policy.
    Removed,
}

impl TaskStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Done => "done",
            Self::Removed => "removed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = crate::error::RoadsyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "done" => Ok(Self::Done),
            "removed" => Ok(Self::Removed),
            other => Err(crate::error::RoadsyncError::Config(format!(
                "invalid task status: {other}"
            ))),
        }
    }
}

/// Task priority (0=Critical .. 4=Backlog), written as `[P0]`..`[P4]` tags.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(transparent)]
pub struct Priority(pub i32);

impl Priority {
    pub const CRITICAL: Self = Self(0);
    pub const HIGH: Self = Self(1);
    pub const MEDIUM: Self = Self(2);
    pub const LOW: Self = Self(3);
    pub const BACKLOG: Self = Self(4);
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

impl FromStr for Priority {
    type Err = crate::error::RoadsyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_uppercase();
        let val = s.strip_prefix('P').unwrap_or(&s);

        match val.parse::<i32>() {
            Ok(p) if (0..=4).contains(&p) => Ok(Self(p)),
            _ => Err(crate::error::RoadsyncError::Config(format!(
                "priority must be P0-P4, got: {s}"
            ))),
        }
    }
}

/// Document schema convention a file is written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Framework {
    /// Speckit `tasks.md`: `- [ ] T001 [P1] Title` under `## Phase N:` headings.
    Speckit,
    /// GSD `ROADMAP.md`: `**Phase 1: Name**` checklists and `01-02:` plan lines.
    Gsd,
}

impl Framework {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Speckit => "speckit",
            Self::Gsd => "gsd",
        }
    }
}

impl fmt::Display for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Framework {
    type Err = crate::error::RoadsyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "speckit" => Ok(Self::Speckit),
            "gsd" => Ok(Self::Gsd),
            other => Err(crate::error::RoadsyncError::Config(format!(
                "unknown framework: {other} (expected speckit or gsd)"
            ))),
        }
    }
}

/// Which side last wrote during a sync, recorded on the identity mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    LocalToRemote,
    RemoteToLocal,
    #[default]
    None,
}

impl SyncDirection {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LocalToRemote => "local_to_remote",
            Self::RemoteToLocal => "remote_to_local",
            Self::None => "none",
        }
    }
}

impl FromStr for SyncDirection {
    type Err = crate::error::RoadsyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local_to_remote" => Ok(Self::LocalToRemote),
            "remote_to_local" => Ok(Self::RemoteToLocal),
            "none" => Ok(Self::None),
            other => Err(crate::error::RoadsyncError::Config(format!(
                "invalid sync direction: {other}"
            ))),
        }
    }
}

/// A local unit of work parsed from a planning document.
///
/// `local_id` is derived from the document-relative path plus a stable
/// anchor (e.g. `tasks.md#T008`); the anchor alone keys rewrites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub local_id: String,
    pub anchor: String,
    pub title: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub parallel_eligible: bool,
    /// Owning phase's `local_id`, when the task sits under a phase heading.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_phase_id: Option<String>,
    /// Unrecognized `[TAG]`s, preserved verbatim for round-tripping.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_tags: Vec<String>,
    /// 1-based source line; keys the rewrite step.
    pub line_number: usize,
    /// Exact source line as parsed; verified before any rewrite.
    pub line_text: String,
}

/// A grouping construct mapping onto a remote milestone.
///
/// Phases own the ordering of their child task ids; tasks are referenced,
/// not embedded, so a task can be re-parented between parses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase {
    pub local_id: String,
    pub anchor: String,
    /// Normalized phase number ("1", "2.1"); "01" and "1" are the same phase.
    pub number: String,
    pub title: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub goal: String,
    /// Ordered child task `local_id`s. Ordering is local-only, never mirrored.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub task_ids: Vec<String>,
    pub line_number: usize,
    pub line_text: String,
}

/// Semantic category of a derived label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelCategory {
    Priority,
    Status,
    Custom,
}

/// A tracker label derived from task attributes. No independent lifecycle;
/// recomputed each sync.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub category: LabelCategory,
}

impl Label {
    /// Display color for the label's category (GitHub hex, no `#`).
    #[must_use]
    pub const fn color(&self) -> &'static str {
        match self.category {
            LabelCategory::Priority => "d93f0b",
            LabelCategory::Status => "0e8a16",
            LabelCategory::Custom => "ededed",
        }
    }
}

/// Labels derived from a task's attributes.
#[must_use]
pub fn labels_for_task(task: &Task) -> Vec<Label> {
    let mut labels = Vec::new();
    if let Some(p) = task.priority {
        labels.push(Label {
            name: format!("priority:{p}").to_lowercase(),
            category: LabelCategory::Priority,
        });
    }
    if task.parallel_eligible {
        labels.push(Label {
            name: "parallel".to_string(),
            category: LabelCategory::Status,
        });
    }
    for tag in &task.extra_tags {
        labels.push(Label {
            name: tag.to_lowercase(),
            category: LabelCategory::Custom,
        });
    }
    labels
}

/// Open/closed state of a remote issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
    Open,
    Closed,
}

impl IssueState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

/// Read-only snapshot of a tracker issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteIssue {
    /// Stable tracker id (GitHub issue `number`).
    pub remote_id: u64,
    pub title: String,
    pub state: IssueState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub milestone: Option<u64>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub labels: BTreeSet<String>,
    /// `local_id` recovered from the body's sync marker, if present.
    /// Used only for idempotency verification, never for correlation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marker: Option<String>,
}

/// Read-only snapshot of a tracker milestone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteMilestone {
    pub remote_id: u64,
    pub title: String,
    pub state: IssueState,
}

/// Normalized parse result for one planning document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub path: PathBuf,
    pub framework: Framework,
    pub tasks: Vec<Task>,
    pub phases: Vec<Phase>,
}

impl Document {
    #[must_use]
    pub fn task(&self, local_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.local_id == local_id)
    }

    #[must_use]
    pub fn phase(&self, local_id: &str) -> Option<&Phase> {
        self.phases.iter().find(|p| p.local_id == local_id)
    }
}

/// Build a `local_id` from a document-relative path and an anchor.
#[must_use]
pub fn local_id(doc_path: &std::path::Path, anchor: &str) -> String {
    let rel = doc_path
        .file_name()
        .map_or_else(|| doc_path.display().to_string(), |n| n.to_string_lossy().into_owned());
    format!("{rel}#{anchor}")
}
