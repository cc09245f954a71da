//! Remote issue tracker abstraction.
//!
//! `IssueClient` is the capability boundary for everything the tracker can
//! do; the engine only ever sees read-only snapshots plus the mutation
//! calls below. All mutations are assumed idempotent at the identity-key
//! level: the driver verifies ambiguous failures via a reconciling read
//! before retrying a create.

mod github;

pub use github::{GithubClient, DEFAULT_API_BASE};

use once_cell::sync::Lazy;
use regex::Regex;
use std::thread;
use std::time::Duration;
use tracing::warn;

use crate::error::{Result, RoadsyncError};
use crate::model::{RemoteIssue, RemoteMilestone};

/// Maximum attempts for one remote mutation.
pub const MAX_ATTEMPTS: u32 = 3;

/// Base backoff delay; doubles per attempt.
const BACKOFF_BASE: Duration = Duration::from_millis(250);

/// Fields for a new remote issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIssue {
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
    pub milestone: Option<u64>,
}

/// Partial update of an existing remote issue. `None` fields are untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssueUpdate {
    pub title: Option<String>,
    pub labels: Option<Vec<String>>,
    pub milestone: Option<u64>,
}

impl IssueUpdate {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.title.is_none() && self.labels.is_none() && self.milestone.is_none()
    }
}

/// Capability set of the remote tracker.
pub trait IssueClient {
    /// Fetch all issues (open and closed) as one paginated read.
    fn list_issues(&self) -> Result<Vec<RemoteIssue>>;

    /// Fetch all milestones (open and closed).
    fn list_milestones(&self) -> Result<Vec<RemoteMilestone>>;

    /// Create an issue; returns the snapshot including its new remote id.
    fn create_issue(&mut self, new: &NewIssue) -> Result<RemoteIssue>;

    /// Apply a partial update to an issue.
    fn update_issue(&mut self, remote_id: u64, update: &IssueUpdate) -> Result<()>;

    /// Close an issue.
    fn close_issue(&mut self, remote_id: u64) -> Result<()>;

    /// Reopen a closed issue.
    fn reopen_issue(&mut self, remote_id: u64) -> Result<()>;

    /// Create a milestone; returns the snapshot including its new remote id.
    fn create_milestone(&mut self, title: &str, description: &str) -> Result<RemoteMilestone>;

    /// Ensure a label exists; creating an already-present label is a no-op.
    fn create_label_if_absent(&mut self, name: &str, color: &str) -> Result<()>;
}

/// Run a remote call with bounded exponential backoff on transient failure.
///
/// Fatal errors and exhaustion surface to the caller; the driver attributes
/// them to the specific item being synced.
///
/// # Errors
///
/// Returns the last error after `MAX_ATTEMPTS` transient failures, or the
/// first non-transient error.
pub fn with_retry<T>(op_name: &str, mut f: impl FnMut() -> Result<T>) -> Result<T> {
    let mut attempt = 0;
    loop {
        match f() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt + 1 < MAX_ATTEMPTS => {
                let delay = BACKOFF_BASE * 2u32.pow(attempt);
                warn!(op = op_name, attempt = attempt + 1, ?delay, error = %e, "transient failure, retrying");
                thread::sleep(delay);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

static MARKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<!--\s*roadsync:([^\s]+)\s*-->").unwrap());

/// Render the hidden sync marker carried in issue bodies.
#[must_use]
pub fn render_marker(local_id: &str) -> String {
    format!("<!-- roadsync:{local_id} -->")
}

/// Recover the local id from an issue body's sync marker, if present.
#[must_use]
pub fn extract_marker(body: &str) -> Option<String> {
    MARKER_RE
        .captures(body)
        .map(|caps| caps[1].to_string())
}

/// Compose an issue body: marker, context section, provenance footer.
#[must_use]
pub fn compose_body(local_id: &str, doc_path: &str, phase_title: Option<&str>) -> String {
    let mut parts = vec![render_marker(local_id), String::new()];
    parts.push(format!("**Source**: `{doc_path}`"));
    if let Some(phase) = phase_title {
        parts.push(format!("**Phase**: {phase}"));
    }
    parts.push(String::new());
    parts.push("---".to_string());
    parts.push("*Auto-generated by roadsync*".to_string());
    parts.join("\n")
}

/// Map an HTTP status to the transient/fatal error taxonomy.
#[must_use]
pub fn classify_status(status: u16, message: String) -> RoadsyncError {
    match status {
        401 | 403 => RoadsyncError::RemoteFatal { status, message },
        429 | 500..=599 => RoadsyncError::RemoteTransient { status, message },
        _ => RoadsyncError::RemoteFatal { status, message },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_roundtrip() {
        let body = compose_body("tasks.md#T008", "tasks.md", Some("Phase 2: Sync"));
        assert_eq!(extract_marker(&body).as_deref(), Some("tasks.md#T008"));
        assert!(body.contains("*Auto-generated by roadsync*"));
    }

    #[test]
    fn extract_marker_ignores_plain_bodies() {
        assert!(extract_marker("just a body").is_none());
        assert!(extract_marker("<!-- other:thing -->").is_none());
    }

    #[test]
    fn retry_gives_up_on_fatal_immediately() {
        let mut calls = 0;
        let result: Result<()> = with_retry("op", || {
            calls += 1;
            Err(RoadsyncError::RemoteFatal {
                status: 401,
                message: "no".to_string(),
            })
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn retry_exhausts_transient_after_max_attempts() {
        let mut calls = 0;
        let result: Result<()> = with_retry("op", || {
            calls += 1;
            Err(RoadsyncError::RemoteTransient {
                status: 503,
                message: "unavailable".to_string(),
            })
        });
        assert!(result.is_err());
        assert_eq!(calls, MAX_ATTEMPTS);
    }

    #[test]
    fn retry_recovers_after_transient() {
        let mut calls = 0;
        let result = with_retry("op", || {
            calls += 1;
            if calls < 2 {
                Err(RoadsyncError::RemoteTransient {
                    status: 429,
                    message: "rate limited".to_string(),
                })
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result.unwrap(), 2);
    }

    #[test]
    fn status_classification() {
        assert!(matches!(
            classify_status(401, String::new()),
            RoadsyncError::RemoteFatal { .. }
        ));
        assert!(matches!(
            classify_status(429, String::new()),
            RoadsyncError::RemoteTransient { .. }
        ));
        assert!(matches!(
            classify_status(503, String::new()),
            RoadsyncError::RemoteTransient { .. }
        ));
        assert!(matches!(
            classify_status(404, String::new()),
            RoadsyncError::RemoteFatal { .. }
        ));
    }
}
