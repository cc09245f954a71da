//! GitHub REST v3 implementation of the `IssueClient` capability set.
//!
//! Blocking `ureq` calls, suitable for CLI use. Listing paginates with
//! `per_page=100` until a short page; pull requests are filtered out of the
//! issue list (the issues endpoint returns both).

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use tracing::debug;

use crate::error::{Result, RoadsyncError};
use crate::model::{IssueState, RemoteIssue, RemoteMilestone};
use crate::remote::{classify_status, extract_marker, IssueClient, IssueUpdate, NewIssue};

/// Default GitHub API base URL.
pub const DEFAULT_API_BASE: &str = "https://api.github.com";

/// User-Agent header required by the GitHub API.
const USER_AGENT: &str = "roadsync-cli";

const API_VERSION: &str = "2022-11-28";

const PER_PAGE: usize = 100;

/// GitHub-backed remote issue client.
#[derive(Debug)]
pub struct GithubClient {
    agent: ureq::Agent,
    api_base: String,
    owner: String,
    repo: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct ApiLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ApiMilestone {
    number: u64,
    title: String,
    state: String,
}

#[derive(Debug, Deserialize)]
struct ApiIssue {
    number: u64,
    title: String,
    state: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    labels: Vec<ApiLabel>,
    #[serde(default)]
    milestone: Option<ApiMilestone>,
    /// Present when the "issue" is actually a pull request.
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct CreateIssueBody<'a> {
    title: &'a str,
    body: &'a str,
    labels: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    milestone: Option<u64>,
}

impl GithubClient {
    #[must_use]
    pub fn new(api_base: &str, owner: &str, repo: &str, token: &str) -> Self {
        Self {
            agent: ureq::AgentBuilder::new()
                .timeout(std::time::Duration::from_secs(30))
                .build(),
            api_base: api_base.trim_end_matches('/').to_string(),
            owner: owner.to_string(),
            repo: repo.to_string(),
            token: token.to_string(),
        }
    }

    fn repo_url(&self, tail: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.api_base, self.owner, self.repo, tail
        )
    }

    fn request(&self, method: &str, url: &str) -> ureq::Request {
        self.agent
            .request(method, url)
            .set("Authorization", &format!("Bearer {}", self.token))
            .set("Accept", "application/vnd.github+json")
            .set("User-Agent", USER_AGENT)
            .set("X-GitHub-Api-Version", API_VERSION)
    }

    fn send_json(&self, method: &str, url: &str, body: &serde_json::Value) -> Result<ureq::Response> {
        map_response(self.request(method, url).send_json(body.clone()))
    }

    fn get(&self, url: &str) -> Result<ureq::Response> {
        map_response(self.request("GET", url).call())
    }

    /// Fetch one paginated listing completely.
    fn paginate<T: serde::de::DeserializeOwned>(&self, tail: &str, extra_query: &str) -> Result<Vec<T>> {
        let mut out = Vec::new();
        let mut page = 1;
        loop {
            let url = format!(
                "{}?per_page={PER_PAGE}&page={page}{extra_query}",
                self.repo_url(tail)
            );
            debug!(%url, "remote list page");
            let batch: Vec<T> = self
                .get(&url)?
                .into_json()
                .map_err(|e| RoadsyncError::RemoteFatal {
                    status: 0,
                    message: format!("malformed listing response: {e}"),
                })?;
            let short = batch.len() < PER_PAGE;
            out.extend(batch);
            if short {
                return Ok(out);
            }
            page += 1;
        }
    }
}

fn map_response(
    result: std::result::Result<ureq::Response, ureq::Error>,
) -> Result<ureq::Response> {
    match result {
        Ok(resp) => Ok(resp),
        Err(ureq::Error::Status(code, resp)) => {
            let body = resp.into_string().unwrap_or_default();
            Err(classify_status(code, body))
        }
        Err(e) => Err(RoadsyncError::RemoteTransient {
            status: 0,
            message: e.to_string(),
        }),
    }
}

fn issue_from_api(api: ApiIssue) -> RemoteIssue {
    let marker = api.body.as_deref().and_then(extract_marker);
    RemoteIssue {
        remote_id: api.number,
        title: api.title,
        state: if api.state == "closed" {
            IssueState::Closed
        } else {
            IssueState::Open
        },
        milestone: api.milestone.map(|m| m.number),
        labels: api.labels.into_iter().map(|l| l.name).collect::<BTreeSet<_>>(),
        marker,
    }
}

fn milestone_from_api(api: ApiMilestone) -> RemoteMilestone {
    RemoteMilestone {
        remote_id: api.number,
        title: api.title,
        state: if api.state == "closed" {
            IssueState::Closed
        } else {
            IssueState::Open
        },
    }
}

impl IssueClient for GithubClient {
    fn list_issues(&self) -> Result<Vec<RemoteIssue>> {
        let raw: Vec<ApiIssue> = self.paginate("issues", "&state=all")?;
        Ok(raw
            .into_iter()
            .filter(|i| i.pull_request.is_none())
            .map(issue_from_api)
            .collect())
    }

    fn list_milestones(&self) -> Result<Vec<RemoteMilestone>> {
        let raw: Vec<ApiMilestone> = self.paginate("milestones", "&state=all")?;
        Ok(raw.into_iter().map(milestone_from_api).collect())
    }

    fn create_issue(&mut self, new: &NewIssue) -> Result<RemoteIssue> {
        let payload = serde_json::to_value(CreateIssueBody {
            title: &new.title,
            body: &new.body,
            labels: &new.labels,
            milestone: new.milestone,
        })?;
        let api: ApiIssue = self
            .send_json("POST", &self.repo_url("issues"), &payload)?
            .into_json()
            .map_err(|e| RoadsyncError::RemoteFatal {
                status: 0,
                message: format!("malformed create response: {e}"),
            })?;
        Ok(issue_from_api(api))
    }

    fn update_issue(&mut self, remote_id: u64, update: &IssueUpdate) -> Result<()> {
        let mut payload = serde_json::Map::new();
        if let Some(title) = &update.title {
            payload.insert("title".to_string(), json!(title));
        }
        if let Some(labels) = &update.labels {
            payload.insert("labels".to_string(), json!(labels));
        }
        if let Some(milestone) = update.milestone {
            payload.insert("milestone".to_string(), json!(milestone));
        }
        if payload.is_empty() {
            return Ok(());
        }
        self.send_json(
            "PATCH",
            &self.repo_url(&format!("issues/{remote_id}")),
            &serde_json::Value::Object(payload),
        )?;
        Ok(())
    }

    fn close_issue(&mut self, remote_id: u64) -> Result<()> {
        self.send_json(
            "PATCH",
            &self.repo_url(&format!("issues/{remote_id}")),
            &json!({ "state": "closed" }),
        )?;
        Ok(())
    }

    fn reopen_issue(&mut self, remote_id: u64) -> Result<()> {
        self.send_json(
            "PATCH",
            &self.repo_url(&format!("issues/{remote_id}")),
            &json!({ "state": "open" }),
        )?;
        Ok(())
    }

    fn create_milestone(&mut self, title: &str, description: &str) -> Result<RemoteMilestone> {
        let api: ApiMilestone = self
            .send_json(
                "POST",
                &self.repo_url("milestones"),
                &json!({ "title": title, "description": description }),
            )?
            .into_json()
            .map_err(|e| RoadsyncError::RemoteFatal {
                status: 0,
                message: format!("malformed milestone response: {e}"),
            })?;
        Ok(milestone_from_api(api))
    }

    fn create_label_if_absent(&mut self, name: &str, color: &str) -> Result<()> {
        let result = self.send_json(
            "POST",
            &self.repo_url("labels"),
            &json!({ "name": name, "color": color }),
        );
        match result {
            Ok(_) => Ok(()),
            // 422 means the label already exists.
            Err(RoadsyncError::RemoteFatal { status: 422, .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
