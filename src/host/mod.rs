//! Code-hosting platform operations: pull requests, checks, and action
//! logs, expressed as a trait plus a GitHub REST adapter.
//!
//! Only branches under the agent's configured prefix are ever acted on;
//! cleanup and abandonment never touch human branches. Merges are always
//! squash merges.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::providers::sanitize_http_error_body;

const GITHUB_API_BASE: &str = "https://api.github.com";
const USER_AGENT: &str = "seedgpt";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A pull request on the hosting platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    /// PR number.
    pub number: u64,
    /// Head branch name.
    pub head_ref: String,
    /// PR title.
    pub title: String,
}

/// Lifecycle state of one CI check run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    /// Queued or in progress.
    Pending,
    /// The check finished.
    Completed,
}

/// One CI check run attached to a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckRun {
    /// Check name.
    pub name: String,
    /// Current status.
    pub status: CheckStatus,
    /// Terminal conclusion (`success`, `failure`, ...) once completed.
    pub conclusion: Option<String>,
}

impl CheckRun {
    /// Whether the check finished with a successful conclusion.
    pub fn passed(&self) -> bool {
        self.status == CheckStatus::Completed
            && self.conclusion.as_deref() == Some("success")
    }
}

/// Errors from code-host operations.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// HTTP transport failure.
    #[error("host request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Non-2xx response from the platform API.
    #[error("host returned status {status}: {body}")]
    HttpStatus {
        /// HTTP status code.
        status: u16,
        /// Sanitized response body.
        body: String,
    },

    /// Response did not match the expected schema.
    #[error("host response parse error: {0}")]
    Parse(String),
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Code-hosting platform interface used by the iteration controller.
#[async_trait]
pub trait CodeHost: Send + Sync {
    /// Open a pull request from `head` into `base`.
    async fn create_pull(
        &self,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> Result<PullRequest, HostError>;

    /// Squash-merge a pull request.
    async fn merge_pull(&self, number: u64) -> Result<(), HostError>;

    /// Close a pull request without merging.
    async fn close_pull(&self, number: u64) -> Result<(), HostError>;

    /// All open pull requests.
    async fn list_open_pulls(&self) -> Result<Vec<PullRequest>, HostError>;

    /// Delete a remote branch ref.
    async fn delete_branch(&self, branch: &str) -> Result<(), HostError>;

    /// CI check runs for a commit sha.
    async fn list_checks(&self, sha: &str) -> Result<Vec<CheckRun>, HostError>;

    /// Combined log excerpt of failed workflow jobs for a commit sha,
    /// truncated to `max_chars` per job.
    async fn failure_logs(&self, sha: &str, max_chars: usize) -> Result<String, HostError>;
}

// ---------------------------------------------------------------------------
// GitHub adapter
// ---------------------------------------------------------------------------

/// GitHub REST v3 adapter.
#[derive(Debug, Clone)]
pub struct GitHubHost {
    token: String,
    owner: String,
    repo: String,
    base_url: String,
    client: reqwest::Client,
}

impl GitHubHost {
    /// Create an adapter for one repository.
    pub fn new(token: String, owner: String, repo: String) -> Self {
        Self {
            token,
            owner,
            repo,
            base_url: GITHUB_API_BASE.to_owned(),
            client: reqwest::Client::new(),
        }
    }

    /// Override the API base URL (used by tests against a local stub).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn repo_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}{path}",
            self.base_url, self.owner, self.repo
        )
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("authorization", format!("Bearer {}", self.token))
            .header("accept", "application/vnd.github+json")
            .header("user-agent", USER_AGENT)
    }

    async fn check(&self, response: reqwest::Response) -> Result<String, HostError> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(HostError::HttpStatus {
                status: status.as_u16(),
                body: sanitize_http_error_body(&body),
            });
        }
        Ok(body)
    }

    async fn get_json(&self, url: &str) -> Result<Value, HostError> {
        let response = self.request(self.client.get(url)).send().await?;
        let body = self.check(response).await?;
        serde_json::from_str(&body).map_err(|e| HostError::Parse(e.to_string()))
    }

    async fn send_json(
        &self,
        builder: reqwest::RequestBuilder,
        body: &Value,
    ) -> Result<Value, HostError> {
        let response = self.request(builder).json(body).send().await?;
        let text = self.check(response).await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| HostError::Parse(e.to_string()))
    }
}

fn parse_pull(value: &Value) -> Result<PullRequest, HostError> {
    Ok(PullRequest {
        number: value
            .get("number")
            .and_then(Value::as_u64)
            .ok_or_else(|| HostError::Parse("pull missing number".to_owned()))?,
        head_ref: value
            .pointer("/head/ref")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned(),
        title: value
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned(),
    })
}

#[async_trait]
impl CodeHost for GitHubHost {
    async fn create_pull(
        &self,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> Result<PullRequest, HostError> {
        let payload = json!({
            "head": head,
            "base": base,
            "title": title,
            "body": body,
        });
        let url = self.repo_url("/pulls");
        let created = self.send_json(self.client.post(&url), &payload).await?;
        debug!(head, "pull request opened");
        parse_pull(&created)
    }

    async fn merge_pull(&self, number: u64) -> Result<(), HostError> {
        let url = self.repo_url(&format!("/pulls/{number}/merge"));
        let payload = json!({ "merge_method": "squash" });
        self.send_json(self.client.put(&url), &payload).await?;
        Ok(())
    }

    async fn close_pull(&self, number: u64) -> Result<(), HostError> {
        let url = self.repo_url(&format!("/pulls/{number}"));
        let payload = json!({ "state": "closed" });
        self.send_json(self.client.patch(&url), &payload).await?;
        Ok(())
    }

    async fn list_open_pulls(&self) -> Result<Vec<PullRequest>, HostError> {
        let url = self.repo_url("/pulls?state=open&per_page=100");
        let pulls = self.get_json(&url).await?;
        let Some(items) = pulls.as_array() else {
            return Err(HostError::Parse("pulls list is not an array".to_owned()));
        };
        items.iter().map(parse_pull).collect()
    }

    async fn delete_branch(&self, branch: &str) -> Result<(), HostError> {
        let url = self.repo_url(&format!("/git/refs/heads/{branch}"));
        let response = self.request(self.client.delete(&url)).send().await?;
        // 422 means the ref is already gone; cleanup treats that as done.
        if response.status().as_u16() == 422 {
            return Ok(());
        }
        self.check(response).await?;
        Ok(())
    }

    async fn list_checks(&self, sha: &str) -> Result<Vec<CheckRun>, HostError> {
        let url = self.repo_url(&format!("/commits/{sha}/check-runs?per_page=100"));
        let body = self.get_json(&url).await?;
        let Some(runs) = body.get("check_runs").and_then(Value::as_array) else {
            return Err(HostError::Parse("missing check_runs array".to_owned()));
        };

        Ok(runs
            .iter()
            .map(|run| {
                let status = run.get("status").and_then(Value::as_str).unwrap_or_default();
                CheckRun {
                    name: run
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_owned(),
                    status: if status == "completed" {
                        CheckStatus::Completed
                    } else {
                        CheckStatus::Pending
                    },
                    conclusion: run
                        .get("conclusion")
                        .and_then(Value::as_str)
                        .map(ToOwned::to_owned),
                }
            })
            .collect())
    }

    async fn failure_logs(&self, sha: &str, max_chars: usize) -> Result<String, HostError> {
        let url = self.repo_url(&format!("/actions/runs?head_sha={sha}&per_page=20"));
        let body = self.get_json(&url).await?;
        let runs = body
            .get("workflow_runs")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut sections = Vec::new();

        for run in &runs {
            let conclusion = run
                .get("conclusion")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if conclusion != "failure" {
                continue;
            }
            let Some(run_id) = run.get("id").and_then(Value::as_u64) else {
                continue;
            };

            let jobs_url = self.repo_url(&format!("/actions/runs/{run_id}/jobs?per_page=50"));
            let jobs_body = self.get_json(&jobs_url).await?;
            let jobs = jobs_body
                .get("jobs")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();

            for job in &jobs {
                let job_conclusion = job
                    .get("conclusion")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if job_conclusion != "failure" {
                    continue;
                }
                let Some(job_id) = job.get("id").and_then(Value::as_u64) else {
                    continue;
                };
                let name = job.get("name").and_then(Value::as_str).unwrap_or("job");

                let logs_url = self.repo_url(&format!("/actions/jobs/{job_id}/logs"));
                let response = self.request(self.client.get(&logs_url)).send().await?;
                let logs = self.check(response).await.unwrap_or_default();

                let tail = tail_chars(&logs, max_chars);
                sections.push(format!("=== {name} ===\n{tail}"));
            }
        }

        Ok(sections.join("\n\n"))
    }
}

/// Keep the trailing `max_chars` characters — failures cluster at the end
/// of CI logs.
fn tail_chars(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_owned();
    }
    text.chars().skip(count.saturating_sub(max_chars)).collect()
}
