//! GitHub Issues tracker
//!
//! [`IssueTracker`] implementation on top of the GitHub REST v3 API.

use super::{
    ErrorClass, Issue, IssueDraft, IssueFilter, IssuePatch, IssueState, IssueTracker, Label,
    RepoRef, TrackerError, TrackerResult,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// Per-request timeout for list calls
const LIST_TIMEOUT: Duration = Duration::from_secs(30);
/// Per-request timeout for create/update operations
const WRITE_TIMEOUT: Duration = Duration::from_secs(15);
/// Maximum page size accepted by the REST API
const MAX_PER_PAGE: u32 = 100;

/// GitHub REST client
pub struct GitHubTracker {
    client: Client,
    rest_base_url: String,
    auth_token: Option<String>,
}

/// GitHub issue (REST API format)
#[derive(Debug, Clone, Deserialize)]
struct GitHubIssue {
    number: u64,
    title: String,
    #[serde(default)]
    body: Option<String>,
    state: IssueState,
    #[serde(default)]
    labels: Vec<GitHubLabel>,
    #[serde(default)]
    assignee: Option<GitHubUser>,
    #[serde(default)]
    html_url: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    /// Present when the "issue" is actually a pull request
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct GitHubLabel {
    name: String,
    #[serde(default)]
    color: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct GitHubUser {
    login: String,
}

#[derive(Debug, Clone, Deserialize)]
struct GitHubRepository {
    name: String,
    owner: GitHubUser,
}

/// Issue creation request
#[derive(Debug, Clone, Serialize)]
struct CreateIssueRequest {
    title: String,
    body: String,
    labels: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    assignees: Vec<String>,
}

/// Issue update request
#[derive(Debug, Clone, Serialize)]
struct UpdateIssueRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<IssueState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    labels: Option<Vec<String>>,
}

impl GitHubIssue {
    fn into_issue(self, repo: &RepoRef) -> Issue {
        Issue {
            number: self.number,
            repository: repo.clone(),
            title: self.title,
            body: self.body.unwrap_or_default(),
            state: self.state,
            labels: self.labels.into_iter().map(|l| l.name).collect(),
            assignee: self.assignee.map(|u| u.login),
            url: self.html_url,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

impl From<&IssuePatch> for UpdateIssueRequest {
    fn from(patch: &IssuePatch) -> Self {
        Self {
            title: patch.title.clone(),
            body: patch.body.clone(),
            state: patch.state,
            labels: patch
                .labels
                .as_ref()
                .map(|labels| labels.iter().cloned().collect()),
        }
    }
}

/// Map an HTTP status to an error class
pub fn classify_status(status: StatusCode) -> ErrorClass {
    match status.as_u16() {
        401 | 403 => ErrorClass::Auth,
        404 | 410 => ErrorClass::NotFound,
        429 => ErrorClass::RateLimit,
        500..=599 => ErrorClass::Server,
        _ => ErrorClass::Invalid,
    }
}

/// Seconds to wait, from `Retry-After` or `X-RateLimit-Reset`
fn retry_after_secs(headers: &header::HeaderMap, now: DateTime<Utc>) -> Option<u64> {
    let read = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
    };

    if let Some(secs) = read("retry-after") {
        return Some(secs.max(0) as u64);
    }
    read("x-ratelimit-reset").map(|reset| (reset - now.timestamp()).max(0) as u64)
}

/// GitHub reports primary rate limits as 403 with zero remaining quota
fn is_rate_limited(status: StatusCode, headers: &header::HeaderMap) -> bool {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return true;
    }
    status == StatusCode::FORBIDDEN
        && (headers
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim() == "0")
            .unwrap_or(false)
            || headers.contains_key("retry-after"))
}

impl GitHubTracker {
    /// Create a new GitHub tracker for a web or API base URL
    ///
    /// The token is read from `GITHUB_TOKEN` when present; use
    /// [`GitHubTracker::with_token`] to override.
    pub fn new(url: &str) -> crate::Result<Self> {
        let client = Client::builder()
            .timeout(LIST_TIMEOUT)
            .default_headers({
                let mut headers = header::HeaderMap::new();
                headers.insert(
                    header::USER_AGENT,
                    header::HeaderValue::from_static("kanban-sync/0.1"),
                );
                headers.insert(
                    header::ACCEPT,
                    header::HeaderValue::from_static("application/vnd.github+json"),
                );
                headers
            })
            .build()?;

        Ok(Self {
            client,
            rest_base_url: rest_base_url(url),
            auth_token: std::env::var("GITHUB_TOKEN").ok(),
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth_token.is_some()
    }

    pub fn rest_base_url(&self) -> &str {
        &self.rest_base_url
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match self.auth_token {
            Some(ref token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Turn a non-success response into a typed error
    async fn error_from(response: Response, context: &str) -> TrackerError {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await.unwrap_or_default();
        let message = format!("{}: HTTP {}: {}", context, status, body.trim());

        if is_rate_limited(status, &headers) {
            let mut err = TrackerError::new(ErrorClass::RateLimit, message);
            if let Some(secs) = retry_after_secs(&headers, Utc::now()) {
                err = err.with_retry_after(secs);
            }
            return err;
        }
        TrackerError::new(classify_status(status), message)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        query: &[(&str, String)],
        context: &str,
    ) -> TrackerResult<T> {
        let response = self
            .authorized(self.client.get(url).query(query))
            .timeout(LIST_TIMEOUT)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            Err(Self::error_from(response, context).await)
        }
    }

    fn repo_url(&self, repo: &RepoRef, suffix: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.rest_base_url, repo.owner, repo.name, suffix
        )
    }
}

/// Resolve the REST base URL for github.com or a GitHub Enterprise host
fn rest_base_url(url: &str) -> String {
    let base = url.trim_end_matches('/');
    if base.contains("api.github.com") {
        base.to_string()
    } else if base.contains("github.com") {
        "https://api.github.com".to_string()
    } else {
        format!("{}/api/v3", base)
    }
}

#[async_trait]
impl IssueTracker for GitHubTracker {
    async fn list_issues(&self, repo: &RepoRef, filter: &IssueFilter) -> TrackerResult<Vec<Issue>> {
        let url = self.repo_url(repo, "issues");
        let query = [
            ("state", filter.state.as_str().to_string()),
            ("page", filter.page.max(1).to_string()),
            ("per_page", filter.per_page.clamp(1, MAX_PER_PAGE).to_string()),
        ];

        debug!(repo = %repo, page = filter.page, "Listing GitHub issues");

        let raw: Vec<GitHubIssue> = self.get_json(&url, &query, "GitHub list issues").await?;
        let issues: Vec<Issue> = raw
            .into_iter()
            .filter(|i| i.pull_request.is_none())
            .map(|i| i.into_issue(repo))
            .collect();

        debug!(repo = %repo, count = issues.len(), "GitHub issues page fetched");
        Ok(issues)
    }

    async fn list_labels(&self, repo: &RepoRef) -> TrackerResult<Vec<Label>> {
        let url = self.repo_url(repo, "labels");
        let raw: Vec<GitHubLabel> = self
            .get_json(
                &url,
                &[("per_page", MAX_PER_PAGE.to_string())],
                "GitHub list labels",
            )
            .await?;

        Ok(raw
            .into_iter()
            .map(|l| Label {
                name: l.name,
                color: l.color,
            })
            .collect())
    }

    async fn list_repositories(&self) -> TrackerResult<Vec<RepoRef>> {
        let url = format!("{}/user/repos", self.rest_base_url);
        let mut repos = Vec::new();
        let mut page = 1u32;

        loop {
            let raw: Vec<GitHubRepository> = self
                .get_json(
                    &url,
                    &[
                        ("per_page", MAX_PER_PAGE.to_string()),
                        ("page", page.to_string()),
                    ],
                    "GitHub list repositories",
                )
                .await?;
            let len = raw.len();
            repos.extend(raw.into_iter().map(|r| RepoRef::new(r.owner.login, r.name)));
            if len < MAX_PER_PAGE as usize {
                break;
            }
            page += 1;
        }

        Ok(repos)
    }

    async fn create_issue(&self, repo: &RepoRef, draft: &IssueDraft) -> TrackerResult<Issue> {
        let url = self.repo_url(repo, "issues");
        let request = CreateIssueRequest {
            title: draft.title.clone(),
            body: draft.body.clone(),
            labels: draft.labels.iter().cloned().collect(),
            assignees: draft.assignee.iter().cloned().collect(),
        };

        info!(repo = %repo, title = %request.title, "Creating GitHub issue");

        let response = self
            .authorized(self.client.post(&url).json(&request))
            .timeout(WRITE_TIMEOUT)
            .send()
            .await?;

        if response.status() == StatusCode::CREATED {
            let issue: GitHubIssue = response.json().await?;
            info!(number = issue.number, "GitHub issue created");
            Ok(issue.into_issue(repo))
        } else {
            Err(Self::error_from(response, "GitHub create issue").await)
        }
    }

    async fn update_issue(
        &self,
        repo: &RepoRef,
        number: u64,
        patch: &IssuePatch,
    ) -> TrackerResult<Issue> {
        let url = self.repo_url(repo, &format!("issues/{}", number));
        let request = UpdateIssueRequest::from(patch);

        info!(repo = %repo, number = %number, "Updating GitHub issue");

        let response = self
            .authorized(self.client.patch(&url).json(&request))
            .timeout(WRITE_TIMEOUT)
            .send()
            .await?;

        if response.status().is_success() {
            let issue: GitHubIssue = response.json().await?;
            Ok(issue.into_issue(repo))
        } else {
            Err(Self::error_from(response, "GitHub update issue").await)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_public_urls() {
        assert_eq!(rest_base_url("https://github.com"), "https://api.github.com");
        assert_eq!(rest_base_url("https://github.com/"), "https://api.github.com");
        assert_eq!(
            rest_base_url("https://api.github.com"),
            "https://api.github.com"
        );
    }

    #[test]
    fn test_enterprise_urls() {
        let tracker = GitHubTracker::new("https://github.example.com/")
            .expect("Failed to create tracker")
            .with_token("t");
        assert_eq!(tracker.rest_base_url(), "https://github.example.com/api/v3");
        assert!(tracker.is_authenticated());
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(StatusCode::UNAUTHORIZED), ErrorClass::Auth);
        assert_eq!(classify_status(StatusCode::NOT_FOUND), ErrorClass::NotFound);
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            ErrorClass::RateLimit
        );
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY), ErrorClass::Server);
        assert_eq!(
            classify_status(StatusCode::UNPROCESSABLE_ENTITY),
            ErrorClass::Invalid
        );
    }

    #[test]
    fn test_rate_limit_detection() {
        let mut headers = header::HeaderMap::new();
        assert!(!is_rate_limited(StatusCode::FORBIDDEN, &headers));

        headers.insert("x-ratelimit-remaining", "0".parse().unwrap());
        headers.insert("x-ratelimit-reset", "1700000090".parse().unwrap());
        assert!(is_rate_limited(StatusCode::FORBIDDEN, &headers));

        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        assert_eq!(retry_after_secs(&headers, now), Some(90));

        headers.insert("retry-after", "12".parse().unwrap());
        assert_eq!(retry_after_secs(&headers, now), Some(12));
    }

    #[test]
    fn test_issue_conversion() {
        let raw: GitHubIssue = serde_json::from_value(serde_json::json!({
            "number": 42,
            "title": "Ship it",
            "body": null,
            "state": "closed",
            "labels": [{"name": "done", "color": "0e8a16"}, {"name": "bug"}],
            "assignee": {"login": "octocat"},
            "html_url": "https://github.com/acme/board/issues/42",
            "created_at": "2026-01-01T00:00:00Z",
            "updated_at": "2026-01-02T00:00:00Z"
        }))
        .unwrap();
        assert!(raw.pull_request.is_none());

        let issue = raw.into_issue(&RepoRef::new("acme", "board"));
        assert_eq!(issue.number, 42);
        assert_eq!(issue.body, "");
        assert_eq!(issue.state, IssueState::Closed);
        assert!(issue.labels.contains("done"));
        assert_eq!(issue.assignee.as_deref(), Some("octocat"));
    }

    #[test]
    fn test_update_request_serialization() {
        let patch = IssuePatch {
            title: Some("New".to_string()),
            state: Some(IssueState::Closed),
            ..Default::default()
        };
        let value = serde_json::to_value(UpdateIssueRequest::from(&patch)).unwrap();
        assert_eq!(value, serde_json::json!({"title": "New", "state": "closed"}));
    }
}
