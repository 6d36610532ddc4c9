//! Remote tracker client
//!
//! The engine only talks to the remote issue tracker through [`IssueTracker`].
//! Every call returns either structured data or a [`TrackerError`] carrying an
//! HTTP-like [`ErrorClass`] so callers can decide whether a failure is worth
//! retrying.
//!
//! # Built-in Trackers
//!
//! - **GitHub**: REST v3 adapter for GitHub Issues ([`github::GitHubTracker`])

pub mod github;
pub mod retry;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use retry::{RetryDecision, RetryableError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub use github::GitHubTracker;

/// Result type for tracker calls
pub type TrackerResult<T> = std::result::Result<T, TrackerError>;

/// Reference to a remote repository (`owner/name`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl FromStr for RepoRef {
    type Err = crate::KanbanSyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((owner, name))
                if !owner.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(Self::new(owner, name))
            }
            _ => Err(crate::KanbanSyncError::Config(format!(
                "Invalid repository reference '{}', expected owner/name",
                s
            ))),
        }
    }
}

/// Open/closed state of a remote issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
    Open,
    Closed,
}

impl IssueState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for IssueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remote issue as the engine sees it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub number: u64,
    pub repository: RepoRef,
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub state: IssueState,
    #[serde(default)]
    pub labels: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Remote label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// Which issue states to list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateFilter {
    Open,
    Closed,
    #[default]
    All,
}

impl StateFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
            Self::All => "all",
        }
    }
}

/// Filter and pagination controls for `list_issues`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueFilter {
    pub state: StateFilter,
    /// 1-based page number
    pub page: u32,
    pub per_page: u32,
}

impl Default for IssueFilter {
    fn default() -> Self {
        Self {
            state: StateFilter::All,
            page: 1,
            per_page: 100,
        }
    }
}

impl IssueFilter {
    pub fn with_page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }
}

/// Fields for a new issue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueDraft {
    pub title: String,
    pub body: String,
    pub labels: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
}

/// Partial update of an issue; `None` fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<IssueState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeSet<String>>,
}

impl IssuePatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.body.is_none() && self.state.is_none() && self.labels.is_none()
    }

    /// Patch that only changes the state
    pub fn state(state: IssueState) -> Self {
        Self {
            state: Some(state),
            ..Default::default()
        }
    }
}

/// HTTP-like failure class of a tracker call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Auth,
    RateLimit,
    NotFound,
    Server,
    Network,
    /// Request rejected as malformed (e.g. HTTP 422)
    Invalid,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::RateLimit => "rate_limit",
            Self::NotFound => "not_found",
            Self::Server => "server",
            Self::Network => "network",
            Self::Invalid => "invalid",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed failure of a tracker call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("tracker {class} error: {message}")]
pub struct TrackerError {
    pub class: ErrorClass,
    pub message: String,
    /// Seconds to wait before retrying, when the tracker said so
    pub retry_after: Option<u64>,
}

impl TrackerError {
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after = Some(secs);
        self
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            ErrorClass::Network,
            format!("request timed out after {:.1}s", after.as_secs_f64()),
        )
    }
}

impl RetryableError for TrackerError {
    fn retry_decision(&self) -> RetryDecision {
        match self.class {
            ErrorClass::RateLimit => {
                RetryDecision::RetryAfter(Duration::from_secs(self.retry_after.unwrap_or(60)))
            }
            ErrorClass::Server | ErrorClass::Network => RetryDecision::Retry,
            ErrorClass::Auth | ErrorClass::NotFound | ErrorClass::Invalid => RetryDecision::NoRetry,
        }
    }
}

impl From<reqwest::Error> for TrackerError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return TrackerError::new(github::classify_status(status), e.to_string());
        }
        TrackerError::new(ErrorClass::Network, e.to_string())
    }
}

/// Operations the sync engine needs from a remote issue tracker
#[async_trait]
pub trait IssueTracker: Send + Sync {
    /// List one page of issues in a repository
    async fn list_issues(&self, repo: &RepoRef, filter: &IssueFilter) -> TrackerResult<Vec<Issue>>;

    /// List the labels defined in a repository
    async fn list_labels(&self, repo: &RepoRef) -> TrackerResult<Vec<Label>>;

    /// List repositories visible to the authenticated user
    async fn list_repositories(&self) -> TrackerResult<Vec<RepoRef>>;

    /// Create an issue
    async fn create_issue(&self, repo: &RepoRef, draft: &IssueDraft) -> TrackerResult<Issue>;

    /// Update an existing issue
    async fn update_issue(
        &self,
        repo: &RepoRef,
        number: u64,
        patch: &IssuePatch,
    ) -> TrackerResult<Issue>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_ref_parse() {
        let repo: RepoRef = "acme/board".parse().unwrap();
        assert_eq!(repo, RepoRef::new("acme", "board"));
        assert_eq!(repo.to_string(), "acme/board");

        assert!("acme".parse::<RepoRef>().is_err());
        assert!("/board".parse::<RepoRef>().is_err());
        assert!("acme/board/extra".parse::<RepoRef>().is_err());
    }

    #[test]
    fn test_retry_decisions_by_class() {
        assert_eq!(
            TrackerError::new(ErrorClass::RateLimit, "x").retry_decision(),
            RetryDecision::RetryAfter(Duration::from_secs(60))
        );
        assert_eq!(
            TrackerError::new(ErrorClass::Server, "x").retry_decision(),
            RetryDecision::Retry
        );
        assert_eq!(
            TrackerError::new(ErrorClass::Auth, "x").retry_decision(),
            RetryDecision::NoRetry
        );
        assert_eq!(
            TrackerError::new(ErrorClass::NotFound, "x").retry_decision(),
            RetryDecision::NoRetry
        );
    }

    #[test]
    fn test_patch_is_empty() {
        assert!(IssuePatch::default().is_empty());
        assert!(!IssuePatch::state(IssueState::Closed).is_empty());
    }

    #[test]
    fn test_timeout_is_network_class() {
        let err = TrackerError::timeout(Duration::from_secs(15));
        assert_eq!(err.class, ErrorClass::Network);
        assert!(err.to_string().contains("timed out"));
    }
}
