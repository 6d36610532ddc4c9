//! Sync configuration file handling
//!
//! Loads and saves `~/.config/kanban-sync/config.yaml`.

use crate::board::Card;
use crate::tracker::{IssueState, RepoRef};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How both-sides divergences are settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    RemoteWins,
    LocalWins,
    #[default]
    Manual,
}

/// Which repositories a pass covers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RepositoryTarget {
    Single(RepoRef),
    /// Every repository visible to the tracker credentials; cards need their own repository
    All,
}

impl TryFrom<String> for RepositoryTarget {
    type Error = crate::KanbanSyncError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        match value.trim() {
            "all" | "*" => Ok(Self::All),
            other => Ok(Self::Single(other.parse()?)),
        }
    }
}

impl From<RepositoryTarget> for String {
    fn from(target: RepositoryTarget) -> Self {
        target.to_string()
    }
}

impl fmt::Display for RepositoryTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(repo) => write!(f, "{}", repo),
            Self::All => f.write_str("all"),
        }
    }
}

/// Correspondence between a board column and remote labels
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub column_id: String,
    #[serde(default)]
    pub column_title: String,
    pub labels: BTreeSet<String>,
    /// Issue state cards in this column should have remotely
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<IssueState>,
}

impl ColumnMapping {
    pub fn new<I, S>(column_id: impl Into<String>, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            column_id: column_id.into(),
            column_title: String::new(),
            labels: labels.into_iter().map(Into::into).collect(),
            state: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.column_title = title.into();
        self
    }

    pub fn with_state(mut self, state: IssueState) -> Self {
        self.state = Some(state);
        self
    }
}

fn default_true() -> bool {
    true
}

/// Longest accepted auto sync interval (one year)
pub const MAX_SYNC_INTERVAL_SECS: u64 = 365 * 24 * 60 * 60;

fn default_sync_interval_secs() -> u64 {
    300
}

fn default_tracker_url() -> String {
    "https://github.com".to_string()
}

/// Configuration for one board/repository pairing
///
/// Immutable for the duration of a pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    pub repository: RepositoryTarget,

    #[serde(default)]
    pub mappings: Vec<ColumnMapping>,

    #[serde(default)]
    pub auto_sync: bool,

    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,

    /// End of the last successful pass; `None` before the first sync
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<DateTime<Utc>>,

    #[serde(default)]
    pub conflict_strategy: ConflictStrategy,

    /// Close the linked issue when its card disappears from the board
    #[serde(default = "default_true")]
    pub close_issues_for_removed_cards: bool,

    /// Delete the card when its linked issue is closed remotely
    #[serde(default)]
    pub remove_cards_for_closed_issues: bool,

    /// Tracker web or API URL
    #[serde(default = "default_tracker_url")]
    pub tracker_url: String,
}

impl SyncConfig {
    pub fn new(repository: RepositoryTarget) -> Self {
        Self {
            enabled: true,
            repository,
            mappings: Vec::new(),
            auto_sync: false,
            sync_interval_secs: default_sync_interval_secs(),
            last_sync: None,
            conflict_strategy: ConflictStrategy::default(),
            close_issues_for_removed_cards: true,
            remove_cards_for_closed_issues: false,
            tracker_url: default_tracker_url(),
        }
    }

    /// Config for a single repository
    pub fn for_repo(repo: RepoRef) -> Self {
        Self::new(RepositoryTarget::Single(repo))
    }

    pub fn with_mapping(mut self, mapping: ColumnMapping) -> Self {
        self.mappings.push(mapping);
        self
    }

    pub fn with_strategy(mut self, strategy: ConflictStrategy) -> Self {
        self.conflict_strategy = strategy;
        self
    }

    pub fn with_last_sync(mut self, at: DateTime<Utc>) -> Self {
        self.last_sync = Some(at);
        self
    }

    pub fn with_auto_sync(mut self, interval: Duration) -> Self {
        self.auto_sync = true;
        self.sync_interval_secs = interval.as_secs();
        self
    }

    pub fn with_card_removal(mut self, enabled: bool) -> Self {
        self.remove_cards_for_closed_issues = enabled;
        self
    }

    pub fn with_issue_closing(mut self, enabled: bool) -> Self {
        self.close_issues_for_removed_cards = enabled;
        self
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    /// When the next automatic pass is due, if auto sync is on
    pub fn next_sync_at(&self, last: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        if !self.auto_sync {
            return None;
        }
        let secs = i64::try_from(self.sync_interval_secs).ok()?;
        let interval = chrono::Duration::try_seconds(secs)?;
        last.or(self.last_sync)
            .unwrap_or_else(Utc::now)
            .checked_add_signed(interval)
    }

    /// Repository a card's issue lives in
    pub fn repo_for_card(&self, card: &Card) -> Option<RepoRef> {
        match self.repository {
            RepositoryTarget::Single(ref repo) => {
                Some(card.repository.clone().unwrap_or_else(|| repo.clone()))
            }
            RepositoryTarget::All => card.repository.clone(),
        }
    }

    /// Load configuration from the default path
    pub fn load_default() -> Result<Self> {
        Self::load(Self::default_path())
    }

    /// Load configuration from a specific path
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(crate::KanbanSyncError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        tracing::info!(path = %path.display(), "Loading sync configuration");

        let content = fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;

        tracing::debug!(
            repository = %config.repository,
            mappings = config.mappings.len(),
            strategy = ?config.conflict_strategy,
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        tracing::info!(path = %path.display(), "Saving sync configuration");

        fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    /// `~/.config/kanban-sync/config.yaml`
    pub fn default_path() -> PathBuf {
        let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(".config");
        path.push("kanban-sync");
        path.push("config.yaml");
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_yaml_defaults() {
        let yaml = r#"
repository: acme/board
mappings:
  - column_id: doing
    column_title: In Progress
    labels: [wip]
  - column_id: done
    labels: [done]
    state: closed
"#;
        let config: SyncConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.enabled);
        assert!(!config.auto_sync);
        assert_eq!(config.sync_interval(), Duration::from_secs(300));
        assert_eq!(config.conflict_strategy, ConflictStrategy::Manual);
        assert!(config.close_issues_for_removed_cards);
        assert!(!config.remove_cards_for_closed_issues);
        assert_eq!(
            config.repository,
            RepositoryTarget::Single(RepoRef::new("acme", "board"))
        );
        assert_eq!(config.mappings[1].state, Some(IssueState::Closed));
    }

    #[test]
    fn test_all_repositories_target() {
        let config: SyncConfig = serde_yaml::from_str("repository: all\n").unwrap();
        assert_eq!(config.repository, RepositoryTarget::All);

        let card = Card::new("c", "t");
        assert_eq!(config.repo_for_card(&card), None);
        let card = card.with_repository(RepoRef::new("acme", "api"));
        assert_eq!(
            config.repo_for_card(&card),
            Some(RepoRef::new("acme", "api"))
        );
    }

    #[test]
    fn test_invalid_repository_rejected() {
        assert!(serde_yaml::from_str::<SyncConfig>("repository: nope\n").is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested/config.yaml");

        let config = SyncConfig::for_repo(RepoRef::new("acme", "board"))
            .with_mapping(ColumnMapping::new("doing", ["wip"]))
            .with_strategy(ConflictStrategy::RemoteWins)
            .with_auto_sync(Duration::from_secs(60));
        config.save(&path).unwrap();

        let loaded = SyncConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_next_sync_at() {
        let now = Utc::now();
        let config = SyncConfig::for_repo(RepoRef::new("a", "b"));
        assert!(config.next_sync_at(Some(now)).is_none());

        let config = config.with_auto_sync(Duration::from_secs(60));
        assert_eq!(
            config.next_sync_at(Some(now)),
            Some(now + chrono::Duration::seconds(60))
        );
    }

    #[test]
    fn test_next_sync_at_out_of_range() {
        let now = Utc::now();
        let config = SyncConfig::for_repo(RepoRef::new("a", "b"))
            .with_auto_sync(Duration::from_secs(100_000_000_000_000_000));
        assert_eq!(config.next_sync_at(Some(now)), None);

        let mut config = config;
        config.sync_interval_secs = u64::MAX;
        assert_eq!(config.next_sync_at(Some(now)), None);
    }

    #[test]
    fn test_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        assert!(SyncConfig::load(temp_dir.path().join("missing.yaml")).is_err());
    }
}
