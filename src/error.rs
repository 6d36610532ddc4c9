//! Error types for kanban-sync
//!
//! Crate-level error enum plus the retry classification used by the tracker
//! client. Uses thiserror for ergonomic error handling.

use crate::tracker::retry::{RetryDecision, RetryableError};
use crate::tracker::TrackerError;
use thiserror::Error;

/// Result type alias for kanban-sync operations
pub type Result<T> = std::result::Result<T, KanbanSyncError>;

/// Error type for kanban-sync operations
#[derive(Error, Debug)]
pub enum KanbanSyncError {
    /// Configuration errors (missing file, unreadable values)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Sync configuration failed validation
    #[error("Invalid sync configuration: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// Remote tracker call failed
    #[error(transparent)]
    Tracker(#[from] TrackerError),

    /// Another pass is already running on this engine
    #[error("A sync pass is already in progress")]
    SyncInProgress,

    /// Conflict id is not known to the engine
    #[error("Conflict not found: {0}")]
    ConflictNotFound(String),

    /// Conflict already carries a resolution
    #[error("Conflict already resolved: {0}")]
    ConflictAlreadyResolved(String),

    /// Board-side mutation failed
    #[error("Board error: {0}")]
    Board(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl KanbanSyncError {
    /// Whether this error came from the remote side
    pub fn is_remote(&self) -> bool {
        matches!(self, KanbanSyncError::Tracker(_) | KanbanSyncError::Http(_))
    }
}

impl RetryableError for KanbanSyncError {
    fn retry_decision(&self) -> RetryDecision {
        match self {
            KanbanSyncError::Tracker(e) => e.retry_decision(),
            KanbanSyncError::Http(e) => {
                if e.is_connect() || e.is_timeout() {
                    RetryDecision::Retry
                } else {
                    RetryDecision::NoRetry
                }
            }
            _ => RetryDecision::NoRetry,
        }
    }
}
