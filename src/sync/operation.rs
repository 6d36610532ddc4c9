//! Proposed mutations
//!
//! The diff engine emits [`SyncOperation`]s, the executor consumes them. Each
//! operation carries a payload typed by its kind, so an `update_issue` cannot
//! be missing its issue number.

use crate::board::{CardUpdate, NewCard};
use crate::tracker::{IssueDraft, IssuePatch, IssueState, RepoRef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    CreateCard,
    UpdateCard,
    DeleteCard,
    CreateIssue,
    UpdateIssue,
    CloseIssue,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateCard => "create_card",
            Self::UpdateCard => "update_card",
            Self::DeleteCard => "delete_card",
            Self::CreateIssue => "create_issue",
            Self::UpdateIssue => "update_issue",
            Self::CloseIssue => "close_issue",
        }
    }

    /// Execution phase: creates, then updates, then closes/deletes
    pub fn phase(&self) -> u8 {
        match self {
            Self::CreateCard | Self::CreateIssue => 0,
            Self::UpdateCard | Self::UpdateIssue => 1,
            Self::DeleteCard | Self::CloseIssue => 2,
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Self::CreateIssue | Self::UpdateIssue | Self::CloseIssue)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// What an operation does, keyed by kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationPayload {
    CreateCard {
        column_id: String,
        card: NewCard,
    },
    UpdateCard {
        card_id: String,
        update: CardUpdate,
    },
    DeleteCard {
        card_id: String,
        issue_number: u64,
    },
    CreateIssue {
        card_id: String,
        repository: RepoRef,
        draft: IssueDraft,
        /// Close right after creation when the column maps to a closed state
        #[serde(default, skip_serializing_if = "Option::is_none")]
        state: Option<IssueState>,
    },
    UpdateIssue {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        card_id: Option<String>,
        repository: RepoRef,
        number: u64,
        patch: IssuePatch,
    },
    CloseIssue {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        card_id: Option<String>,
        repository: RepoRef,
        number: u64,
    },
}

impl OperationPayload {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::CreateCard { .. } => OperationKind::CreateCard,
            Self::UpdateCard { .. } => OperationKind::UpdateCard,
            Self::DeleteCard { .. } => OperationKind::DeleteCard,
            Self::CreateIssue { .. } => OperationKind::CreateIssue,
            Self::UpdateIssue { .. } => OperationKind::UpdateIssue,
            Self::CloseIssue { .. } => OperationKind::CloseIssue,
        }
    }

    pub fn card_id(&self) -> Option<&str> {
        match self {
            Self::CreateCard { .. } => None,
            Self::UpdateCard { card_id, .. }
            | Self::DeleteCard { card_id, .. }
            | Self::CreateIssue { card_id, .. } => Some(card_id),
            Self::UpdateIssue { card_id, .. } | Self::CloseIssue { card_id, .. } => {
                card_id.as_deref()
            }
        }
    }

    pub fn issue_number(&self) -> Option<u64> {
        match self {
            Self::CreateCard { card, .. } => Some(card.issue_number),
            Self::UpdateCard { update, .. } => update.issue_number,
            Self::DeleteCard { issue_number, .. } => Some(*issue_number),
            Self::CreateIssue { .. } => None,
            Self::UpdateIssue { number, .. } | Self::CloseIssue { number, .. } => Some(*number),
        }
    }
}

/// Lifecycle of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// One proposed mutation and its execution state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOperation {
    pub id: String,
    pub kind: OperationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_number: Option<u64>,
    pub payload: OperationPayload,
    pub status: OperationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl SyncOperation {
    pub fn new(payload: OperationPayload) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: payload.kind(),
            card_id: payload.card_id().map(str::to_string),
            issue_number: payload.issue_number(),
            payload,
            status: OperationStatus::Pending,
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// `pending -> in_progress`; returns false if the operation already ran
    pub fn start(&mut self) -> bool {
        if self.status != OperationStatus::Pending {
            return false;
        }
        self.status = OperationStatus::InProgress;
        self.timestamp = Utc::now();
        true
    }

    pub fn complete(&mut self) {
        if self.status == OperationStatus::InProgress {
            self.status = OperationStatus::Completed;
            self.timestamp = Utc::now();
        }
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        if self.status == OperationStatus::InProgress {
            self.status = OperationStatus::Failed;
            self.error = Some(error.into());
            self.timestamp = Utc::now();
        }
    }

    /// Record the issue number a create produced
    pub fn set_issue_number(&mut self, number: u64) {
        if !self.status.is_terminal() {
            self.issue_number = Some(number);
        }
    }
}

/// Stable sort into execution phases
pub fn order_operations(operations: &mut [SyncOperation]) {
    operations.sort_by_key(|op| op.kind.phase());
}
