//! Conflict classification
//!
//! A linked pair whose card and issue both changed since the last pass yields
//! one [`SyncConflict`] per differing field. The classifier settles each one
//! according to the configured [`ConflictStrategy`], or by a decision the user
//! recorded for the same conflict, or leaves it open.

use crate::config::ConflictStrategy;
use crate::tracker::IssueState;
use crate::{KanbanSyncError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Which field diverged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    TitleMismatch,
    DescriptionMismatch,
    StateMismatch,
    LabelMismatch,
}

impl ConflictKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TitleMismatch => "title_mismatch",
            Self::DescriptionMismatch => "description_mismatch",
            Self::StateMismatch => "state_mismatch",
            Self::LabelMismatch => "label_mismatch",
        }
    }

    /// Whether `value` has the shape this field holds
    pub fn accepts(&self, value: &FieldValue) -> bool {
        matches!(
            (self, value),
            (Self::TitleMismatch | Self::DescriptionMismatch, FieldValue::Text(_))
                | (Self::StateMismatch, FieldValue::State(_))
                | (Self::LabelMismatch, FieldValue::Labels(_))
        )
    }
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value of one side of a conflict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    State(IssueState),
    Labels(BTreeSet<String>),
}

impl FieldValue {
    /// Parse user input as a value for `kind`
    ///
    /// Text fields take the input as is, states accept `open` or `closed`,
    /// labels are comma separated.
    pub fn parse(kind: ConflictKind, input: &str) -> Result<Self> {
        match kind {
            ConflictKind::TitleMismatch | ConflictKind::DescriptionMismatch => {
                Ok(Self::Text(input.to_string()))
            }
            ConflictKind::StateMismatch => match input.trim().to_ascii_lowercase().as_str() {
                "open" => Ok(Self::State(IssueState::Open)),
                "closed" => Ok(Self::State(IssueState::Closed)),
                other => Err(KanbanSyncError::Validation(vec![format!(
                    "'{}' is not an issue state (expected open or closed)",
                    other
                )])),
            },
            ConflictKind::LabelMismatch => Ok(Self::Labels(
                input
                    .split(',')
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string)
                    .collect(),
            )),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => write!(f, "{:?}", text),
            Self::State(state) => f.write_str(state.as_str()),
            Self::Labels(labels) => {
                let labels: Vec<&str> = labels.iter().map(String::as_str).collect();
                write!(f, "[{}]", labels.join(", "))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    UseLocal,
    UseRemote,
    Merge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolvedBy {
    User,
    Automatic,
}

/// Decision taken for a conflict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictResolution {
    pub strategy: ResolutionStrategy,
    /// Required for `merge`; filled in from the conflict otherwise
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<FieldValue>,
    pub resolved_at: DateTime<Utc>,
    pub resolved_by: ResolvedBy,
}

impl ConflictResolution {
    pub fn new(strategy: ResolutionStrategy, value: Option<FieldValue>, by: ResolvedBy) -> Self {
        Self {
            strategy,
            value,
            resolved_at: Utc::now(),
            resolved_by: by,
        }
    }

    pub fn use_local() -> Self {
        Self::new(ResolutionStrategy::UseLocal, None, ResolvedBy::User)
    }

    pub fn use_remote() -> Self {
        Self::new(ResolutionStrategy::UseRemote, None, ResolvedBy::User)
    }

    pub fn merge(value: FieldValue) -> Self {
        Self::new(ResolutionStrategy::Merge, Some(value), ResolvedBy::User)
    }
}

/// Both sides changed the same field to different values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConflict {
    pub id: String,
    pub card_id: String,
    pub issue_number: u64,
    pub kind: ConflictKind,
    pub local_value: FieldValue,
    pub remote_value: FieldValue,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<ConflictResolution>,
}

impl SyncConflict {
    pub fn new(
        card_id: impl Into<String>,
        issue_number: u64,
        kind: ConflictKind,
        local_value: FieldValue,
        remote_value: FieldValue,
    ) -> Self {
        let card_id = card_id.into();
        Self {
            id: conflict_id(&card_id, issue_number, kind),
            card_id,
            issue_number,
            kind,
            local_value,
            remote_value,
            timestamp: Utc::now(),
            resolution: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }

    /// Same conflict with the same values on both sides
    pub fn same_divergence(&self, other: &SyncConflict) -> bool {
        self.id == other.id
            && self.local_value == other.local_value
            && self.remote_value == other.remote_value
    }

    /// Check a decision against this conflict and fill in its value
    pub fn prepare_resolution(&self, resolution: ConflictResolution) -> Result<ConflictResolution> {
        let value = match (resolution.strategy, resolution.value.clone()) {
            (ResolutionStrategy::Merge, None) => {
                return Err(KanbanSyncError::Validation(vec![format!(
                    "Conflict {}: merge needs a resolved value",
                    self.id
                )]))
            }
            (_, Some(value)) => value,
            (ResolutionStrategy::UseLocal, None) => self.local_value.clone(),
            (ResolutionStrategy::UseRemote, None) => self.remote_value.clone(),
        };

        if !self.kind.accepts(&value) {
            return Err(KanbanSyncError::Validation(vec![format!(
                "Conflict {}: value {} does not fit a {}",
                self.id, value, self.kind
            )]));
        }

        Ok(ConflictResolution {
            value: Some(value),
            ..resolution
        })
    }

    /// Values to write, as (remote side, local side)
    pub fn writes(&self) -> (Option<&FieldValue>, Option<&FieldValue>) {
        let Some(ref resolution) = self.resolution else {
            return (None, None);
        };
        match resolution.strategy {
            ResolutionStrategy::UseLocal => {
                (Some(resolution.value.as_ref().unwrap_or(&self.local_value)), None)
            }
            ResolutionStrategy::UseRemote => {
                (None, Some(resolution.value.as_ref().unwrap_or(&self.remote_value)))
            }
            ResolutionStrategy::Merge => {
                let value = resolution.value.as_ref().unwrap_or(&self.local_value);
                (Some(value), Some(value))
            }
        }
    }
}

/// `<card>#<issue>/<kind>`, stable across passes
pub fn conflict_id(card_id: &str, issue_number: u64, kind: ConflictKind) -> String {
    format!("{}#{}/{}", card_id, issue_number, kind.as_str())
}

/// Settles conflicts by strategy or by recorded user decisions
#[derive(Debug)]
pub struct ConflictClassifier<'a> {
    strategy: ConflictStrategy,
    decisions: &'a HashMap<String, SyncConflict>,
}

impl<'a> ConflictClassifier<'a> {
    pub fn new(strategy: ConflictStrategy, decisions: &'a HashMap<String, SyncConflict>) -> Self {
        Self {
            strategy,
            decisions,
        }
    }

    /// Attach a resolution when one applies
    ///
    /// A recorded user decision wins as long as neither side moved since it was
    /// taken. Otherwise `remote_wins`/`local_wins` resolve automatically and
    /// `manual` leaves the conflict open.
    pub fn classify(&self, mut conflict: SyncConflict) -> SyncConflict {
        if let Some(decided) = self.decisions.get(&conflict.id) {
            if decided.is_resolved() && decided.same_divergence(&conflict) {
                tracing::debug!(conflict = %conflict.id, "Applying recorded resolution");
                conflict.resolution = decided.resolution.clone();
                return conflict;
            }
        }

        conflict.resolution = match self.strategy {
            ConflictStrategy::RemoteWins => Some(ConflictResolution::new(
                ResolutionStrategy::UseRemote,
                Some(conflict.remote_value.clone()),
                ResolvedBy::Automatic,
            )),
            ConflictStrategy::LocalWins => Some(ConflictResolution::new(
                ResolutionStrategy::UseLocal,
                Some(conflict.local_value.clone()),
                ResolvedBy::Automatic,
            )),
            ConflictStrategy::Manual => None,
        };
        conflict
    }
}
