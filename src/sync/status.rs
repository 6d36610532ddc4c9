//! Sync status store
//!
//! State owned by one engine: current pass phase, last/next sync times, the
//! error log, running statistics and the conflicts awaiting a decision.
//! Readers always get a cloned snapshot taken under the read lock.

use super::conflict::{ConflictResolution, SyncConflict};
use super::operation::OperationKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Oldest entries are dropped once the error log grows past this
const MAX_ERRORS: usize = 500;

/// Where a pass currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    #[default]
    Idle,
    Diffing,
    /// Diff finished with unresolved manual conflicts
    ConflictsPending,
    Executing,
}

impl SyncPhase {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Diffing | Self::Executing)
    }
}

/// Accumulated counters, reset only by `reset_session`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    pub cards_created: u64,
    pub cards_updated: u64,
    pub cards_deleted: u64,
    pub issues_created: u64,
    pub issues_updated: u64,
    pub conflicts_detected: u64,
    pub conflicts_resolved: u64,
}

impl SyncStats {
    /// Count one completed operation
    pub fn record(&mut self, kind: OperationKind) {
        match kind {
            OperationKind::CreateCard => self.cards_created += 1,
            OperationKind::UpdateCard => self.cards_updated += 1,
            OperationKind::DeleteCard => self.cards_deleted += 1,
            OperationKind::CreateIssue => self.issues_created += 1,
            OperationKind::UpdateIssue | OperationKind::CloseIssue => self.issues_updated += 1,
        }
    }

    pub fn total_operations(&self) -> u64 {
        self.cards_created
            + self.cards_updated
            + self.cards_deleted
            + self.issues_created
            + self.issues_updated
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncErrorKind {
    ApiError,
    Conflict,
    ValidationError,
}

/// Entry in the status error log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncError {
    pub kind: SyncErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl SyncError {
    pub fn new(kind: SyncErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            card_id: None,
            issue_number: None,
            operation_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn api(message: impl Into<String>) -> Self {
        Self::new(SyncErrorKind::ApiError, message)
    }

    pub fn with_card(mut self, card_id: Option<String>) -> Self {
        self.card_id = card_id;
        self
    }

    pub fn with_issue(mut self, issue_number: Option<u64>) -> Self {
        self.issue_number = issue_number;
        self
    }

    pub fn with_operation(mut self, operation_id: impl Into<String>) -> Self {
        self.operation_id = Some(operation_id.into());
        self
    }
}

/// Snapshot of engine state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub phase: SyncPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_sync: Option<DateTime<Utc>>,
    pub errors: Vec<SyncError>,
    pub stats: SyncStats,
    /// Conflicts from the latest diff that still need a decision, plus user
    /// decisions not yet applied by a pass
    pub conflicts: Vec<SyncConflict>,
}

impl SyncStatus {
    pub fn is_active(&self) -> bool {
        self.phase.is_active()
    }

    pub fn unresolved_conflicts(&self) -> impl Iterator<Item = &SyncConflict> {
        self.conflicts.iter().filter(|c| c.resolution.is_none())
    }
}

/// Lock-guarded [`SyncStatus`]
#[derive(Debug, Default)]
pub struct SyncStatusStore {
    inner: RwLock<SyncStatus>,
}

impl SyncStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    // A poisoned lock only means a writer panicked mid-update; the status is
    // plain data, so keep serving it.
    fn read(&self) -> RwLockReadGuard<'_, SyncStatus> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, SyncStatus> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> SyncStatus {
        self.read().clone()
    }

    pub fn phase(&self) -> SyncPhase {
        self.read().phase
    }

    pub fn stats(&self) -> SyncStats {
        self.read().stats
    }

    pub fn set_phase(&self, phase: SyncPhase) {
        self.write().phase = phase;
    }

    pub fn record_operation(&self, kind: OperationKind) {
        self.write().stats.record(kind);
    }

    pub fn record_conflicts(&self, detected: u64, resolved: u64) {
        let mut status = self.write();
        status.stats.conflicts_detected += detected;
        status.stats.conflicts_resolved += resolved;
    }

    pub fn push_error(&self, error: SyncError) {
        let mut status = self.write();
        status.errors.push(error);
        if status.errors.len() > MAX_ERRORS {
            let excess = status.errors.len() - MAX_ERRORS;
            status.errors.drain(..excess);
        }
    }

    /// Replace the pending conflict list after a diff
    pub fn set_conflicts(&self, conflicts: Vec<SyncConflict>) {
        self.write().conflicts = conflicts;
    }

    /// Keep a decided conflict for the next pass to apply, replacing any
    /// entry with the same id
    pub fn record_decision(&self, conflict: SyncConflict) {
        let mut status = self.write();
        status.conflicts.retain(|c| c.id != conflict.id);
        status.conflicts.push(conflict);
    }

    pub fn conflict(&self, id: &str) -> Option<SyncConflict> {
        self.read().conflicts.iter().find(|c| c.id == id).cloned()
    }

    /// Attach a resolution to a pending conflict; false if the id is unknown
    pub fn resolve_conflict(&self, id: &str, resolution: ConflictResolution) -> bool {
        let mut status = self.write();
        match status.conflicts.iter_mut().find(|c| c.id == id) {
            Some(conflict) => {
                conflict.resolution = Some(resolution);
                true
            }
            None => false,
        }
    }

    /// Mark a pass as finished successfully
    pub fn complete_pass(&self, at: DateTime<Utc>, next: Option<DateTime<Utc>>) {
        let mut status = self.write();
        status.last_sync = Some(at);
        status.next_sync = next;
    }

    pub fn set_next_sync(&self, next: Option<DateTime<Utc>>) {
        self.write().next_sync = next;
    }

    /// Drop the error log; stats and conflicts are kept
    pub fn clear_errors(&self) {
        self.write().errors.clear();
    }

    /// Start a fresh reporting session
    pub fn reset_session(&self) {
        self.write().stats = SyncStats::default();
    }
}
