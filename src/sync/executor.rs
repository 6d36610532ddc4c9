//! Operation executor
//!
//! Applies a diffed operation list, one operation at a time and in order.
//! Remote effects go through the [`IssueTracker`], board effects through the
//! caller's [`BoardMutator`]. A failed operation is recorded and the rest of
//! the list still runs.

use super::conflict::{
    ConflictKind, ConflictResolution, FieldValue, ResolutionStrategy, ResolvedBy, SyncConflict,
};
use super::diff::embed_marker;
use super::engine::EngineOptions;
use super::metrics;
use super::operation::{OperationPayload, OperationStatus, SyncOperation};
use super::status::{SyncError, SyncStatusStore};
use crate::board::{BoardMutator, Card, CardUpdate, NewCard};
use crate::tracker::retry::{with_retry, CallKind};
use crate::tracker::{IssuePatch, IssueState, IssueTracker, TrackerError, TrackerResult};
use crate::{KanbanSyncError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Single verdict for an executed operation list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassOutcome {
    Success,
    PartialSuccess,
    Failure,
}

impl PassOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::PartialSuccess => "partial_success",
            Self::Failure => "failure",
        }
    }
}

/// What happened while executing an operation list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub completed: usize,
    pub failed: usize,
    /// Left pending because the pass was cancelled
    pub skipped: usize,
    pub cancelled: bool,
    pub errors: Vec<SyncError>,
    /// Set when the pass fully succeeded and `last_sync` moved forward
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<DateTime<Utc>>,
}

impl ExecutionReport {
    pub fn outcome(&self) -> PassOutcome {
        if self.failed == 0 && self.skipped == 0 {
            PassOutcome::Success
        } else if self.completed > 0 {
            PassOutcome::PartialSuccess
        } else {
            PassOutcome::Failure
        }
    }
}

/// Run one tracker call under the per-call timeout and the retry policy
pub(crate) async fn bounded_call<T, F, Fut>(
    options: &EngineOptions,
    name: &str,
    kind: CallKind,
    mut call: F,
) -> TrackerResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = TrackerResult<T>>,
{
    let limit = options.call_timeout;
    let result = with_retry(&options.retry, name, kind, || {
        let fut = call();
        async move {
            match tokio::time::timeout(limit, fut).await {
                Ok(result) => result,
                Err(_) => Err(TrackerError::timeout(limit)),
            }
        }
    })
    .await;

    if let Err(ref e) = result {
        metrics::record_api_error(e.class.as_str(), name);
    }
    result
}

pub struct OperationExecutor<'a> {
    tracker: &'a dyn IssueTracker,
    mutator: &'a dyn BoardMutator,
    status: &'a SyncStatusStore,
    options: &'a EngineOptions,
    cancel: &'a AtomicBool,
}

impl<'a> OperationExecutor<'a> {
    pub fn new(
        tracker: &'a dyn IssueTracker,
        mutator: &'a dyn BoardMutator,
        status: &'a SyncStatusStore,
        options: &'a EngineOptions,
        cancel: &'a AtomicBool,
    ) -> Self {
        Self {
            tracker,
            mutator,
            status,
            options,
            cancel,
        }
    }

    /// Execute every pending operation in list order
    pub async fn execute(&self, operations: &mut [SyncOperation]) -> ExecutionReport {
        let mut report = ExecutionReport::default();

        for op in operations.iter_mut() {
            if op.status != OperationStatus::Pending {
                continue;
            }
            if self.cancel.load(Ordering::SeqCst) {
                report.cancelled = true;
                report.skipped += 1;
                continue;
            }

            op.start();
            debug!(op_id = %op.id, kind = %op.kind, card_id = ?op.card_id, number = ?op.issue_number, "Executing operation");

            let result = match self.dispatch(&op.payload).await {
                Ok(Some(number)) => {
                    op.set_issue_number(number);
                    self.close_created(&op.payload, number).await.map(|_| Some(number))
                }
                other => other,
            };

            match result {
                Ok(_) => {
                    op.complete();
                    self.status.record_operation(op.kind);
                    metrics::record_operation(op.kind.as_str(), "completed");
                    report.completed += 1;
                }
                Err(e) => {
                    warn!(op_id = %op.id, kind = %op.kind, error = %e, "Operation failed");
                    op.fail(e.to_string());
                    metrics::record_operation(op.kind.as_str(), "failed");

                    let error = SyncError::api(format!("{} failed: {}", op.kind, e))
                        .with_card(op.card_id.clone())
                        .with_issue(op.issue_number)
                        .with_operation(&op.id);
                    self.status.push_error(error.clone());
                    report.errors.push(error);
                    report.failed += 1;
                }
            }
        }

        if report.cancelled {
            info!(skipped = report.skipped, "Execution cancelled, remaining operations left pending");
        }
        report
    }

    /// Perform one operation; returns the issue number it touched or produced
    async fn dispatch(&self, payload: &OperationPayload) -> Result<Option<u64>> {
        match payload {
            OperationPayload::CreateCard { column_id, card } => {
                let created = self.mutator.apply_card_create(column_id, card).await?;
                self.mark_issue(&created, card).await;
                Ok(Some(card.issue_number))
            }
            OperationPayload::UpdateCard { card_id, update } => {
                self.mutator.apply_card_update(card_id, update).await?;
                Ok(update.issue_number)
            }
            OperationPayload::DeleteCard { card_id, .. } => {
                self.mutator.apply_card_delete(card_id).await?;
                Ok(None)
            }
            OperationPayload::CreateIssue {
                card_id,
                repository,
                draft,
                ..
            } => {
                let issue = bounded_call(self.options, "create_issue", CallKind::Write, || {
                    self.tracker.create_issue(repository, draft)
                })
                .await?;
                info!(card_id = %card_id, number = issue.number, repo = %repository, "Created issue");

                self.mutator
                    .apply_card_update(card_id, &CardUpdate::link(issue.number, repository.clone()))
                    .await?;
                Ok(Some(issue.number))
            }
            OperationPayload::UpdateIssue {
                repository,
                number,
                patch,
                ..
            } => {
                bounded_call(self.options, "update_issue", CallKind::Write, || {
                    self.tracker.update_issue(repository, *number, patch)
                })
                .await?;
                Ok(Some(*number))
            }
            OperationPayload::CloseIssue {
                repository, number, ..
            } => {
                let patch = IssuePatch::state(IssueState::Closed);
                bounded_call(self.options, "close_issue", CallKind::Write, || {
                    self.tracker.update_issue(repository, *number, &patch)
                })
                .await?;
                Ok(Some(*number))
            }
        }
    }

    /// Close an issue just created for a card in a closed column
    ///
    /// Issues are always created open. When the close fails the operation
    /// fails too, and a decided state conflict is left for the next pass so it
    /// closes the issue instead of raising a conflict over it.
    async fn close_created(&self, payload: &OperationPayload, number: u64) -> Result<()> {
        let OperationPayload::CreateIssue {
            card_id,
            repository,
            state: Some(IssueState::Closed),
            ..
        } = payload
        else {
            return Ok(());
        };

        let patch = IssuePatch::state(IssueState::Closed);
        let result = bounded_call(self.options, "close_issue", CallKind::Write, || {
            self.tracker.update_issue(repository, number, &patch)
        })
        .await;

        if let Err(e) = result {
            warn!(number, error = %e, "Created issue could not be closed");
            let mut pending = SyncConflict::new(
                card_id.as_str(),
                number,
                ConflictKind::StateMismatch,
                FieldValue::State(IssueState::Closed),
                FieldValue::State(IssueState::Open),
            );
            pending.resolution = Some(ConflictResolution::new(
                ResolutionStrategy::UseLocal,
                Some(FieldValue::State(IssueState::Closed)),
                ResolvedBy::Automatic,
            ));
            self.status.record_decision(pending);
            return Err(KanbanSyncError::Other(format!(
                "issue #{} created but not closed: {}",
                number, e
            )));
        }
        Ok(())
    }

    /// Write the new card's marker into its issue so later passes can pair them
    /// even if the link is lost
    async fn mark_issue(&self, created: &Card, card: &NewCard) {
        let patch = IssuePatch {
            body: Some(embed_marker(&card.description, &created.id)),
            ..Default::default()
        };
        if let Err(e) = bounded_call(self.options, "update_issue", CallKind::Write, || {
            self.tracker.update_issue(&card.repository, card.issue_number, &patch)
        })
        .await
        {
            warn!(card_id = %created.id, number = card.issue_number, error = %e, "Could not mark issue with card id");
            self.status.push_error(
                SyncError::api(format!("Card marker not written to issue #{}: {}", card.issue_number, e))
                    .with_card(Some(created.id.clone()))
                    .with_issue(Some(card.issue_number)),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome() {
        let report = ExecutionReport::default();
        assert_eq!(report.outcome(), PassOutcome::Success);

        let report = ExecutionReport {
            completed: 2,
            failed: 1,
            ..Default::default()
        };
        assert_eq!(report.outcome(), PassOutcome::PartialSuccess);

        let report = ExecutionReport {
            failed: 1,
            ..Default::default()
        };
        assert_eq!(report.outcome(), PassOutcome::Failure);

        let report = ExecutionReport {
            completed: 1,
            skipped: 3,
            cancelled: true,
            ..Default::default()
        };
        assert_eq!(report.outcome(), PassOutcome::PartialSuccess);
    }

    #[tokio::test]
    async fn test_bounded_call_times_out() {
        let options = EngineOptions::default()
            .with_call_timeout(std::time::Duration::from_millis(20))
            .with_retry(crate::tracker::retry::RetryConfig::none());

        let result: TrackerResult<()> = bounded_call(&options, "list_issues", CallKind::Read, || async {
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.class, crate::tracker::ErrorClass::Network);
        assert!(err.message.contains("timed out"));
    }
}
