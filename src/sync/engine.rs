//! Sync engine facade
//!
//! One [`SyncEngine`] per board/config pair. It owns the status store and the
//! single-pass guard, fetches the remote snapshot, runs the diff and hands the
//! resulting operations to the executor.

use super::conflict::{ConflictResolution, ResolvedBy, SyncConflict};
use super::diff::DiffEngine;
use super::executor::{bounded_call, ExecutionReport, OperationExecutor, PassOutcome};
use super::metrics;
use super::operation::SyncOperation;
use super::status::{SyncError, SyncPhase, SyncStats, SyncStatus, SyncStatusStore};
use crate::board::{Board, BoardMutator};
use crate::config::{validate_config, RepositoryTarget, SyncConfig, ValidationIssue, ValidationReport};
use crate::tracker::retry::{CallKind, RetryConfig};
use crate::tracker::{Issue, IssueFilter, IssueTracker, RepoRef, StateFilter, TrackerResult};
use crate::{KanbanSyncError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Default per-call timeout for tracker requests
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Default issue page size
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Upper bound on pages fetched per repository
pub const DEFAULT_MAX_PAGES: u32 = 50;

/// Engine tuning
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Timeout applied to each tracker call attempt
    pub call_timeout: Duration,

    /// Retry policy for tracker calls
    pub retry: RetryConfig,

    /// Issues requested per page
    pub page_size: u32,

    /// Pages fetched per repository before giving up on the rest
    pub max_pages: u32,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            retry: RetryConfig::default(),
            page_size: DEFAULT_PAGE_SIZE,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }
}

impl EngineOptions {
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }
}

/// Result of diffing a board against the remote side
#[derive(Debug, Clone, Serialize)]
pub struct SyncResult {
    /// False when the remote snapshot could not be fetched
    pub success: bool,
    pub operations: Vec<SyncOperation>,
    /// Every conflict found, including the ones settled automatically
    pub conflicts: Vec<SyncConflict>,
    /// Cumulative session statistics
    pub stats: SyncStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the remote snapshot was taken
    pub started_at: DateTime<Utc>,
}

impl SyncResult {
    fn failed(error: String, stats: SyncStats, started_at: DateTime<Utc>) -> Self {
        Self {
            success: false,
            operations: Vec::new(),
            conflicts: Vec::new(),
            stats,
            error: Some(error),
            started_at,
        }
    }

    pub fn unresolved_conflicts(&self) -> impl Iterator<Item = &SyncConflict> {
        self.conflicts.iter().filter(|c| !c.is_resolved())
    }

    pub fn has_changes(&self) -> bool {
        !self.operations.is_empty()
    }
}

/// Diff plus execution, as run by [`SyncEngine::run_pass`]
#[derive(Debug, Clone, Serialize)]
pub struct PassReport {
    pub result: SyncResult,
    /// `None` when the diff failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionReport>,
}

/// Reconciles one board with one remote tracker configuration
pub struct SyncEngine {
    tracker: Arc<dyn IssueTracker>,
    options: EngineOptions,
    status: SyncStatusStore,
    pass_guard: tokio::sync::Mutex<()>,
    cancel: AtomicBool,
    /// Snapshot time of the latest diff, becomes `last_sync` on success
    snapshot_at: Mutex<Option<DateTime<Utc>>>,
    /// Conflict ids already counted since `last_sync`, and whether they were
    /// counted as resolved
    counted: Mutex<HashMap<String, bool>>,
}

impl SyncEngine {
    pub fn new(tracker: Arc<dyn IssueTracker>) -> Self {
        Self::with_options(tracker, EngineOptions::default())
    }

    pub fn with_options(tracker: Arc<dyn IssueTracker>, options: EngineOptions) -> Self {
        Self {
            tracker,
            options,
            status: SyncStatusStore::new(),
            pass_guard: tokio::sync::Mutex::new(()),
            cancel: AtomicBool::new(false),
            snapshot_at: Mutex::new(None),
            counted: Mutex::new(HashMap::new()),
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Snapshot of the current status
    pub fn status(&self) -> SyncStatus {
        self.status.snapshot()
    }

    pub fn is_syncing(&self) -> bool {
        self.status.phase().is_active()
    }

    /// Diff the board against the remote side without executing anything
    pub async fn sync_board(&self, board: &Board, config: &SyncConfig) -> Result<SyncResult> {
        let _guard = self
            .pass_guard
            .try_lock()
            .map_err(|_| KanbanSyncError::SyncInProgress)?;
        let result = self.diff_locked(board, config).await;
        self.cancel.store(false, Ordering::SeqCst);
        result
    }

    /// Execute operations produced by [`SyncEngine::sync_board`]
    pub async fn execute_operations(
        &self,
        operations: &mut [SyncOperation],
        board: &Board,
        config: &SyncConfig,
        mutator: &dyn BoardMutator,
    ) -> Result<ExecutionReport> {
        let _guard = self
            .pass_guard
            .try_lock()
            .map_err(|_| KanbanSyncError::SyncInProgress)?;
        let report = self.execute_locked(operations, board, config, mutator).await;
        self.cancel.store(false, Ordering::SeqCst);
        report
    }

    /// Diff and execute as one pass
    pub async fn run_pass(
        &self,
        board: &Board,
        config: &SyncConfig,
        mutator: &dyn BoardMutator,
    ) -> Result<PassReport> {
        let _guard = self
            .pass_guard
            .try_lock()
            .map_err(|_| KanbanSyncError::SyncInProgress)?;
        let report = self.pass_locked(board, config, mutator).await;
        self.cancel.store(false, Ordering::SeqCst);
        report
    }

    async fn pass_locked(
        &self,
        board: &Board,
        config: &SyncConfig,
        mutator: &dyn BoardMutator,
    ) -> Result<PassReport> {
        let mut result = self.diff_locked(board, config).await?;
        if !result.success {
            return Ok(PassReport {
                result,
                execution: None,
            });
        }

        let execution = self
            .execute_locked(&mut result.operations, board, config, mutator)
            .await?;
        result.stats = self.status.stats();
        Ok(PassReport {
            result,
            execution: Some(execution),
        })
    }

    /// Load conflicts and decisions kept from an earlier run
    ///
    /// Replaces the pending conflict list; fails while a pass is running.
    pub fn restore_conflicts(&self, conflicts: Vec<SyncConflict>) -> Result<()> {
        let _guard = self
            .pass_guard
            .try_lock()
            .map_err(|_| KanbanSyncError::SyncInProgress)?;

        let pending = conflicts.iter().filter(|c| !c.is_resolved()).count();
        self.status.set_conflicts(conflicts);
        metrics::set_pending_conflicts(pending);
        self.status.set_phase(if pending > 0 {
            SyncPhase::ConflictsPending
        } else {
            SyncPhase::Idle
        });
        Ok(())
    }

    /// Record a user decision for a pending conflict
    ///
    /// The decision is applied by the next pass, provided neither side changed
    /// the field again in the meantime.
    pub fn resolve_conflict(&self, conflict_id: &str, resolution: ConflictResolution) -> Result<()> {
        let conflict = self
            .status
            .conflict(conflict_id)
            .ok_or_else(|| KanbanSyncError::ConflictNotFound(conflict_id.to_string()))?;
        if conflict.is_resolved() {
            return Err(KanbanSyncError::ConflictAlreadyResolved(conflict_id.to_string()));
        }

        let resolution = conflict.prepare_resolution(ConflictResolution {
            resolved_by: ResolvedBy::User,
            ..resolution
        })?;
        info!(conflict = %conflict_id, strategy = ?resolution.strategy, "Conflict resolved by user");
        self.status.resolve_conflict(conflict_id, resolution);

        let pending = self.status.snapshot().unresolved_conflicts().count();
        metrics::set_pending_conflicts(pending);
        if pending == 0 && self.status.phase() == SyncPhase::ConflictsPending {
            self.status.set_phase(SyncPhase::Idle);
        }
        Ok(())
    }

    /// Drop the error log
    pub fn clear_errors(&self) {
        self.status.clear_errors();
    }

    /// Start a fresh statistics session
    pub fn reset_session(&self) {
        self.status.reset_session();
        self.counted.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Stop the running pass after the current operation
    ///
    /// Has no effect when no pass is running.
    pub fn cancel(&self) {
        if self.pass_guard.try_lock().is_ok() {
            debug!("No pass running, cancel ignored");
            return;
        }
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Structural validation plus a reachability check against the tracker
    pub async fn validate_sync_config(&self, board: &Board, config: &SyncConfig) -> ValidationReport {
        let mut report = validate_config(config, board);
        if !report.valid {
            return report;
        }

        match config.repository {
            RepositoryTarget::Single(ref repo) => {
                match bounded_call(&self.options, "list_labels", CallKind::Read, || {
                    self.tracker.list_labels(repo)
                })
                .await
                {
                    Ok(labels) => {
                        let existing: HashSet<&str> = labels.iter().map(|l| l.name.as_str()).collect();
                        for mapping in &config.mappings {
                            for label in &mapping.labels {
                                if !existing.contains(label.as_str()) {
                                    let mut issue = ValidationIssue::new(
                                        "mappings.labels",
                                        format!("Label '{}' does not exist in {} yet", label, repo),
                                    );
                                    issue.column = Some(mapping.column_id.clone());
                                    report.push_warning(issue);
                                }
                            }
                        }
                    }
                    Err(e) => report.push_error(ValidationIssue::new(
                        "repository",
                        format!("Repository {} is not reachable: {}", repo, e),
                    )),
                }
            }
            RepositoryTarget::All => {
                if let Err(e) = bounded_call(&self.options, "list_repositories", CallKind::Read, || {
                    self.tracker.list_repositories()
                })
                .await
                {
                    report.push_error(ValidationIssue::new(
                        "repository",
                        format!("Repositories could not be listed: {}", e),
                    ));
                }
            }
        }

        report
    }

    async fn diff_locked(&self, board: &Board, config: &SyncConfig) -> Result<SyncResult> {
        let validation = validate_config(config, board);
        if !validation.valid {
            return Err(KanbanSyncError::Validation(validation.error_messages()));
        }

        let clock = Instant::now();
        let started_at = Utc::now();
        self.status.set_phase(SyncPhase::Diffing);
        info!(repository = %config.repository, strategy = ?config.conflict_strategy, "Diffing board");

        let issues = match self.fetch_issues(board, config).await {
            Ok(issues) => issues,
            Err(e) => {
                error!(error = %e, "Failed to fetch remote issues");
                self.status
                    .push_error(SyncError::api(format!("Failed to fetch remote issues: {}", e)));
                self.status.set_phase(SyncPhase::Idle);
                metrics::record_pass_duration(
                    PassOutcome::Failure.as_str(),
                    clock.elapsed().as_secs_f64(),
                );
                return Ok(SyncResult::failed(e.to_string(), self.status.stats(), started_at));
            }
        };

        let previous = self.status.snapshot().conflicts;
        let decisions: HashMap<String, SyncConflict> = previous
            .iter()
            .filter(|c| c.is_resolved())
            .map(|c| (c.id.clone(), c.clone()))
            .collect();

        let outcome = DiffEngine::new(config, &decisions).diff(board, &issues);

        let (detected, resolved) = self.count_conflicts(&previous, &outcome.conflicts);
        for conflict in &outcome.conflicts {
            let resolution = match conflict.resolution {
                Some(ref r) if r.resolved_by == ResolvedBy::User => "user",
                Some(_) => "automatic",
                None => "pending",
            };
            metrics::record_conflict(conflict.kind.as_str(), resolution);
        }
        self.status.record_conflicts(detected, resolved);

        let unresolved: Vec<SyncConflict> = outcome.unresolved().cloned().collect();
        metrics::set_pending_conflicts(unresolved.len());
        let phase = if unresolved.is_empty() {
            SyncPhase::Idle
        } else {
            SyncPhase::ConflictsPending
        };
        self.status.set_conflicts(unresolved);
        self.status.set_phase(phase);
        *self.snapshot_at.lock().unwrap_or_else(|e| e.into_inner()) = Some(started_at);

        info!(
            issues = issues.len(),
            operations = outcome.operations.len(),
            conflicts = outcome.conflicts.len(),
            "Diff finished"
        );

        Ok(SyncResult {
            success: true,
            operations: outcome.operations,
            conflicts: outcome.conflicts,
            stats: self.status.stats(),
            error: None,
            started_at,
        })
    }

    /// New detections and new resolutions among `conflicts`
    ///
    /// A conflict seen again before `last_sync` moves is the same conflict and
    /// is counted once, as is its resolution.
    fn count_conflicts(&self, previous: &[SyncConflict], conflicts: &[SyncConflict]) -> (u64, u64) {
        let mut counted = self.counted.lock().unwrap_or_else(|e| e.into_inner());
        let (mut detected, mut resolved) = (0, 0);
        for conflict in conflicts {
            let was_resolved = match counted.get(&conflict.id) {
                Some(was_resolved) => *was_resolved,
                None if previous.iter().any(|c| c.id == conflict.id) => false,
                None => {
                    detected += 1;
                    false
                }
            };
            if conflict.is_resolved() && !was_resolved {
                resolved += 1;
            }
            counted.insert(conflict.id.clone(), was_resolved || conflict.is_resolved());
        }
        (detected, resolved)
    }

    async fn execute_locked(
        &self,
        operations: &mut [SyncOperation],
        board: &Board,
        config: &SyncConfig,
        mutator: &dyn BoardMutator,
    ) -> Result<ExecutionReport> {
        let validation = validate_config(config, board);
        if !validation.valid {
            return Err(KanbanSyncError::Validation(validation.error_messages()));
        }

        let start = Instant::now();
        self.status.set_phase(SyncPhase::Executing);

        let executor = OperationExecutor::new(
            self.tracker.as_ref(),
            mutator,
            &self.status,
            &self.options,
            &self.cancel,
        );
        let mut report = executor.execute(operations).await;

        let pending = self.status.snapshot().unresolved_conflicts().count();
        let outcome = report.outcome();
        if outcome == PassOutcome::Success && pending == 0 {
            let synced_at = self
                .snapshot_at
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .take()
                .unwrap_or_else(Utc::now);
            self.status
                .complete_pass(synced_at, config.next_sync_at(Some(synced_at)));
            self.counted.lock().unwrap_or_else(|e| e.into_inner()).clear();
            report.synced_at = Some(synced_at);
        } else if outcome != PassOutcome::Success {
            warn!(
                failed = report.failed,
                skipped = report.skipped,
                "Pass did not complete cleanly, last sync time left unchanged"
            );
        }

        self.status.set_phase(if pending > 0 {
            SyncPhase::ConflictsPending
        } else {
            SyncPhase::Idle
        });
        metrics::record_pass_duration(outcome.as_str(), start.elapsed().as_secs_f64());

        info!(
            completed = report.completed,
            failed = report.failed,
            outcome = outcome.as_str(),
            "Execution finished"
        );
        Ok(report)
    }

    /// Every issue, open and closed, in the repositories this pass covers
    async fn fetch_issues(&self, board: &Board, config: &SyncConfig) -> TrackerResult<Vec<Issue>> {
        let repos: Vec<RepoRef> = match config.repository {
            RepositoryTarget::Single(ref repo) => {
                let mut repos = BTreeSet::from([repo.clone()]);
                repos.extend(board.cards().filter_map(|(_, card)| card.repository.clone()));
                repos.into_iter().collect()
            }
            RepositoryTarget::All => {
                bounded_call(&self.options, "list_repositories", CallKind::Read, || {
                    self.tracker.list_repositories()
                })
                .await?
            }
        };

        let mut issues = Vec::new();
        for repo in &repos {
            issues.extend(self.fetch_repo_issues(repo).await?);
        }
        Ok(issues)
    }

    async fn fetch_repo_issues(&self, repo: &RepoRef) -> TrackerResult<Vec<Issue>> {
        let mut issues = Vec::new();
        let mut page = 1;
        loop {
            let filter = IssueFilter {
                state: StateFilter::All,
                page,
                per_page: self.options.page_size,
            };
            let batch = bounded_call(&self.options, "list_issues", CallKind::Read, || {
                self.tracker.list_issues(repo, &filter)
            })
            .await?;

            let count = batch.len();
            issues.extend(batch);
            if count < self.options.page_size as usize {
                break;
            }
            if page >= self.options.max_pages {
                warn!(repo = %repo, pages = page, "Issue listing truncated at page limit");
                break;
            }
            page += 1;
        }
        Ok(issues)
    }
}
