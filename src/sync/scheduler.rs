//! Automatic sync scheduler
//!
//! Runs passes on the configured interval as a tokio event loop. The board,
//! config and stored conflict decisions are reloaded from a [`BoardSource`]
//! before every pass, so edits made between passes are picked up. Control goes
//! through a command channel, progress is published on a broadcast channel.

use super::conflict::SyncConflict;
use super::decisions::ConflictFile;
use super::engine::{PassReport, SyncEngine};
use crate::board::{Board, BoardMutator, FileBoardStore};
use crate::config::{SyncConfig, MAX_SYNC_INTERVAL_SECS};
use crate::{KanbanSyncError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;

/// Default event channel capacity
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Where the scheduler gets its board and config from
#[async_trait]
pub trait BoardSource: Send + Sync {
    async fn load_board(&self) -> Result<Board>;

    async fn load_config(&self) -> Result<SyncConfig>;

    /// Persist the end of a successful pass as the new `last_sync`
    async fn record_last_sync(&self, at: DateTime<Utc>) -> Result<()>;

    /// Conflicts and decisions stored outside the engine, if any
    ///
    /// `None` keeps whatever the engine already holds.
    async fn load_conflicts(&self) -> Result<Option<Vec<SyncConflict>>> {
        Ok(None)
    }

    async fn save_conflicts(&self, _conflicts: &[SyncConflict]) -> Result<()> {
        Ok(())
    }

    fn mutator(&self) -> &dyn BoardMutator;
}

/// Board JSON file plus sync config YAML file, with conflict state kept in a
/// [`ConflictFile`] next to the config
pub struct FileBoardSource {
    config_path: PathBuf,
    store: FileBoardStore,
    conflicts: ConflictFile,
}

impl FileBoardSource {
    pub fn open(config_path: impl Into<PathBuf>, board_path: impl AsRef<Path>) -> Result<Self> {
        let config_path = config_path.into();
        Ok(Self {
            conflicts: ConflictFile::beside(&config_path),
            config_path,
            store: FileBoardStore::open(board_path)?,
        })
    }

    pub fn store(&self) -> &FileBoardStore {
        &self.store
    }
}

#[async_trait]
impl BoardSource for FileBoardSource {
    async fn load_board(&self) -> Result<Board> {
        self.store.reload().await
    }

    async fn load_config(&self) -> Result<SyncConfig> {
        SyncConfig::load(&self.config_path)
    }

    async fn record_last_sync(&self, at: DateTime<Utc>) -> Result<()> {
        let mut config = SyncConfig::load(&self.config_path)?;
        config.last_sync = Some(at);
        config.save(&self.config_path)
    }

    async fn load_conflicts(&self) -> Result<Option<Vec<SyncConflict>>> {
        self.conflicts.load().map(Some)
    }

    async fn save_conflicts(&self, conflicts: &[SyncConflict]) -> Result<()> {
        self.conflicts.save(conflicts)
    }

    fn mutator(&self) -> &dyn BoardMutator {
        &self.store
    }
}

/// Events emitted by the scheduler
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    Started,
    Stopped,
    PassStarted,
    PassCompleted {
        operations: usize,
        failed: usize,
        conflicts: usize,
        synced_at: Option<DateTime<Utc>>,
    },
    /// A tick did not run a pass
    Skipped { reason: String },
    Error { message: String },
}

/// Commands accepted by a running scheduler
#[derive(Debug, Clone)]
pub enum SchedulerCommand {
    /// Run a pass now, regardless of the interval
    SyncNow,
    Shutdown,
}

/// Interval-driven pass runner
pub struct AutoSync<S: BoardSource> {
    engine: Arc<SyncEngine>,
    source: S,
    event_tx: broadcast::Sender<SchedulerEvent>,
    command_tx: mpsc::Sender<SchedulerCommand>,
    command_rx: Option<mpsc::Receiver<SchedulerCommand>>,
}

impl<S: BoardSource> AutoSync<S> {
    pub fn new(engine: Arc<SyncEngine>, source: S) -> Self {
        let (event_tx, _) = broadcast::channel(DEFAULT_EVENT_CHANNEL_CAPACITY);
        let (command_tx, command_rx) = mpsc::channel(10);
        Self {
            engine,
            source,
            event_tx,
            command_tx,
            command_rx: Some(command_rx),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.event_tx.subscribe()
    }

    pub fn command_sender(&self) -> mpsc::Sender<SchedulerCommand> {
        self.command_tx.clone()
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    fn send_event(&self, event: SchedulerEvent) {
        if self.event_tx.send(event).is_err() {
            tracing::trace!("Event sent but no receivers subscribed");
        }
    }

    /// Run until a `Shutdown` command arrives
    ///
    /// The interval is read from the config once at start; `auto_sync` and
    /// `enabled` are re-checked on every tick.
    pub async fn run(&mut self) -> Result<()> {
        let mut command_rx = self
            .command_rx
            .take()
            .ok_or_else(|| KanbanSyncError::Config("Scheduler already running".to_string()))?;

        let period = self.source.load_config().await?.sync_interval();
        if period == Duration::ZERO {
            return Err(KanbanSyncError::Config(
                "sync_interval_secs must be greater than 0".to_string(),
            ));
        }
        if period.as_secs() > MAX_SYNC_INTERVAL_SECS {
            return Err(KanbanSyncError::Config(format!(
                "sync_interval_secs must be at most {}",
                MAX_SYNC_INTERVAL_SECS
            )));
        }

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(interval_secs = period.as_secs(), "Auto sync started");
        self.send_event(SchedulerEvent::Started);

        loop {
            tokio::select! {
                _ = interval.tick() => self.tick().await,
                cmd = command_rx.recv() => match cmd {
                    Some(SchedulerCommand::SyncNow) => self.run_logged().await,
                    Some(SchedulerCommand::Shutdown) | None => {
                        tracing::info!("Auto sync shutting down");
                        break;
                    }
                },
            }
        }

        self.send_event(SchedulerEvent::Stopped);
        Ok(())
    }

    async fn tick(&self) {
        match self.source.load_config().await {
            Ok(config) if !config.enabled || !config.auto_sync => {
                self.send_event(SchedulerEvent::Skipped {
                    reason: "auto sync is disabled".to_string(),
                });
            }
            Ok(_) => self.run_logged().await,
            Err(e) => {
                tracing::warn!(error = %e, "Could not load sync configuration");
                self.send_event(SchedulerEvent::Error {
                    message: e.to_string(),
                });
            }
        }
    }

    async fn run_logged(&self) {
        match self.run_once().await {
            Ok(_) => {}
            Err(KanbanSyncError::SyncInProgress) => {
                self.send_event(SchedulerEvent::Skipped {
                    reason: "a pass is already running".to_string(),
                });
            }
            Err(e) => {
                tracing::error!(error = %e, "Sync pass failed");
                self.send_event(SchedulerEvent::Error {
                    message: e.to_string(),
                });
            }
        }
    }

    /// Load, diff, execute and record `last_sync` once
    pub async fn run_once(&self) -> Result<PassReport> {
        let config = self.source.load_config().await?;
        let board = self.source.load_board().await?;
        if let Some(conflicts) = self.source.load_conflicts().await? {
            self.engine.restore_conflicts(conflicts)?;
        }

        self.send_event(SchedulerEvent::PassStarted);
        let report = self
            .engine
            .run_pass(&board, &config, self.source.mutator())
            .await?;
        self.source
            .save_conflicts(&self.engine.status().conflicts)
            .await?;

        let synced_at = report.execution.as_ref().and_then(|e| e.synced_at);
        if let Some(at) = synced_at {
            self.source.record_last_sync(at).await?;
        }
        if let Some(ref error) = report.result.error {
            self.send_event(SchedulerEvent::Error {
                message: error.clone(),
            });
        }

        self.send_event(SchedulerEvent::PassCompleted {
            operations: report.result.operations.len(),
            failed: report.execution.as_ref().map_or(0, |e| e.failed),
            conflicts: report.result.unresolved_conflicts().count(),
            synced_at,
        });
        Ok(report)
    }
}
