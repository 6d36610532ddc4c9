//! kanban-sync - Bidirectional Kanban board <-> issue tracker sync
//!
//! Main entry point for the kanban-sync CLI.

use anyhow::{bail, Context};
use clap::{ArgGroup, Parser, Subcommand};
use kanban_sync::board::{Board, FileBoardStore};
use kanban_sync::config::{ColumnMapping, ConflictStrategy, SyncConfig};
use kanban_sync::sync::{
    AutoSync, ConflictFile, ConflictResolution, FieldValue, FileBoardSource, SchedulerCommand,
    SchedulerEvent, SyncConflict, SyncEngine, SyncOperation,
};
use kanban_sync::KanbanSyncError;
use kanban_sync::tracker::{GitHubTracker, IssueState, RepoRef};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

/// kanban-sync - Keep a Kanban board and an issue tracker in step
#[derive(Parser, Debug)]
#[command(name = "kanban-sync")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to sync config (default: ~/.config/kanban-sync/config.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Path to the board JSON file (default: ~/.config/kanban-sync/board.json)
    #[arg(short, long, global = true)]
    board: Option<PathBuf>,

    /// Tracker API token
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,

    /// Enable debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a sample sync configuration
    Init {
        /// Repository to sync with (owner/name)
        repo: String,

        /// Overwrite an existing config file
        #[arg(short, long)]
        force: bool,
    },

    /// Check the configuration against the board and the tracker
    Validate,

    /// Show what a sync would do without changing anything
    Diff {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Run one sync pass
    Sync {
        /// Output the pass report in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Record a decision for a pending conflict, applied by the next sync
    #[command(group(
        ArgGroup::new("decision")
            .required(true)
            .args(["use_local", "use_remote", "merge"])
    ))]
    Resolve {
        /// Conflict id as printed by 'diff' or 'sync'
        conflict_id: String,

        /// Keep the board's value
        #[arg(long)]
        use_local: bool,

        /// Keep the tracker's value
        #[arg(long)]
        use_remote: bool,

        /// Write this value to both sides (labels are comma separated)
        #[arg(long, value_name = "VALUE")]
        merge: Option<String>,
    },

    /// Sync on the configured interval until interrupted
    Watch,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    if let Err(e) = kanban_sync::logging::init_with_level(level) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli.config.clone().unwrap_or_else(SyncConfig::default_path);
    let board_path = cli.board.clone().unwrap_or_else(|| {
        config_path
            .parent()
            .map(|dir| dir.join("board.json"))
            .unwrap_or_else(|| PathBuf::from("board.json"))
    });

    if let Commands::Init { ref repo, force } = cli.command {
        return handle_init(&config_path, repo, force);
    }

    let config = SyncConfig::load(&config_path).with_context(|| {
        format!(
            "No usable configuration at {}. Run 'kanban-sync init <owner/name>' first.",
            config_path.display()
        )
    })?;

    let mut tracker = GitHubTracker::new(&config.tracker_url)?;
    if let Some(token) = cli.token {
        tracker = tracker.with_token(token);
    }
    if !tracker.is_authenticated() {
        tracing::warn!("No tracker token set, requests are unauthenticated");
    }
    let engine = Arc::new(SyncEngine::new(Arc::new(tracker)));
    let conflict_file = ConflictFile::beside(&config_path);

    match cli.command {
        Commands::Init { .. } => Ok(()),
        Commands::Validate => {
            let board = FileBoardStore::load(&board_path)?;
            handle_validate(&engine, &board, &config).await
        }
        Commands::Diff { json } => {
            let board = FileBoardStore::load(&board_path)?;
            let stored = conflict_file.load()?;
            engine.restore_conflicts(stored.clone())?;
            let result = engine.sync_board(&board, &config).await?;

            // Keep recorded decisions for the next sync and add what is new
            if result.success {
                let mut kept: Vec<SyncConflict> =
                    stored.into_iter().filter(|c| c.is_resolved()).collect();
                for conflict in result.unresolved_conflicts() {
                    if !kept.iter().any(|k| k.id == conflict.id) {
                        kept.push(conflict.clone());
                    }
                }
                conflict_file.save(&kept)?;
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
                return Ok(());
            }
            if let Some(ref error) = result.error {
                bail!("Diff failed: {}", error);
            }
            print_operations(&result.operations);
            print_conflicts(result.unresolved_conflicts());
            Ok(())
        }
        Commands::Sync { json } => {
            let store = FileBoardStore::open(&board_path)?;
            let board = store.snapshot().await;
            engine.restore_conflicts(conflict_file.load()?)?;
            let report = engine.run_pass(&board, &config, &store).await?;
            conflict_file.save(&engine.status().conflicts)?;

            if let Some(at) = report.execution.as_ref().and_then(|e| e.synced_at) {
                let mut config = config.clone();
                config.last_sync = Some(at);
                config.save(&config_path)?;
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
                return Ok(());
            }
            if let Some(ref error) = report.result.error {
                bail!("Sync failed: {}", error);
            }

            print_operations(&report.result.operations);
            print_conflicts(report.result.unresolved_conflicts());
            if let Some(ref execution) = report.execution {
                println!();
                println!(
                    "Completed: {}  Failed: {}  Outcome: {}",
                    execution.completed,
                    execution.failed,
                    execution.outcome().as_str()
                );
                for error in &execution.errors {
                    println!("  ✗ {}", error.message);
                }
            }
            Ok(())
        }
        Commands::Resolve {
            conflict_id,
            use_local,
            merge,
            ..
        } => handle_resolve(&engine, &conflict_file, &conflict_id, use_local, merge),
        Commands::Watch => handle_watch(engine, config_path, board_path).await,
    }
}

fn handle_init(config_path: &Path, repo: &str, force: bool) -> anyhow::Result<()> {
    if config_path.exists() && !force {
        bail!(
            "Config already exists at {} (use --force to overwrite)",
            config_path.display()
        );
    }

    let repo: RepoRef = repo.parse()?;
    let config = SyncConfig::for_repo(repo)
        .with_mapping(ColumnMapping::new("todo", ["todo"]).with_title("To Do"))
        .with_mapping(ColumnMapping::new("doing", ["in-progress"]).with_title("In Progress"))
        .with_mapping(
            ColumnMapping::new("done", ["done"])
                .with_title("Done")
                .with_state(IssueState::Closed),
        )
        .with_strategy(ConflictStrategy::Manual);
    config.save(config_path)?;

    println!("✓ Wrote sample configuration to {}", config_path.display());
    println!("  Edit the column mappings to match your board, then run 'kanban-sync validate'.");
    Ok(())
}

fn handle_resolve(
    engine: &SyncEngine,
    conflict_file: &ConflictFile,
    conflict_id: &str,
    use_local: bool,
    merge: Option<String>,
) -> anyhow::Result<()> {
    engine.restore_conflicts(conflict_file.load()?)?;

    let resolution = match merge {
        Some(value) => {
            let kind = engine
                .status()
                .conflicts
                .iter()
                .find(|c| c.id == conflict_id)
                .map(|c| c.kind)
                .ok_or_else(|| KanbanSyncError::ConflictNotFound(conflict_id.to_string()))?;
            ConflictResolution::merge(FieldValue::parse(kind, &value)?)
        }
        None if use_local => ConflictResolution::use_local(),
        None => ConflictResolution::use_remote(),
    };

    engine.resolve_conflict(conflict_id, resolution)?;
    conflict_file.save(&engine.status().conflicts)?;

    println!("✓ Recorded decision for {}", conflict_id);
    println!("  Run 'kanban-sync sync' to apply it.");
    Ok(())
}

async fn handle_validate(
    engine: &SyncEngine,
    board: &Board,
    config: &SyncConfig,
) -> anyhow::Result<()> {
    let report = engine.validate_sync_config(board, config).await;

    for warning in &report.warnings {
        println!("  ⚠ {}", warning);
    }
    for error in &report.errors {
        println!("  ✗ {}", error);
    }

    if !report.valid {
        bail!("Configuration is invalid ({} errors)", report.errors.len());
    }
    println!("✓ Configuration is valid");
    Ok(())
}

async fn handle_watch(
    engine: Arc<SyncEngine>,
    config_path: PathBuf,
    board_path: PathBuf,
) -> anyhow::Result<()> {
    let source = FileBoardSource::open(config_path, board_path)?;
    let mut scheduler = AutoSync::new(engine, source);
    let mut events = scheduler.subscribe();
    let commands = scheduler.command_sender();

    let handle = tokio::spawn(async move { scheduler.run().await });

    println!("Watching for changes, press Ctrl-C to stop");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                let _ = commands.send(SchedulerCommand::Shutdown).await;
                break;
            }
            event = events.recv() => match event {
                Ok(SchedulerEvent::PassCompleted { operations, failed, conflicts, .. }) => {
                    println!(
                        "Pass finished: {} operations, {} failed, {} conflicts pending",
                        operations, failed, conflicts
                    );
                }
                Ok(SchedulerEvent::Skipped { reason }) => println!("Skipped: {}", reason),
                Ok(SchedulerEvent::Error { message }) => eprintln!("Error: {}", message),
                Ok(SchedulerEvent::Stopped) => break,
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(missed = n, "Dropped scheduler events");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    handle.await??;
    Ok(())
}

fn print_operations(operations: &[SyncOperation]) {
    if operations.is_empty() {
        println!("Board and tracker are in sync");
        return;
    }

    println!("Operations: {}", operations.len());
    for op in operations {
        let card = op.card_id.as_deref().unwrap_or("-");
        match op.issue_number {
            Some(number) => println!("  {:<14} card {}  issue #{}", op.kind, card, number),
            None => println!("  {:<14} card {}", op.kind, card),
        }
    }
}

fn print_conflicts<'a>(conflicts: impl Iterator<Item = &'a SyncConflict>) {
    let conflicts: Vec<_> = conflicts.collect();
    if conflicts.is_empty() {
        return;
    }

    println!();
    println!("Conflicts needing a decision: {}", conflicts.len());
    for conflict in conflicts {
        println!("  {} ({})", conflict.id, conflict.kind.as_str());
        println!("    local:  {}", conflict.local_value);
        println!("    remote: {}", conflict.remote_value);
    }
    println!();
    println!("Decide with 'kanban-sync resolve <id> --use-local | --use-remote | --merge <value>'");
}
