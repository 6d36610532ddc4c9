//! kanban-sync - Bidirectional Kanban board <-> issue tracker synchronization
//!
//! Keeps a locally owned board (columns of cards) consistent with a remote
//! issue tracker (issues carrying labels and open/closed state).
//!
//! # Architecture
//!
//! - **board**: Board data model, card mutations and the JSON file store
//! - **config**: Sync configuration (YAML) and validation
//! - **tracker**: Remote tracker trait, GitHub client and retry policy
//! - **sync**: Mapping, diffing, conflicts, execution, status and scheduling

pub mod board;
pub mod config;
pub mod error;
pub mod logging;
pub mod sync;
pub mod tracker;

// Re-exports
pub use error::{KanbanSyncError, Result};
pub use sync::{SyncEngine, SyncResult};
