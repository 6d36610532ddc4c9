//! Configuration system
//!
//! One [`SyncConfig`] per board/repository pairing, loaded from YAML:
//! - Target repository (or all repositories)
//! - Column mappings (column <-> labels <-> issue state)
//! - Auto sync interval and last sync timestamp
//! - Conflict strategy and deletion policies

mod sync_config;
pub mod validation;

pub use sync_config::{
    ColumnMapping, ConflictStrategy, RepositoryTarget, SyncConfig, MAX_SYNC_INTERVAL_SECS,
};
pub use validation::{validate_config, ValidationIssue, ValidationReport};
