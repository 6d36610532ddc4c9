//! Conflict state kept between runs
//!
//! The CLI builds a fresh engine for every command, so pending conflicts and
//! the decisions recorded for them are kept in a JSON file next to the config
//! and restored into the engine before each pass.

use super::conflict::SyncConflict;
use crate::Result;
use std::fs;
use std::path::{Path, PathBuf};

/// File name used next to the config file
pub const CONFLICT_FILE_NAME: &str = "conflicts.json";

/// JSON file holding pending conflicts and unapplied decisions
#[derive(Debug, Clone)]
pub struct ConflictFile {
    path: PathBuf,
}

impl ConflictFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `conflicts.json` in the directory of `config_path`
    pub fn beside(config_path: &Path) -> Self {
        let dir = config_path.parent().unwrap_or_else(|| Path::new("."));
        Self::new(dir.join(CONFLICT_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored conflicts; empty when the file does not exist yet
    pub fn load(&self) -> Result<Vec<SyncConflict>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        tracing::debug!(path = %self.path.display(), "Loading conflict state");
        let content = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Replace the stored conflicts; an empty list removes the file
    pub fn save(&self, conflicts: &[SyncConflict]) -> Result<()> {
        if conflicts.is_empty() {
            if self.path.exists() {
                fs::remove_file(&self.path)?;
            }
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(conflicts)?)?;
        Ok(())
    }
}
