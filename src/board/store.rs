//! JSON file board store
//!
//! Loads a board from a JSON file and persists every mutation back to it.
//! Every mutation re-reads the file first, so edits made by other programs
//! between mutations survive. Used by the CLI; embedders usually supply their
//! own [`BoardMutator`].

use super::{Board, BoardMutator, Card, CardUpdate, NewCard};
use crate::Result;
use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Board persisted as a JSON file
pub struct FileBoardStore {
    path: PathBuf,
    board: Mutex<Board>,
}

impl FileBoardStore {
    /// Open an existing board file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let board = Self::load(&path)?;
        Ok(Self {
            path,
            board: Mutex::new(board),
        })
    }

    /// Read a board file without keeping a store around
    pub fn load(path: impl AsRef<Path>) -> Result<Board> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(crate::KanbanSyncError::Config(format!(
                "Board file not found: {}",
                path.display()
            )));
        }

        tracing::debug!(path = %path.display(), "Loading board");
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Write a board file, creating parent directories as needed
    pub fn save(path: impl AsRef<Path>, board: &Board) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(board)?)?;
        Ok(())
    }

    /// Current in-memory board
    pub async fn snapshot(&self) -> Board {
        self.board.lock().await.clone()
    }

    /// Re-read the file, replacing the in-memory board
    pub async fn reload(&self) -> Result<Board> {
        let mut board = self.board.lock().await;
        *board = Self::load(&self.path)?;
        Ok(board.clone())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Short random card id
fn new_card_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("card-{}", &id[..8])
}

#[async_trait]
impl BoardMutator for FileBoardStore {
    async fn apply_card_update(&self, card_id: &str, update: &CardUpdate) -> Result<()> {
        let mut board = self.board.lock().await;
        *board = Self::load(&self.path)?;
        board.apply_update(card_id, update)?;
        Self::save(&self.path, &board)
    }

    async fn apply_card_create(&self, column_id: &str, card: &NewCard) -> Result<Card> {
        let mut board = self.board.lock().await;
        *board = Self::load(&self.path)?;
        let card = card.clone().into_card(new_card_id());
        board.insert_card(column_id, card.clone())?;
        Self::save(&self.path, &board)?;
        Ok(card)
    }

    async fn apply_card_delete(&self, card_id: &str) -> Result<()> {
        let mut board = self.board.lock().await;
        *board = Self::load(&self.path)?;
        board.remove_card(card_id)?;
        Self::save(&self.path, &board)
    }
}
