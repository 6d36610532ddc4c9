//! Board data model
//!
//! The board is owned by the caller. The engine reads a snapshot of it and
//! proposes changes that are applied through a [`BoardMutator`].

pub mod store;

use crate::tracker::RepoRef;
use crate::{KanbanSyncError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub use store::FileBoardStore;

/// A card on the board
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub labels: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    /// Linked remote issue number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_number: Option<u64>,
    /// Repository of the linked issue; required when syncing against all repositories
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<RepoRef>,
    /// Last local modification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Card {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            labels: BTreeSet::new(),
            assignee: None,
            issue_number: None,
            repository: None,
            updated_at: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.insert(label.into());
        self
    }

    pub fn with_issue(mut self, number: u64) -> Self {
        self.issue_number = Some(number);
        self
    }

    pub fn with_repository(mut self, repo: RepoRef) -> Self {
        self.repository = Some(repo);
        self
    }

    pub fn with_updated_at(mut self, at: DateTime<Utc>) -> Self {
        self.updated_at = Some(at);
        self
    }

    /// Whether the card was edited after `since`; cards without a timestamp count as unchanged
    pub fn changed_since(&self, since: DateTime<Utc>) -> bool {
        self.updated_at.map(|at| at > since).unwrap_or(false)
    }
}

/// A board column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub cards: Vec<Card>,
}

impl Column {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            color: String::new(),
            cards: Vec::new(),
        }
    }

    pub fn with_card(mut self, card: Card) -> Self {
        self.cards.push(card);
        self
    }
}

/// Ordered columns of cards
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Board {
    pub columns: Vec<Column>,
}

impl Board {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn column(&self, id: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.id == id)
    }

    /// All cards with the id of the column holding them, in board order
    pub fn cards(&self) -> impl Iterator<Item = (&Column, &Card)> {
        self.columns
            .iter()
            .flat_map(|col| col.cards.iter().map(move |card| (col, card)))
    }

    pub fn find_card(&self, card_id: &str) -> Option<(&Column, &Card)> {
        self.cards().find(|(_, card)| card.id == card_id)
    }

    /// Apply an update in place, moving the card if the column changes
    pub fn apply_update(&mut self, card_id: &str, update: &CardUpdate) -> Result<()> {
        let (col_idx, card_idx) = self
            .position(card_id)
            .ok_or_else(|| KanbanSyncError::Board(format!("Card not found: {}", card_id)))?;

        let mut card = self.columns[col_idx].cards.remove(card_idx);
        update.apply_to(&mut card);

        let target = match update.column_id {
            Some(ref column_id) => self
                .columns
                .iter()
                .position(|c| &c.id == column_id)
                .ok_or_else(|| KanbanSyncError::Board(format!("Column not found: {}", column_id))),
            None => Ok(col_idx),
        };

        match target {
            Ok(idx) if idx == col_idx => self.columns[idx].cards.insert(card_idx, card),
            Ok(idx) => self.columns[idx].cards.push(card),
            Err(e) => {
                self.columns[col_idx].cards.insert(card_idx, card);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Append a card to a column
    pub fn insert_card(&mut self, column_id: &str, card: Card) -> Result<()> {
        let column = self
            .columns
            .iter_mut()
            .find(|c| c.id == column_id)
            .ok_or_else(|| KanbanSyncError::Board(format!("Column not found: {}", column_id)))?;
        column.cards.push(card);
        Ok(())
    }

    pub fn remove_card(&mut self, card_id: &str) -> Result<Card> {
        let (col_idx, card_idx) = self
            .position(card_id)
            .ok_or_else(|| KanbanSyncError::Board(format!("Card not found: {}", card_id)))?;
        Ok(self.columns[col_idx].cards.remove(card_idx))
    }

    fn position(&self, card_id: &str) -> Option<(usize, usize)> {
        self.columns.iter().enumerate().find_map(|(ci, col)| {
            col.cards
                .iter()
                .position(|card| card.id == card_id)
                .map(|pos| (ci, pos))
        })
    }
}

/// Fields for a card created from a remote issue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCard {
    pub title: String,
    pub description: String,
    pub labels: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    pub issue_number: u64,
    pub repository: RepoRef,
}

impl NewCard {
    /// Materialize with a fresh id
    pub fn into_card(self, id: impl Into<String>) -> Card {
        Card {
            id: id.into(),
            title: self.title,
            description: self.description,
            labels: self.labels,
            assignee: self.assignee,
            issue_number: Some(self.issue_number),
            repository: Some(self.repository),
            updated_at: Some(Utc::now()),
        }
    }
}

/// Partial card update; `None` fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeSet<String>>,
    /// Move the card to this column
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<RepoRef>,
}

impl CardUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.labels.is_none()
            && self.column_id.is_none()
            && self.issue_number.is_none()
            && self.repository.is_none()
    }

    /// Update that only records the link to a remote issue
    pub fn link(number: u64, repository: RepoRef) -> Self {
        Self {
            issue_number: Some(number),
            repository: Some(repository),
            ..Default::default()
        }
    }

    /// Copy the set fields onto a card (column moves are handled by the board)
    pub fn apply_to(&self, card: &mut Card) {
        if let Some(ref title) = self.title {
            card.title = title.clone();
        }
        if let Some(ref description) = self.description {
            card.description = description.clone();
        }
        if let Some(ref labels) = self.labels {
            card.labels = labels.clone();
        }
        if let Some(number) = self.issue_number {
            card.issue_number = Some(number);
        }
        if let Some(ref repo) = self.repository {
            card.repository = Some(repo.clone());
        }
        card.updated_at = Some(Utc::now());
    }
}

/// Board-side effects requested by the executor
///
/// Implementations are not assumed to be idempotent: the executor calls each
/// method at most once per operation.
#[async_trait]
pub trait BoardMutator: Send + Sync {
    async fn apply_card_update(&self, card_id: &str, update: &CardUpdate) -> Result<()>;

    async fn apply_card_create(&self, column_id: &str, card: &NewCard) -> Result<Card>;

    async fn apply_card_delete(&self, card_id: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board() -> Board {
        Board::new(vec![
            Column::new("todo", "To Do")
                .with_card(Card::new("c1", "First"))
                .with_card(Card::new("c2", "Second")),
            Column::new("done", "Done"),
        ])
    }

    #[test]
    fn test_find_card() {
        let board = board();
        let (col, card) = board.find_card("c2").unwrap();
        assert_eq!(col.id, "todo");
        assert_eq!(card.title, "Second");
        assert!(board.find_card("missing").is_none());
    }

    #[test]
    fn test_apply_update_moves_card() {
        let mut board = board();
        let update = CardUpdate {
            title: Some("Renamed".to_string()),
            column_id: Some("done".to_string()),
            ..Default::default()
        };
        board.apply_update("c1", &update).unwrap();

        let (col, card) = board.find_card("c1").unwrap();
        assert_eq!(col.id, "done");
        assert_eq!(card.title, "Renamed");
        assert!(card.updated_at.is_some());
        assert_eq!(board.column("todo").unwrap().cards.len(), 1);
    }

    #[test]
    fn test_apply_update_unknown_column_keeps_card() {
        let mut board = board();
        let update = CardUpdate {
            column_id: Some("nope".to_string()),
            ..Default::default()
        };
        assert!(board.apply_update("c2", &update).is_err());
        assert_eq!(board.column("todo").unwrap().cards[1].id, "c2");
    }

    #[test]
    fn test_changed_since() {
        let now = Utc::now();
        let card = Card::new("c", "t");
        assert!(!card.changed_since(now));
        let card = card.with_updated_at(now + chrono::Duration::seconds(5));
        assert!(card.changed_since(now));
    }
}
