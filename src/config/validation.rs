//! Sync configuration validation
//!
//! Structural checks that need no network access:
//! - Mappings reference columns that exist on the board
//! - No column is mapped twice, no mapping has an empty label set
//! - Repository references are usable for the chosen target mode
//!
//! Repository reachability is checked by the engine on top of this.

use super::sync_config::{RepositoryTarget, SyncConfig, MAX_SYNC_INTERVAL_SECS};
use crate::board::Board;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};

/// One validation finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    /// Column id the finding refers to, if any
    pub column: Option<String>,
    pub field: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            column: None,
            field: field.into(),
            message: message.into(),
        }
    }

    fn for_column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref column) = self.column {
            write!(f, "[{}] {}: {}", column, self.field, self.message)
        } else {
            write!(f, "{}: {}", self.field, self.message)
        }
    }
}

/// Outcome of validating a config against a board
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    fn from_findings(errors: Vec<ValidationIssue>, warnings: Vec<ValidationIssue>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    pub fn push_error(&mut self, issue: ValidationIssue) {
        self.errors.push(issue);
        self.valid = false;
    }

    pub fn push_warning(&mut self, issue: ValidationIssue) {
        self.warnings.push(issue);
    }

    /// Error messages, for `KanbanSyncError::Validation`
    pub fn error_messages(&self) -> Vec<String> {
        self.errors.iter().map(ToString::to_string).collect()
    }
}

/// Validate a sync configuration against the board it will run on
pub fn validate_config(config: &SyncConfig, board: &Board) -> ValidationReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if !config.enabled {
        errors.push(ValidationIssue::new("enabled", "Sync is disabled"));
    }

    if let RepositoryTarget::Single(ref repo) = config.repository {
        if repo.owner.trim().is_empty() || repo.name.trim().is_empty() {
            errors.push(ValidationIssue::new(
                "repository",
                "Repository owner and name must not be empty",
            ));
        }
    }

    if config.auto_sync && config.sync_interval_secs == 0 {
        errors.push(ValidationIssue::new(
            "sync_interval_secs",
            "Interval must be greater than 0 when auto sync is enabled",
        ));
    }
    if config.sync_interval_secs > MAX_SYNC_INTERVAL_SECS {
        errors.push(ValidationIssue::new(
            "sync_interval_secs",
            format!(
                "Interval of {}s exceeds the maximum of {}s",
                config.sync_interval_secs, MAX_SYNC_INTERVAL_SECS
            ),
        ));
    }

    if config.mappings.is_empty() {
        errors.push(ValidationIssue::new(
            "mappings",
            "At least one column mapping must be defined",
        ));
    }

    let mut seen_columns = HashSet::new();
    let mut seen_label_sets: Vec<(&BTreeSet<String>, &str)> = Vec::new();
    for mapping in &config.mappings {
        let id = mapping.column_id.as_str();

        if !seen_columns.insert(id) {
            errors.push(
                ValidationIssue::new("mappings", "Column is mapped more than once").for_column(id),
            );
        }

        match board.column(id) {
            None => errors.push(
                ValidationIssue::new(
                    "mappings.column_id",
                    format!("Mapping references unknown column '{}'", id),
                )
                .for_column(id),
            ),
            Some(column) => {
                if !mapping.column_title.is_empty() && mapping.column_title != column.title {
                    warnings.push(
                        ValidationIssue::new(
                            "mappings.column_title",
                            format!(
                                "Mapping title '{}' differs from column title '{}'",
                                mapping.column_title, column.title
                            ),
                        )
                        .for_column(id),
                    );
                }
            }
        }

        if mapping.labels.is_empty() || mapping.labels.iter().any(|l| l.trim().is_empty()) {
            errors.push(
                ValidationIssue::new("mappings.labels", "Labels must be non-empty").for_column(id),
            );
        }

        if let Some((_, earlier)) = seen_label_sets
            .iter()
            .find(|(labels, _)| !mapping.labels.is_empty() && mapping.labels.is_subset(labels))
        {
            warnings.push(
                ValidationIssue::new(
                    "mappings.labels",
                    format!(
                        "Labels are covered by column '{}', declared earlier; issues will map there",
                        earlier
                    ),
                )
                .for_column(id),
            );
        }
        seen_label_sets.push((&mapping.labels, id));
    }

    for column in &board.columns {
        if !seen_columns.contains(column.id.as_str()) {
            warnings.push(
                ValidationIssue::new("mappings", "Column has no mapping and will not sync")
                    .for_column(&column.id),
            );
        }
    }

    if config.repository == RepositoryTarget::All {
        for (column, card) in board.cards() {
            if card.repository.is_some() {
                continue;
            }
            if card.issue_number.is_some() {
                errors.push(
                    ValidationIssue::new(
                        "cards.repository",
                        format!(
                            "Card '{}' is linked to an issue but has no repository",
                            card.id
                        ),
                    )
                    .for_column(&column.id),
                );
            } else if seen_columns.contains(column.id.as_str()) {
                warnings.push(
                    ValidationIssue::new(
                        "cards.repository",
                        format!(
                            "Card '{}' has no repository and cannot be pushed",
                            card.id
                        ),
                    )
                    .for_column(&column.id),
                );
            }
        }
    }

    ValidationReport::from_findings(errors, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{Card, Column};
    use crate::config::ColumnMapping;
    use crate::tracker::RepoRef;

    fn board() -> Board {
        Board::new(vec![
            Column::new("todo", "To Do"),
            Column::new("doing", "In Progress"),
            Column::new("done", "Done"),
        ])
    }

    fn config() -> SyncConfig {
        SyncConfig::for_repo(RepoRef::new("acme", "board"))
            .with_mapping(ColumnMapping::new("todo", ["todo"]))
            .with_mapping(ColumnMapping::new("doing", ["wip"]).with_title("In Progress"))
            .with_mapping(ColumnMapping::new("done", ["done"]))
    }

    #[test]
    fn test_valid_config() {
        let report = validate_config(&config(), &board());
        assert!(report.valid, "{:?}", report.errors);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_unknown_column() {
        let config = config().with_mapping(ColumnMapping::new("archive", ["archived"]));
        let report = validate_config(&config, &board());
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].column.as_deref(), Some("archive"));
    }

    #[test]
    fn test_duplicate_and_empty_mappings() {
        let mut config = config();
        config.mappings.push(ColumnMapping::new("todo", Vec::<String>::new()));
        let report = validate_config(&config, &board());
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 2);
    }

    #[test]
    fn test_unmapped_column_is_a_warning() {
        let mut config = config();
        config.mappings.pop();
        let report = validate_config(&config, &board());
        assert!(report.valid);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].column.as_deref(), Some("done"));
    }

    #[test]
    fn test_disabled_and_zero_interval() {
        let mut config = config().with_auto_sync(std::time::Duration::from_secs(0));
        config.enabled = false;
        let report = validate_config(&config, &board());
        assert_eq!(report.errors.len(), 2);
    }

    #[test]
    fn test_interval_too_large() {
        let config =
            config().with_auto_sync(std::time::Duration::from_secs(100_000_000_000_000_000));
        let report = validate_config(&config, &board());
        assert!(!report.valid);
        assert_eq!(report.errors[0].field, "sync_interval_secs");
    }

    #[test]
    fn test_all_mode_requires_card_repositories() {
        let mut board = board();
        board.columns[0].cards.push(Card::new("linked", "L").with_issue(4));
        board.columns[1].cards.push(Card::new("fresh", "F"));

        let mut config = config();
        config.repository = RepositoryTarget::All;
        let report = validate_config(&config, &board);
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_shadowed_mapping_warns() {
        let mut board = board();
        board.columns.push(Column::new("review", "Review"));
        let config = config()
            .with_mapping(ColumnMapping::new("review", ["wip"]));
        let report = validate_config(&config, &board);
        assert!(report.valid);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].column.as_deref(), Some("review"));
    }

    #[test]
    fn test_issue_display() {
        let issue = ValidationIssue::new("labels", "empty").for_column("todo");
        assert_eq!(issue.to_string(), "[todo] labels: empty");
    }
}
