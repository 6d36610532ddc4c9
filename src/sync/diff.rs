//! Diff engine
//!
//! Pairs board cards with remote issues and proposes the smallest set of
//! operations that brings both sides back in line:
//! - cards pair with issues by stored link, or by the card marker the engine
//!   writes into issue bodies
//! - a side counts as changed when its timestamp is newer than `last_sync`;
//!   before the first sync both sides count as changed
//! - fields are only proposed for writing when their values actually differ,
//!   so re-diffing after a clean execution yields nothing

use super::conflict::{ConflictClassifier, ConflictKind, FieldValue, SyncConflict};
use super::mapping::MappingResolver;
use super::operation::{order_operations, OperationPayload, SyncOperation};
use crate::board::{Board, Card, CardUpdate, Column, NewCard};
use crate::config::SyncConfig;
use crate::tracker::{Issue, IssueDraft, IssuePatch, IssueState, RepoRef};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

const MARKER_PREFIX: &str = "<!-- kanban-card: ";
const MARKER_SUFFIX: &str = " -->";

/// Hidden marker tying an issue body to a card
pub fn card_marker(card_id: &str) -> String {
    format!("{}{}{}", MARKER_PREFIX, card_id, MARKER_SUFFIX)
}

/// Issue body for a card description
pub fn embed_marker(description: &str, card_id: &str) -> String {
    let description = description.trim();
    if description.is_empty() {
        card_marker(card_id)
    } else {
        format!("{}\n\n{}", description, card_marker(card_id))
    }
}

/// Card id carried by an issue body, if any
pub fn extract_marker(body: &str) -> Option<&str> {
    let start = body.find(MARKER_PREFIX)? + MARKER_PREFIX.len();
    let len = body[start..].find(MARKER_SUFFIX)?;
    let id = body[start..start + len].trim();
    (!id.is_empty()).then_some(id)
}

/// Issue body with every card marker removed, trimmed
pub fn strip_marker(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut rest = body;
    while let Some(start) = rest.find(MARKER_PREFIX) {
        out.push_str(&rest[..start]);
        match rest[start..].find(MARKER_SUFFIX) {
            Some(len) => rest = &rest[start + len + MARKER_SUFFIX.len()..],
            None => {
                rest = &rest[start..];
                break;
            }
        }
    }
    out.push_str(rest);
    out.trim().to_string()
}

/// Proposed operations and the conflicts found on the way
#[derive(Debug, Clone, Default)]
pub struct DiffOutcome {
    pub operations: Vec<SyncOperation>,
    /// Every conflict found, resolved or not
    pub conflicts: Vec<SyncConflict>,
}

impl DiffOutcome {
    pub fn unresolved(&self) -> impl Iterator<Item = &SyncConflict> {
        self.conflicts.iter().filter(|c| !c.is_resolved())
    }

    pub fn resolved_count(&self) -> u64 {
        self.conflicts.iter().filter(|c| c.is_resolved()).count() as u64
    }

    fn push(&mut self, payload: OperationPayload) {
        self.operations.push(SyncOperation::new(payload));
    }
}

/// Which sides moved since the last pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Movement {
    Neither,
    Local,
    Remote,
    Both,
}

/// Writes accumulated for one card/issue pair
#[derive(Debug, Default)]
struct PairPlan {
    patch: IssuePatch,
    close: bool,
    card: CardUpdate,
}

type FieldDiff = (ConflictKind, FieldValue, FieldValue);

/// Compares one board snapshot against one remote snapshot
pub struct DiffEngine<'a> {
    config: &'a SyncConfig,
    resolver: MappingResolver<'a>,
    classifier: ConflictClassifier<'a>,
}

impl<'a> DiffEngine<'a> {
    /// `decisions` are conflicts carrying user resolutions from earlier passes
    pub fn new(config: &'a SyncConfig, decisions: &'a HashMap<String, SyncConflict>) -> Self {
        Self {
            config,
            resolver: MappingResolver::new(&config.mappings),
            classifier: ConflictClassifier::new(config.conflict_strategy, decisions),
        }
    }

    pub fn diff(&self, board: &Board, issues: &[Issue]) -> DiffOutcome {
        let mut outcome = DiffOutcome::default();

        let by_number: HashMap<(RepoRef, u64), &Issue> = issues
            .iter()
            .map(|issue| ((issue.repository.clone(), issue.number), issue))
            .collect();

        // Lowest number wins when several issues carry the same marker
        let mut by_marker: HashMap<&str, &Issue> = HashMap::new();
        for issue in issues {
            if let Some(card_id) = extract_marker(&issue.body) {
                by_marker
                    .entry(card_id)
                    .and_modify(|kept| {
                        if issue.number < kept.number {
                            *kept = issue;
                        }
                    })
                    .or_insert(issue);
            }
        }

        let mut claimed: HashSet<(RepoRef, u64)> = HashSet::new();

        for (column, card) in board.cards() {
            let paired = match card.issue_number {
                Some(number) => {
                    let Some(repo) = self.config.repo_for_card(card) else {
                        warn!(card_id = %card.id, "Linked card has no repository, skipping");
                        continue;
                    };
                    match by_number.get(&(repo, number)) {
                        Some(issue) => Some((*issue, false)),
                        None => {
                            debug!(card_id = %card.id, number, "Linked issue not in remote snapshot");
                            continue;
                        }
                    }
                }
                None => by_marker.get(card.id.as_str()).map(|issue| (*issue, true)),
            };

            match paired {
                Some((issue, repair)) => {
                    claimed.insert((issue.repository.clone(), issue.number));
                    self.diff_pair(column, card, issue, repair, &mut outcome);
                }
                None => self.propose_issue(column, card, &mut outcome),
            }
        }

        for issue in issues {
            if claimed.contains(&(issue.repository.clone(), issue.number)) {
                continue;
            }
            match extract_marker(&issue.body) {
                Some(card_id) if board.find_card(card_id).is_none() => {
                    self.propose_close(card_id, issue, &mut outcome)
                }
                Some(card_id) => debug!(
                    card_id,
                    number = issue.number,
                    "Issue marker points at a card linked to another issue"
                ),
                None => self.propose_card(board, issue, &mut outcome),
            }
        }

        order_operations(&mut outcome.operations);

        debug!(
            operations = outcome.operations.len(),
            conflicts = outcome.conflicts.len(),
            unresolved = outcome.unresolved().count(),
            "Diff complete"
        );
        outcome
    }

    /// Unlinked card in a mapped column
    fn propose_issue(&self, column: &Column, card: &Card, outcome: &mut DiffOutcome) {
        let Some(mapping) = self.resolver.for_column(&column.id) else {
            return;
        };
        let Some(repository) = self.config.repo_for_card(card) else {
            warn!(card_id = %card.id, "Card has no repository, cannot create issue");
            return;
        };

        outcome.push(OperationPayload::CreateIssue {
            card_id: card.id.clone(),
            repository,
            draft: IssueDraft {
                title: card.title.clone(),
                body: embed_marker(&card.description, &card.id),
                labels: self.resolver.labels_for_card(&column.id, &card.labels),
                assignee: card.assignee.clone(),
            },
            state: mapping.state,
        });
    }

    /// Issue with no card and no marker
    fn propose_card(&self, board: &Board, issue: &Issue, outcome: &mut DiffOutcome) {
        let Some(mapping) = self.resolver.resolve_column(&issue.labels).mapping() else {
            return;
        };
        if issue.state == IssueState::Closed && mapping.state != Some(IssueState::Closed) {
            debug!(number = issue.number, column = %mapping.column_id, "Closed issue maps to an open column, skipping");
            return;
        }
        if board.column(&mapping.column_id).is_none() {
            warn!(column = %mapping.column_id, "Mapped column missing from board");
            return;
        }

        outcome.push(OperationPayload::CreateCard {
            column_id: mapping.column_id.clone(),
            card: NewCard {
                title: issue.title.clone(),
                description: strip_marker(&issue.body),
                labels: self.resolver.free_labels(&issue.labels),
                assignee: issue.assignee.clone(),
                issue_number: issue.number,
                repository: issue.repository.clone(),
            },
        });
    }

    /// Issue whose card was removed from the board
    fn propose_close(&self, card_id: &str, issue: &Issue, outcome: &mut DiffOutcome) {
        if issue.state == IssueState::Open && self.config.close_issues_for_removed_cards {
            outcome.push(OperationPayload::CloseIssue {
                card_id: Some(card_id.to_string()),
                repository: issue.repository.clone(),
                number: issue.number,
            });
        }
    }

    fn diff_pair(
        &self,
        column: &Column,
        card: &Card,
        issue: &Issue,
        repair: bool,
        outcome: &mut DiffOutcome,
    ) {
        let mut plan = PairPlan::default();
        if repair {
            plan.card = CardUpdate::link(issue.number, issue.repository.clone());
        }

        if self.closed_remotely(column, issue) {
            outcome.push(OperationPayload::DeleteCard {
                card_id: card.id.clone(),
                issue_number: issue.number,
            });
            return;
        }

        let fields = self.compare(column, card, issue);
        match self.movement(card, issue) {
            Movement::Neither => {}
            Movement::Local => {
                for (kind, local, _) in &fields {
                    self.push_local(&mut plan, card, *kind, local);
                }
            }
            Movement::Remote => {
                for (kind, _, remote) in &fields {
                    self.pull_remote(&mut plan, column, issue, *kind, remote);
                }
            }
            Movement::Both => {
                for (kind, local, remote) in fields {
                    let conflict = self.classifier.classify(SyncConflict::new(
                        &card.id,
                        issue.number,
                        kind,
                        local,
                        remote,
                    ));
                    let (to_remote, to_local) = conflict.writes();
                    if let Some(value) = to_remote {
                        self.push_local(&mut plan, card, kind, value);
                    }
                    if let Some(value) = to_local {
                        self.pull_remote(&mut plan, column, issue, kind, value);
                    }
                    outcome.conflicts.push(conflict);
                }
            }
        }

        if !plan.patch.is_empty() {
            outcome.push(OperationPayload::UpdateIssue {
                card_id: Some(card.id.clone()),
                repository: issue.repository.clone(),
                number: issue.number,
                patch: plan.patch,
            });
        }
        if plan.close && issue.state == IssueState::Open {
            outcome.push(OperationPayload::CloseIssue {
                card_id: Some(card.id.clone()),
                repository: issue.repository.clone(),
                number: issue.number,
            });
        }
        if !plan.card.is_empty() {
            outcome.push(OperationPayload::UpdateCard {
                card_id: card.id.clone(),
                update: plan.card,
            });
        }
    }

    fn movement(&self, card: &Card, issue: &Issue) -> Movement {
        let Some(since) = self.config.last_sync else {
            return Movement::Both;
        };
        match (card.changed_since(since), issue.updated_at > since) {
            (false, false) => Movement::Neither,
            (true, false) => Movement::Local,
            (false, true) => Movement::Remote,
            (true, true) => Movement::Both,
        }
    }

    /// Remote closed the issue since the last pass and cards follow suit
    fn closed_remotely(&self, column: &Column, issue: &Issue) -> bool {
        let Some(since) = self.config.last_sync else {
            return false;
        };
        let column_state = self
            .resolver
            .labels_for_column(&column.id)
            .and_then(|(_, state)| state);

        self.config.remove_cards_for_closed_issues
            && issue.state == IssueState::Closed
            && issue.updated_at > since
            && column_state != Some(IssueState::Closed)
    }

    /// Fields whose values differ, in title, description, state, labels order
    fn compare(&self, column: &Column, card: &Card, issue: &Issue) -> Vec<FieldDiff> {
        let mut fields = Vec::new();

        if card.title != issue.title {
            fields.push((
                ConflictKind::TitleMismatch,
                FieldValue::Text(card.title.clone()),
                FieldValue::Text(issue.title.clone()),
            ));
        }

        let local_description = card.description.trim();
        let remote_description = strip_marker(&issue.body);
        if local_description != remote_description {
            fields.push((
                ConflictKind::DescriptionMismatch,
                FieldValue::Text(local_description.to_string()),
                FieldValue::Text(remote_description),
            ));
        }

        if let Some((_, Some(target))) = self.resolver.labels_for_column(&column.id) {
            if target != issue.state {
                fields.push((
                    ConflictKind::StateMismatch,
                    FieldValue::State(target),
                    FieldValue::State(issue.state),
                ));
            }
        }

        // An issue stripped of all managed labels leaves the card where it is
        let remote_column = self.resolver.resolve_column(&issue.labels).column_id();
        let moved = remote_column.is_some_and(|id| id != column.id);
        if moved || self.resolver.free_labels(&card.labels) != self.resolver.free_labels(&issue.labels) {
            fields.push((
                ConflictKind::LabelMismatch,
                FieldValue::Labels(self.resolver.labels_for_card(&column.id, &card.labels)),
                FieldValue::Labels(issue.labels.clone()),
            ));
        }

        fields
    }

    /// Write a card-side value to the issue
    fn push_local(&self, plan: &mut PairPlan, card: &Card, kind: ConflictKind, value: &FieldValue) {
        match (kind, value) {
            (ConflictKind::TitleMismatch, FieldValue::Text(title)) => {
                plan.patch.title = Some(title.clone())
            }
            (ConflictKind::DescriptionMismatch, FieldValue::Text(description)) => {
                plan.patch.body = Some(embed_marker(description, &card.id))
            }
            (ConflictKind::StateMismatch, FieldValue::State(IssueState::Closed)) => plan.close = true,
            (ConflictKind::StateMismatch, FieldValue::State(IssueState::Open)) => {
                plan.patch.state = Some(IssueState::Open)
            }
            (ConflictKind::LabelMismatch, FieldValue::Labels(labels)) => {
                plan.patch.labels = Some(labels.clone())
            }
            _ => warn!(card_id = %card.id, %kind, %value, "Value does not fit field, not written"),
        }
    }

    /// Write an issue-side value to the card
    fn pull_remote(
        &self,
        plan: &mut PairPlan,
        column: &Column,
        issue: &Issue,
        kind: ConflictKind,
        value: &FieldValue,
    ) {
        match (kind, value) {
            (ConflictKind::TitleMismatch, FieldValue::Text(title)) => {
                plan.card.title = Some(title.clone())
            }
            (ConflictKind::DescriptionMismatch, FieldValue::Text(description)) => {
                plan.card.description = Some(description.clone())
            }
            (ConflictKind::StateMismatch, FieldValue::State(state)) => {
                let preferred = self
                    .resolver
                    .resolve_column(&issue.labels)
                    .column_id()
                    .unwrap_or(&column.id);
                if let Some(target) = self.resolver.column_for_state(*state, Some(preferred)) {
                    if target.column_id != column.id {
                        plan.card.column_id = Some(target.column_id.clone());
                    }
                }
            }
            (ConflictKind::LabelMismatch, FieldValue::Labels(labels)) => {
                plan.card.labels = Some(self.resolver.free_labels(labels));
                if let Some(target) = self.resolver.resolve_column(labels).column_id() {
                    if target != column.id {
                        plan.card.column_id = Some(target.to_string());
                    }
                }
            }
            _ => warn!(number = issue.number, %kind, %value, "Value does not fit field, not written"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ColumnMapping, ConflictStrategy};
    use crate::sync::conflict::ConflictResolution;
    use crate::sync::operation::OperationKind;
    use chrono::{DateTime, Duration, Utc};
    use std::collections::BTreeSet;

    fn repo() -> RepoRef {
        RepoRef::new("acme", "board")
    }

    fn config() -> SyncConfig {
        SyncConfig::for_repo(repo())
            .with_mapping(ColumnMapping::new("todo", ["todo"]))
            .with_mapping(ColumnMapping::new("doing", ["wip"]))
            .with_mapping(ColumnMapping::new("done", ["done"]).with_state(IssueState::Closed))
    }

    fn issue(number: u64, title: &str, labels: &[&str], updated_at: DateTime<Utc>) -> Issue {
        Issue {
            number,
            repository: repo(),
            title: title.to_string(),
            body: String::new(),
            state: IssueState::Open,
            labels: labels.iter().map(|s| s.to_string()).collect(),
            assignee: None,
            url: None,
            created_at: updated_at,
            updated_at,
        }
    }

    fn board(cards: Vec<(&str, Card)>) -> Board {
        let mut board = Board::new(vec![
            Column::new("todo", "To Do"),
            Column::new("doing", "In Progress"),
            Column::new("done", "Done"),
        ]);
        for (column, card) in cards {
            board.insert_card(column, card).unwrap();
        }
        board
    }

    fn run(config: &SyncConfig, board: &Board, issues: &[Issue]) -> DiffOutcome {
        let decisions = HashMap::new();
        DiffEngine::new(config, &decisions).diff(board, issues)
    }

    #[test]
    fn test_marker_helpers() {
        let body = embed_marker("  Some text \n", "card-1");
        assert_eq!(body, "Some text\n\n<!-- kanban-card: card-1 -->");
        assert_eq!(extract_marker(&body), Some("card-1"));
        assert_eq!(strip_marker(&body), "Some text");

        assert_eq!(embed_marker("", "c"), "<!-- kanban-card: c -->");
        assert_eq!(strip_marker("<!-- kanban-card: c -->"), "");
        assert_eq!(extract_marker("no marker here"), None);
        assert_eq!(extract_marker("<!-- kanban-card:  -->"), None);
        assert_eq!(strip_marker("broken <!-- kanban-card: x"), "broken <!-- kanban-card: x");
    }

    #[test]
    fn test_marker_pairs_unlinked_card() {
        let now = Utc::now();
        let board = board(vec![("doing", Card::new("c1", "Task"))]);
        let mut remote = issue(3, "Task", &["wip"], now);
        remote.body = card_marker("c1");

        let outcome = run(&config(), &board, &[remote]);
        assert_eq!(outcome.operations.len(), 1);
        let op = &outcome.operations[0];
        assert_eq!(op.kind, OperationKind::UpdateCard);
        match op.payload {
            OperationPayload::UpdateCard { ref update, .. } => {
                assert_eq!(update, &CardUpdate::link(3, repo()));
            }
            _ => panic!("expected update_card"),
        }
        assert!(outcome.conflicts.is_empty());
    }

    #[test]
    fn test_removed_card_closes_issue() {
        let now = Utc::now();
        let mut orphan = issue(9, "Gone", &["wip"], now);
        orphan.body = embed_marker("text", "deleted-card");

        let outcome = run(&config(), &board(vec![]), &[orphan.clone()]);
        assert_eq!(outcome.operations.len(), 1);
        assert_eq!(outcome.operations[0].kind, OperationKind::CloseIssue);

        let outcome = run(&config().with_issue_closing(false), &board(vec![]), &[orphan]);
        assert!(outcome.operations.is_empty());
    }

    #[test]
    fn test_closed_issue_only_creates_card_in_closed_column() {
        let now = Utc::now();
        let mut wip = issue(1, "A", &["wip"], now);
        wip.state = IssueState::Closed;
        let mut done = issue(2, "B", &["done"], now);
        done.state = IssueState::Closed;

        let outcome = run(&config(), &board(vec![]), &[wip, done]);
        assert_eq!(outcome.operations.len(), 1);
        match outcome.operations[0].payload {
            OperationPayload::CreateCard { ref column_id, ref card } => {
                assert_eq!(column_id, "done");
                assert_eq!(card.issue_number, 2);
            }
            _ => panic!("expected create_card"),
        }
    }

    #[test]
    fn test_remote_only_change_moves_card() {
        let last_sync = Utc::now() - Duration::hours(1);
        let card = Card::new("c1", "Task")
            .with_issue(5)
            .with_label("bug")
            .with_updated_at(last_sync - Duration::minutes(5));
        let board = board(vec![("todo", card)]);
        let remote = issue(5, "Task", &["wip", "bug", "p1"], Utc::now());

        let outcome = run(&config().with_last_sync(last_sync), &board, &[remote]);
        assert!(outcome.conflicts.is_empty());
        assert_eq!(outcome.operations.len(), 1);
        match outcome.operations[0].payload {
            OperationPayload::UpdateCard { ref update, .. } => {
                assert_eq!(update.column_id.as_deref(), Some("doing"));
                let expected: BTreeSet<String> = ["bug", "p1"].iter().map(|s| s.to_string()).collect();
                assert_eq!(update.labels.as_ref(), Some(&expected));
            }
            _ => panic!("expected update_card"),
        }
    }

    #[test]
    fn test_local_state_change_closes_issue() {
        let last_sync = Utc::now() - Duration::hours(1);
        let card = Card::new("c1", "Task")
            .with_issue(5)
            .with_updated_at(Utc::now());
        let board = board(vec![("done", card)]);
        let remote = issue(5, "Task", &["wip"], last_sync - Duration::minutes(1));

        let outcome = run(&config().with_last_sync(last_sync), &board, &[remote]);
        let kinds: Vec<_> = outcome.operations.iter().map(|op| op.kind).collect();
        assert_eq!(kinds, vec![OperationKind::UpdateIssue, OperationKind::CloseIssue]);
        match outcome.operations[0].payload {
            OperationPayload::UpdateIssue { ref patch, .. } => {
                let expected: BTreeSet<String> = ["done".to_string()].into_iter().collect();
                assert_eq!(patch.labels.as_ref(), Some(&expected));
                assert_eq!(patch.state, None);
            }
            _ => panic!("expected update_issue"),
        }
    }

    #[test]
    fn test_unchanged_sides_produce_nothing() {
        let last_sync = Utc::now();
        let card = Card::new("c1", "Local title")
            .with_issue(5)
            .with_updated_at(last_sync - Duration::minutes(1));
        let board = board(vec![("todo", card)]);
        let remote = issue(5, "Remote title", &["todo"], last_sync - Duration::minutes(1));

        let outcome = run(&config().with_last_sync(last_sync), &board, &[remote]);
        assert!(outcome.operations.is_empty());
        assert!(outcome.conflicts.is_empty());
    }

    #[test]
    fn test_merge_decision_writes_both_sides() {
        let card = Card::new("c1", "Local").with_issue(5);
        let board = board(vec![("todo", card)]);
        let remote = issue(5, "Remote", &["todo"], Utc::now());

        let mut decided = SyncConflict::new(
            "c1",
            5,
            ConflictKind::TitleMismatch,
            FieldValue::Text("Local".to_string()),
            FieldValue::Text("Remote".to_string()),
        );
        decided.resolution = Some(ConflictResolution::merge(
            FieldValue::Text("Merged".to_string()),
        ));
        let decisions: HashMap<_, _> = [(decided.id.clone(), decided)].into_iter().collect();

        let config = config().with_strategy(ConflictStrategy::Manual);
        let outcome = DiffEngine::new(&config, &decisions).diff(&board, &[remote]);
        assert_eq!(outcome.resolved_count(), 1);
        let kinds: Vec<_> = outcome.operations.iter().map(|op| op.kind).collect();
        assert_eq!(kinds, vec![OperationKind::UpdateIssue, OperationKind::UpdateCard]);
    }
}
