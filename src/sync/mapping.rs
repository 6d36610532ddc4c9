//! Column <-> label mapping
//!
//! Translates between board columns and the remote label vocabulary. Labels
//! that appear in any mapping are "managed": the engine owns them and derives
//! them from the card's column. Every other label on a card or issue is "free"
//! and copied verbatim between the two sides.

use crate::config::ColumnMapping;
use crate::tracker::IssueState;
use std::collections::BTreeSet;

/// Where a remote label set lands on the board
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnMatch<'a> {
    Mapped(&'a ColumnMapping),
    Unmapped,
}

impl<'a> ColumnMatch<'a> {
    pub fn mapping(&self) -> Option<&'a ColumnMapping> {
        match self {
            Self::Mapped(mapping) => Some(mapping),
            Self::Unmapped => None,
        }
    }

    pub fn column_id(&self) -> Option<&'a str> {
        self.mapping().map(|m| m.column_id.as_str())
    }
}

/// Prioritized lookup over the configured mappings
#[derive(Debug, Clone)]
pub struct MappingResolver<'a> {
    mappings: &'a [ColumnMapping],
    managed: BTreeSet<String>,
}

impl<'a> MappingResolver<'a> {
    pub fn new(mappings: &'a [ColumnMapping]) -> Self {
        let managed = mappings
            .iter()
            .flat_map(|m| m.labels.iter().cloned())
            .collect();
        Self { mappings, managed }
    }

    /// Mapping for a column, keyed by column id
    pub fn for_column(&self, column_id: &str) -> Option<&'a ColumnMapping> {
        self.mappings.iter().find(|m| m.column_id == column_id)
    }

    /// Labels and target state for a column
    pub fn labels_for_column(
        &self,
        column_id: &str,
    ) -> Option<(&'a BTreeSet<String>, Option<IssueState>)> {
        self.for_column(column_id).map(|m| (&m.labels, m.state))
    }

    /// Best column for a remote label set
    ///
    /// The mapping sharing the most labels wins; equal overlaps go to the
    /// mapping declared first. No overlap at all is `Unmapped`.
    pub fn resolve_column(&self, labels: &BTreeSet<String>) -> ColumnMatch<'a> {
        let mut best: Option<(&'a ColumnMapping, usize)> = None;
        for mapping in self.mappings {
            let overlap = mapping.labels.intersection(labels).count();
            if overlap == 0 {
                continue;
            }
            match best {
                Some((_, best_overlap)) if best_overlap >= overlap => {}
                _ => best = Some((mapping, overlap)),
            }
        }
        best.map(|(m, _)| ColumnMatch::Mapped(m))
            .unwrap_or(ColumnMatch::Unmapped)
    }

    /// Column a card should sit in for a remote issue state
    ///
    /// `preferred` is used when its mapping targets `state` or no state at all;
    /// otherwise the first mapping targeting `state`, then the first mapping
    /// without a target state.
    pub fn column_for_state(
        &self,
        state: IssueState,
        preferred: Option<&str>,
    ) -> Option<&'a ColumnMapping> {
        if let Some(mapping) = preferred.and_then(|id| self.for_column(id)) {
            if mapping.state.map_or(true, |target| target == state) {
                return Some(mapping);
            }
        }
        self.mappings
            .iter()
            .find(|m| m.state == Some(state))
            .or_else(|| self.mappings.iter().find(|m| m.state.is_none()))
    }

    pub fn managed_labels(&self) -> &BTreeSet<String> {
        &self.managed
    }

    /// Labels not owned by any mapping
    pub fn free_labels(&self, labels: &BTreeSet<String>) -> BTreeSet<String> {
        labels.difference(&self.managed).cloned().collect()
    }

    /// Full remote label set for a card sitting in `column_id`
    pub fn labels_for_card(&self, column_id: &str, card_labels: &BTreeSet<String>) -> BTreeSet<String> {
        let mut labels = self.free_labels(card_labels);
        if let Some(mapping) = self.for_column(column_id) {
            labels.extend(mapping.labels.iter().cloned());
        }
        labels
    }
}
