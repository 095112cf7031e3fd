//! User picks for the next upload batch, keyed by working-set position.

use crate::{Result, UploadError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Draft recorded for a selected position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftRequest {
    pub source_identifier: String,
    pub destination_album: i64,
}

/// What the bulk selection control offers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectState {
    /// Nothing to offer (yet)
    None,
    Select,
    Deselect,
}

#[derive(Debug, Clone)]
pub struct SelectionSet {
    drafts: BTreeMap<usize, DraftRequest>,
    reupload_allowed: bool,
    destination_album: i64,
}

impl SelectionSet {
    pub fn new(destination_album: i64) -> Self {
        Self {
            drafts: BTreeMap::new(),
            reupload_allowed: false,
            destination_album,
        }
    }

    pub fn destination_album(&self) -> i64 {
        self.destination_album
    }

    pub fn reupload_allowed(&self) -> bool {
        self.reupload_allowed
    }

    pub fn set_reupload_allowed(&mut self, allowed: bool) {
        self.reupload_allowed = allowed;
    }

    /// Select `position` unless it is queued and re-upload is off.
    pub fn select(&mut self, position: usize, source_identifier: &str, queued: bool) -> Result<()> {
        if queued && !self.reupload_allowed {
            return Err(UploadError::PositionQueued { position });
        }
        self.drafts.insert(
            position,
            DraftRequest {
                source_identifier: source_identifier.to_string(),
                destination_album: self.destination_album,
            },
        );
        Ok(())
    }

    pub fn deselect(&mut self, position: usize) -> bool {
        self.drafts.remove(&position).is_some()
    }

    /// Flip `position`; returns whether it is selected afterwards.
    pub fn toggle(&mut self, position: usize, source_identifier: &str, queued: bool) -> Result<bool> {
        if self.deselect(position) {
            return Ok(false);
        }
        self.select(position, source_identifier, queued)?;
        Ok(true)
    }

    /// Keep the recorded identifier in step with the item's staged name
    pub fn refresh_identifier(&mut self, position: usize, source_identifier: &str) {
        if let Some(draft) = self.drafts.get_mut(&position) {
            draft.source_identifier = source_identifier.to_string();
        }
    }

    pub fn contains(&self, position: usize) -> bool {
        self.drafts.contains_key(&position)
    }

    pub fn len(&self) -> usize {
        self.drafts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drafts.is_empty()
    }

    /// Selected positions in ascending order
    pub fn positions(&self) -> impl Iterator<Item = usize> + '_ {
        self.drafts.keys().copied()
    }

    pub fn drafts(&self) -> impl Iterator<Item = (usize, &DraftRequest)> {
        self.drafts.iter().map(|(position, draft)| (*position, draft))
    }

    /// Empty the set, returning how many positions were selected
    pub fn clear(&mut self) -> usize {
        let count = self.drafts.len();
        self.drafts.clear();
        count
    }

    /// Renumber positions after the working set dropped the entries whose
    /// `keep` flag is unset. Selections of dropped entries are removed.
    pub fn remap(&mut self, keep: &[bool]) {
        let mut next = 0;
        let new_positions: Vec<Option<usize>> = keep
            .iter()
            .map(|&kept| {
                kept.then(|| {
                    next += 1;
                    next - 1
                })
            })
            .collect();

        let drafts = std::mem::take(&mut self.drafts);
        self.drafts = drafts
            .into_iter()
            .filter_map(|(position, draft)| {
                let mapped = new_positions.get(position).copied().flatten()?;
                Some((mapped, draft))
            })
            .collect();
    }

    /// State of the bulk control for a working set of `item_count` items
    /// of which `queued` are bound to a job.
    pub fn select_state(&self, item_count: usize, queued: usize, idle: bool) -> SelectState {
        let selectable = if self.reupload_allowed {
            item_count
        } else {
            item_count.saturating_sub(queued)
        };
        let selected = self.drafts.len();

        if selectable == 0 || (!idle && selected < selectable) {
            SelectState::None
        } else if selected >= selectable {
            SelectState::Deselect
        } else {
            SelectState::Select
        }
    }

    pub fn can_select_all(&self, item_count: usize, queued: usize) -> bool {
        self.drafts.len() + queued < item_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_respects_queue() {
        let mut set = SelectionSet::new(12);
        set.select(0, "a.png", false).unwrap();
        assert!(matches!(
            set.select(1, "b.png", true),
            Err(UploadError::PositionQueued { position: 1 })
        ));

        set.set_reupload_allowed(true);
        set.select(1, "b.png", true).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.drafts().next().unwrap().1.destination_album, 12);
    }

    #[test]
    fn test_toggle() {
        let mut set = SelectionSet::new(1);
        assert!(set.toggle(3, "a.png", false).unwrap());
        assert!(!set.toggle(3, "a.png", true).unwrap(), "deselect ignores queue");
        assert!(set.is_empty());
        assert!(set.toggle(3, "a.png", true).is_err());
    }

    #[test]
    fn test_remap_after_pruning() {
        let mut set = SelectionSet::new(1);
        for position in [0, 2, 3] {
            set.select(position, "x", false).unwrap();
        }
        set.refresh_identifier(3, "x.png");

        set.remap(&[true, false, false, true]);

        assert_eq!(set.positions().collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(set.drafts().last().unwrap().1.source_identifier, "x.png");
    }

    #[test]
    fn test_select_state() {
        let mut set = SelectionSet::new(1);
        assert_eq!(set.select_state(0, 0, true), SelectState::None);
        assert_eq!(set.select_state(3, 3, true), SelectState::None);
        assert_eq!(set.select_state(3, 1, true), SelectState::Select);
        assert_eq!(set.select_state(3, 1, false), SelectState::None);

        set.select(0, "a", false).unwrap();
        set.select(1, "b", false).unwrap();
        assert_eq!(set.select_state(3, 1, false), SelectState::Deselect);

        // Queued items become selectable again with re-upload on
        set.set_reupload_allowed(true);
        assert_eq!(set.select_state(3, 1, true), SelectState::Select);
    }

    #[test]
    fn test_can_select_all() {
        let mut set = SelectionSet::new(1);
        assert!(set.can_select_all(2, 1));
        set.select(0, "a", false).unwrap();
        assert!(!set.can_select_all(2, 1));
        assert_eq!(set.clear(), 1);
        assert_eq!(set.clear(), 0);
    }
}
