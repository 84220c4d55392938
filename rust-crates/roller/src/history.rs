use crate::roster::{
    Entry,
    EntryId,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::collections::VecDeque;

pub const HISTORY_CAPACITY: usize = 3;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ImageState {
    #[default]
    Pending,
    Ready,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistorySlot {
    pub entry: Entry,
    pub image: ImageState,
}

impl HistorySlot {
    pub fn pending(entry: Entry) -> Self {
        Self {
            entry,
            image: ImageState::Pending,
        }
    }

    pub fn with_image(entry: Entry, image: ImageState) -> Self {
        Self { entry, image }
    }

    pub fn id(&self) -> &EntryId {
        &self.entry.id
    }

    pub fn is_ready(&self) -> bool {
        self.image == ImageState::Ready
    }
}

/// Bounded most-recent-first sequence of picks.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct History {
    slots: VecDeque<HistorySlot>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts at the front, returning the slot evicted past capacity.
    pub fn push_front(&mut self, slot: HistorySlot) -> Option<HistorySlot> {
        self.slots.push_front(slot);
        if self.slots.len() > HISTORY_CAPACITY {
            self.slots.pop_back()
        } else {
            None
        }
    }

    /// Overwrites the slot at `index` in place. `None` (and no change) when the
    /// index is out of range.
    pub fn replace_at(&mut self, index: usize, slot: HistorySlot) -> Option<HistorySlot> {
        let current = self.slots.get_mut(index)?;
        Some(std::mem::replace(current, slot))
    }

    pub fn contains(&self, id: &EntryId) -> bool {
        self.slots.iter().any(|slot| slot.id() == id)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&HistorySlot> {
        self.slots.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistorySlot> {
        self.slots.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = &EntryId> {
        self.slots.iter().map(HistorySlot::id)
    }

    pub(crate) fn set_image_state(&mut self, id: &EntryId, state: ImageState) -> bool {
        match self.slots.iter_mut().find(|slot| slot.id() == id) {
            Some(slot) if slot.image != state => {
                slot.image = state;
                true
            }
            _ => false,
        }
    }

    pub fn snapshot(&self) -> HistorySnapshot {
        HistorySnapshot {
            entries: self.slots.iter().map(|slot| slot.entry.clone()).collect(),
        }
    }
}

/// Serializable view of the history handed to observers and peers.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistorySnapshot {
    pub entries: Vec<Entry>,
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    fn slot(id: &str) -> HistorySlot {
        HistorySlot::pending(Entry::new(id, id, format!("{id}.png")))
    }

    fn ids(history: &History) -> Vec<&str> {
        history.ids().map(EntryId::as_str).collect()
    }

    #[test]
    fn push_front__keeps_most_recent_first() {
        // given
        let mut history = History::new();

        // when
        history.push_front(slot("A"));
        history.push_front(slot("B"));

        // then
        assert_eq!(ids(&history), vec!["B", "A"]);
    }

    #[test]
    fn push_front__evicts_oldest_past_capacity() {
        // given
        let mut history = History::new();
        for id in ["A", "B", "C"] {
            assert!(history.push_front(slot(id)).is_none());
        }

        // when
        let evicted = history.push_front(slot("D"));

        // then
        assert_eq!(evicted.map(|s| s.entry.name), Some("A".to_string()));
        assert_eq!(ids(&history), vec!["D", "C", "B"]);
        assert_eq!(history.len(), HISTORY_CAPACITY);
    }

    #[test]
    fn replace_at__overwrites_without_shifting() {
        // given
        let mut history = History::new();
        for id in ["A", "B", "C"] {
            history.push_front(slot(id));
        }

        // when
        let replaced = history.replace_at(1, slot("X"));

        // then
        assert_eq!(replaced.map(|s| s.entry.name), Some("B".to_string()));
        assert_eq!(ids(&history), vec!["C", "X", "A"]);
    }

    #[test]
    fn replace_at__out_of_range_changes_nothing() {
        // given
        let mut history = History::new();
        history.push_front(slot("A"));

        // when
        let replaced = history.replace_at(2, slot("X"));

        // then
        assert!(replaced.is_none());
        assert_eq!(ids(&history), vec!["A"]);
    }

    #[test]
    fn contains__matches_by_id() {
        let mut history = History::new();
        history.push_front(slot("A"));

        assert!(history.contains(&EntryId::from("A")));
        assert!(!history.contains(&EntryId::from("B")));
    }

    #[test]
    fn set_image_state__reports_only_real_changes() {
        // given
        let mut history = History::new();
        history.push_front(slot("A"));
        let id = EntryId::from("A");

        // when
        let first = history.set_image_state(&id, ImageState::Ready);
        let second = history.set_image_state(&id, ImageState::Ready);

        // then
        assert!(first);
        assert!(!second);
        assert!(history.get(0).is_some_and(HistorySlot::is_ready));
    }

    #[test]
    fn snapshot__serializes_name_and_image_per_slot() {
        // given
        let mut history = History::new();
        history.push_front(slot("A"));

        // when
        let json = serde_json::to_value(history.snapshot()).unwrap();

        // then
        assert_eq!(
            json,
            serde_json::json!({
                "entries": [{ "id": "A", "name": "A", "image": "A.png" }]
            })
        );
    }
}
