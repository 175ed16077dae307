//! Per-item playback state and the registry indexing it.

use std::collections::{BTreeMap, HashMap};

use feedplay_core::events::ItemSnapshot;
use feedplay_core::ItemId;
use tokio::time::Instant;
use url::Url;

use crate::handle::SharedHandle;

/// Mutable state of one registered item.
pub(crate) struct ItemState {
    pub id: ItemId,
    pub index: usize,
    pub url: Url,
    pub handle: Option<SharedHandle>,
    pub is_preloaded: bool,
    pub is_playing: bool,
    pub is_buffering: bool,
    pub error: Option<String>,
    pub retry_count: u32,
    pub last_retry_at: Option<Instant>,
    /// Generation of the play attempt whose outcome is still wanted.
    pub play_generation: u64,
}

impl ItemState {
    pub fn new(id: ItemId, index: usize, url: Url) -> Self {
        Self {
            id,
            index,
            url,
            handle: None,
            is_preloaded: false,
            is_playing: false,
            is_buffering: false,
            error: None,
            retry_count: 0,
            last_retry_at: None,
            play_generation: 0,
        }
    }

    /// Playing or waiting on a play call.
    pub fn is_engaged(&self) -> bool {
        self.is_playing || self.is_buffering
    }

    /// Forget the outcome of earlier play attempts.
    pub fn reset_attempts(&mut self) {
        self.retry_count = 0;
        self.error = None;
        self.last_retry_at = None;
    }

    pub fn snapshot(&self) -> ItemSnapshot {
        ItemSnapshot {
            id: self.id.clone(),
            index: self.index,
            url: self.url.to_string(),
            is_playing: self.is_playing,
            is_buffering: self.is_buffering,
            is_preloaded: self.is_preloaded,
            has_handle: self.handle.is_some(),
            retry_count: self.retry_count,
            error: self.error.clone(),
        }
    }
}

/// Registered items keyed by id, with an index -> id map kept in step.
#[derive(Default)]
pub(crate) struct Registry {
    items: HashMap<ItemId, ItemState>,
    by_index: BTreeMap<usize, ItemId>,
}

impl Registry {
    pub fn get(&self, id: &ItemId) -> Option<&ItemState> {
        self.items.get(id)
    }

    pub fn get_mut(&mut self, id: &ItemId) -> Option<&mut ItemState> {
        self.items.get_mut(id)
    }

    pub fn id_at(&self, index: usize) -> Option<&ItemId> {
        self.by_index.get(&index)
    }

    pub fn insert(&mut self, item: ItemState) {
        self.by_index.insert(item.index, item.id.clone());
        self.items.insert(item.id.clone(), item);
    }

    /// Move an item to a new feed position.
    pub fn set_index(&mut self, id: &ItemId, index: usize) {
        let Some(item) = self.items.get_mut(id) else {
            return;
        };
        if self.by_index.get(&item.index) == Some(id) {
            self.by_index.remove(&item.index);
        }
        item.index = index;
        self.by_index.insert(index, id.clone());
    }

    pub fn remove(&mut self, id: &ItemId) -> Option<ItemState> {
        let item = self.items.remove(id)?;
        if self.by_index.get(&item.index) == Some(id) {
            self.by_index.remove(&item.index);
        }
        Some(item)
    }

    pub fn clear(&mut self) -> Vec<ItemState> {
        self.by_index.clear();
        self.items.drain().map(|(_, item)| item).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = &ItemState> {
        self.items.values()
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut ItemState> {
        self.items.values_mut()
    }

    /// One past the highest mapped index.
    pub fn derived_len(&self) -> usize {
        self.by_index.keys().next_back().map_or(0, |last| last + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, index: usize) -> ItemState {
        let url = Url::parse(&format!("https://cdn.example/{id}.m3u8")).unwrap();
        ItemState::new(ItemId::from(id), index, url)
    }

    #[test]
    fn index_map_follows_moves() {
        let mut registry = Registry::default();
        registry.insert(item("a", 0));
        registry.insert(item("b", 1));

        registry.set_index(&ItemId::from("a"), 5);
        assert_eq!(registry.id_at(0), None);
        assert_eq!(registry.id_at(5), Some(&ItemId::from("a")));
        assert_eq!(registry.derived_len(), 6);
    }

    #[test]
    fn moving_onto_taken_index_keeps_other_item() {
        let mut registry = Registry::default();
        registry.insert(item("a", 0));
        registry.insert(item("b", 1));

        registry.set_index(&ItemId::from("b"), 0);
        assert_eq!(registry.id_at(0), Some(&ItemId::from("b")));
        assert_eq!(registry.len(), 2);

        // Removing "a" must not unmap "b".
        registry.remove(&ItemId::from("a"));
        assert_eq!(registry.id_at(0), Some(&ItemId::from("b")));
    }

    #[test]
    fn snapshot_reflects_flags() {
        let mut state = item("a", 3);
        state.is_buffering = true;
        state.retry_count = 2;
        state.error = Some("boom".into());
        let snapshot = state.snapshot();
        assert_eq!(snapshot.index, 3);
        assert!(snapshot.is_buffering);
        assert!(!snapshot.has_handle);
        assert_eq!(snapshot.retry_count, 2);
        assert_eq!(snapshot.error.as_deref(), Some("boom"));

        state.reset_attempts();
        assert_eq!(state.retry_count, 0);
        assert!(state.error.is_none());
    }

    #[test]
    fn empty_registry_has_zero_length() {
        let registry = Registry::default();
        assert!(registry.is_empty());
        assert_eq!(registry.derived_len(), 0);
    }
}
