//! Bounded prefetch cache.
//!
//! Holds one [`PrefetchEntry`] per item the scheduler has considered. The
//! cache itself is not synchronized; the scheduler owns it behind its state
//! lock and is the only writer.

use chrono::{DateTime, Utc};
use feedplay_core::{ItemId, PrefetchStatus, Priority};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use url::Url;

/// Warm state of a single item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrefetchEntry {
    pub id: ItemId,
    pub index: usize,
    pub url: Url,
    pub priority: Priority,
    pub status: PrefetchStatus,
    /// Body of the media playlist once fetched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest_body: Option<String>,
    /// Segment addresses extracted from the manifest.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segment_urls: Option<Vec<Url>>,
    pub loaded_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PrefetchEntry {
    pub fn new(id: ItemId, index: usize, url: Url, priority: Priority) -> Self {
        Self {
            id,
            index,
            url,
            priority,
            status: PrefetchStatus::Pending,
            manifest_body: None,
            segment_urls: None,
            loaded_at: None,
            error: None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.status == PrefetchStatus::Loaded
    }
}

/// Cache of prefetch entries keyed by item id.
#[derive(Debug)]
pub struct PrefetchCache {
    entries: HashMap<ItemId, PrefetchEntry>,
    max_entries: usize,
}

impl PrefetchCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            max_entries: max_entries.max(1),
        }
    }

    pub fn get(&self, id: &ItemId) -> Option<&PrefetchEntry> {
        self.entries.get(id)
    }

    pub fn get_mut(&mut self, id: &ItemId) -> Option<&mut PrefetchEntry> {
        self.entries.get_mut(id)
    }

    /// Insert or replace an entry. Bounding is left to [`Self::evict_over_bound`]
    /// so the caller decides which entries are protected.
    pub fn insert(&mut self, entry: PrefetchEntry) {
        self.entries.insert(entry.id.clone(), entry);
    }

    pub fn remove(&mut self, id: &ItemId) -> Option<PrefetchEntry> {
        self.entries.remove(id)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &PrefetchEntry> {
        self.entries.values()
    }

    /// Remove entries until the cache is within its bound.
    ///
    /// Victims are chosen in order: entries outside `window`, then lower
    /// priority, then furthest from `active`. Entries in `pinned` are never
    /// chosen, so the cache may stay over its bound while they exist.
    /// Returns the removed entries so the caller can cancel any work still
    /// attached to them.
    pub fn evict_over_bound(
        &mut self,
        active: Option<usize>,
        window: &HashSet<ItemId>,
        pinned: &HashSet<ItemId>,
    ) -> Vec<PrefetchEntry> {
        let mut evicted = Vec::new();
        while self.entries.len() > self.max_entries {
            let victim = self
                .entries
                .values()
                .filter(|entry| !pinned.contains(&entry.id))
                .max_by(|a, b| {
                    eviction_rank(a, active, window)
                        .cmp(&eviction_rank(b, active, window))
                        .then_with(|| a.id.cmp(&b.id))
                })
                .map(|entry| entry.id.clone());
            match victim.and_then(|id| self.entries.remove(&id)) {
                Some(entry) => {
                    tracing::debug!(
                        id = %entry.id,
                        index = entry.index,
                        priority = %entry.priority,
                        "Evicted prefetch entry"
                    );
                    evicted.push(entry);
                }
                None => break,
            }
        }
        evicted
    }
}

/// Larger ranks are evicted first.
fn eviction_rank(
    entry: &PrefetchEntry,
    active: Option<usize>,
    window: &HashSet<ItemId>,
) -> (bool, Priority, usize) {
    let distance = active.map_or(0, |active| entry.index.abs_diff(active));
    (!window.contains(&entry.id), entry.priority, distance)
}
