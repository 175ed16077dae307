//! Prefetch windows, handle retention and idle registry cleanup.

use std::collections::HashSet;
use std::sync::Arc;

use feedplay_core::events::GlobalEvent;
use feedplay_core::ItemId;
use feedplay_prefetch::window;
use tokio::runtime::Handle;
use tracing::{debug, info};

use super::effects::Effects;
use super::{EngineState, FeedEngine};

impl FeedEngine {
    /// Hand the window around the active index to the scheduler and mark
    /// exactly the scheduled items as preloaded.
    pub(super) fn schedule_window_locked(&self, state: &mut EngineState, fx: &mut Effects) {
        let Some(active) = state.active.clone() else {
            return;
        };
        let feed_len = state.feed_len();
        let registry = &state.registry;
        let window = self.inner.scheduler.schedule(
            active.index,
            state.direction,
            feed_len,
            self.shape(),
            |index| {
                let id = registry.id_at(index)?;
                let item = registry.get(id)?;
                Some((id.clone(), item.url.clone()))
            },
        );

        let scheduled: HashSet<ItemId> = window.into_iter().map(|c| c.id).collect();
        for item in state.registry.values_mut() {
            let preloaded = scheduled.contains(&item.id);
            if item.is_preloaded != preloaded {
                item.is_preloaded = preloaded;
                fx.touch(&item.id);
            }
        }
    }

    /// Reschedule when a registration lands close enough to the active index
    /// to belong to its window.
    pub(super) fn refresh_window_near_locked(
        &self,
        state: &mut EngineState,
        index: usize,
        fx: &mut Effects,
    ) {
        let Some(active) = &state.active else {
            return;
        };
        let config = &self.inner.config;
        let reach = config.preload_ahead.max(config.preload_behind) + 1;
        if index.abs_diff(active.index) <= reach {
            self.schedule_window_locked(state, fx);
        }
    }

    /// Pause and release handles of items outside the retention window.
    pub(super) fn release_outside_retention_locked(
        &self,
        state: &mut EngineState,
        fx: &mut Effects,
    ) {
        let Some(active) = &state.active else {
            return;
        };
        let retained = window::retention_range(active.index, self.shape());
        let outside: Vec<ItemId> = state
            .registry
            .values()
            .filter(|item| item.handle.is_some() && !retained.contains(&item.index))
            .map(|item| item.id.clone())
            .collect();

        for id in outside {
            state.cancel_timers(&id);
            let generation = state.next_generation();
            let Some(item) = state.registry.get_mut(&id) else {
                continue;
            };
            if let Some(handle) = item.handle.take() {
                fx.release(handle);
            }
            item.is_playing = false;
            item.is_buffering = false;
            item.play_generation = generation;
            debug!(%id, index = item.index, "Released handle outside retention window");
            fx.touch(&id);
        }
    }

    /// Queue the registry cleanup at low priority, replacing a queued one.
    pub(super) fn schedule_cleanup_locked(&self, state: &mut EngineState) {
        if let Some(previous) = state.cleanup.take() {
            previous.abort();
        }
        let Ok(runtime) = Handle::try_current() else {
            return;
        };
        let weak = Arc::downgrade(&self.inner);
        let delay = self.inner.config.idle_cleanup_delay();
        state.cleanup = Some(runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            // Let pending transitions and play launches run first.
            tokio::task::yield_now().await;
            if let Some(inner) = weak.upgrade() {
                FeedEngine { inner }.cleanup_now();
            }
        }));
    }

    /// Evict registered items furthest from the active index until at most
    /// `max_cached_items` remain. The active item is never evicted. Returns
    /// the number of items removed.
    ///
    /// Normally runs on its own shortly after each active change.
    pub fn cleanup_now(&self) -> usize {
        self.transact(|state, fx| {
            let max = self.inner.config.max_cached_items;
            if state.registry.len() <= max {
                return 0;
            }
            let Some(active) = state.active.clone() else {
                return 0;
            };

            let mut ranked: Vec<(usize, usize, ItemId)> = state
                .registry
                .values()
                .filter(|item| item.id != active.id)
                .map(|item| (item.index.abs_diff(active.index), item.index, item.id.clone()))
                .collect();
            // Furthest first; on ties the lower index goes first.
            ranked.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

            let excess = state.registry.len() - max;
            let mut evicted = 0;
            for (_, index, id) in ranked.into_iter().take(excess) {
                state.cancel_timers(&id);
                let Some(item) = state.registry.remove(&id) else {
                    continue;
                };
                if let Some(handle) = item.handle {
                    fx.release(handle);
                }
                debug!(%id, index, "Evicted item from registry");
                fx.global(GlobalEvent::ItemEvicted { id, index });
                evicted += 1;
            }

            info!(evicted, remaining = state.registry.len(), "Idle cleanup finished");
            evicted
        })
    }
}
