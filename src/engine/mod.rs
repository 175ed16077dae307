//! The feed lifecycle engine.
//!
//! [`FeedEngine`] owns the mapping from feed position to item identity and
//! rendering handle, decides the single active item, drives play, pause,
//! retry and cleanup, and asks the [`PrefetchScheduler`] to warm the items
//! around the active one.
//!
//! Every public method is a synchronous state transition. State lives behind
//! one `parking_lot::Mutex`; handle calls, event publication and play
//! launches are collected as [`effects::Effects`] while the lock is held and
//! applied after it is released. Anything that has to wait (play calls,
//! settle and retry timers, idle cleanup) runs as a tokio task holding only a
//! weak reference to the engine, so the engine must be used from within a
//! tokio runtime.
//!
//! # Example
//!
//! ```rust,ignore
//! let engine = FeedEngine::with_http(&config)?;
//! engine.register_or_update("a", 0, url_a);
//! engine.register_or_update("b", 1, url_b);
//! engine.set_active_index(0);
//! engine.attach_handle("a", player_a);
//! ```

mod effects;
mod playback;
mod retention;
mod state;
mod timers;

use std::sync::Arc;

use feedplay_core::config::{Config, EngineConfig};
use feedplay_core::events::{
    ActiveRef, EventHub, GlobalEvent, ItemSnapshot, SubscriptionId,
};
use feedplay_core::{AppLifecycle, Connectivity, ItemId, ScrollDirection};
use feedplay_prefetch::{Fetcher, PrefetchEntry, PrefetchScheduler, WindowShape};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::handle::{same_handle, SharedHandle};
use crate::platform::PlatformSignal;
use effects::Effects;
use state::{ItemState, Registry};
use timers::TimerSet;

pub(crate) struct EngineState {
    registry: Registry,
    active: Option<ActiveRef>,
    direction: ScrollDirection,
    /// Explicit feed length; derived from the registry when unset.
    feed_len: Option<usize>,
    lifecycle: AppLifecycle,
    connectivity: Connectivity,
    settle_timers: TimerSet,
    retry_timers: TimerSet,
    cleanup: Option<JoinHandle<()>>,
    generation: u64,
}

impl EngineState {
    fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    fn is_active(&self, id: &ItemId) -> bool {
        self.active.as_ref().map_or(false, |active| &active.id == id)
    }

    fn feed_len(&self) -> usize {
        self.feed_len.unwrap_or_else(|| self.registry.derived_len())
    }

    fn cancel_timers(&mut self, id: &ItemId) {
        self.settle_timers.cancel(id);
        self.retry_timers.cancel(id);
    }

    /// Ids of items other than `except` that are playing or starting to.
    fn engaged_except(&self, except: Option<&ItemId>) -> Vec<ItemId> {
        self.registry
            .values()
            .filter(|item| Some(&item.id) != except && item.is_engaged())
            .map(|item| item.id.clone())
            .collect()
    }
}

impl Drop for EngineState {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup.abort();
        }
    }
}

pub(crate) struct EngineInner {
    config: EngineConfig,
    scheduler: PrefetchScheduler,
    events: EventHub,
    state: Mutex<EngineState>,
}

/// Playback lifecycle engine for one feed.
///
/// Cloning yields another handle to the same engine.
#[derive(Clone)]
pub struct FeedEngine {
    inner: Arc<EngineInner>,
}

impl FeedEngine {
    pub fn new(config: EngineConfig, scheduler: PrefetchScheduler) -> Self {
        let connectivity = if scheduler.is_unmetered() {
            Connectivity::Unmetered
        } else {
            Connectivity::Metered
        };
        let state = EngineState {
            registry: Registry::default(),
            active: None,
            direction: ScrollDirection::Unknown,
            feed_len: None,
            lifecycle: AppLifecycle::default(),
            connectivity,
            settle_timers: TimerSet::new("settle"),
            retry_timers: TimerSet::new("retry"),
            cleanup: None,
            generation: 0,
        };
        Self {
            inner: Arc::new(EngineInner {
                config,
                scheduler,
                events: EventHub::default(),
                state: Mutex::new(state),
            }),
        }
    }

    /// Build an engine whose scheduler fetches through `fetcher`.
    pub fn with_fetcher(config: &Config, fetcher: Arc<dyn Fetcher>) -> Self {
        let scheduler = PrefetchScheduler::new(config.prefetch.clone(), fetcher);
        Self::new(config.engine.clone(), scheduler)
    }

    /// Build an engine whose scheduler fetches over HTTP.
    pub fn with_http(config: &Config) -> feedplay_core::Result<Self> {
        let scheduler = PrefetchScheduler::with_http(config.prefetch.clone())?;
        Ok(Self::new(config.engine.clone(), scheduler))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn scheduler(&self) -> &PrefetchScheduler {
        &self.inner.scheduler
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    /// Register an item or update its position and URL.
    ///
    /// Safe to call on every render. A new URL releases the attached handle
    /// and resets playback state; a new index only moves the item.
    pub fn register_or_update(&self, id: impl Into<ItemId>, index: usize, url: Url) {
        let id = id.into();
        self.transact(|state, fx| self.register_locked(state, id, index, url, fx));
    }

    fn register_locked(
        &self,
        state: &mut EngineState,
        id: ItemId,
        index: usize,
        url: Url,
        fx: &mut Effects,
    ) {
        if state.registry.get(&id).is_none() {
            debug!(%id, index, "Registered item");
            state.registry.insert(ItemState::new(id.clone(), index, url));
            fx.touch(&id);
            self.refresh_window_near_locked(state, index, fx);
            if state.active.is_some() && state.registry.len() > self.inner.config.max_cached_items {
                self.schedule_cleanup_locked(state);
            }
            return;
        }

        let generation = state.next_generation();
        let Some(item) = state.registry.get_mut(&id) else {
            return;
        };
        let old_index = item.index;
        let url_changed = item.url != url;
        if url_changed {
            info!(%id, old = %item.url, new = %url, "Item URL changed; resetting playback");
            if let Some(handle) = item.handle.take() {
                fx.release(handle);
            }
            item.url = url;
            item.is_playing = false;
            item.is_buffering = false;
            item.is_preloaded = false;
            item.play_generation = generation;
            item.reset_attempts();
        }

        if url_changed {
            state.cancel_timers(&id);
            self.inner.scheduler.forget(&id);
        }
        if old_index != index {
            debug!(%id, from = old_index, to = index, "Item moved");
            state.registry.set_index(&id, index);
            if let Some(active) = state.active.as_mut().filter(|a| a.id == id) {
                active.index = index;
            }
        }
        if url_changed || old_index != index {
            fx.touch(&id);
            self.refresh_window_near_locked(state, index, fx);
        }
    }

    /// Set the feed length used to clamp the prefetch window. `None` derives
    /// it from the highest registered index.
    pub fn set_feed_length(&self, len: Option<usize>) {
        self.inner.state.lock().feed_len = len;
    }

    // -----------------------------------------------------------------------
    // Handles
    // -----------------------------------------------------------------------

    /// Attach the host's rendering handle to an item.
    ///
    /// A different handle already attached is paused first. If the item is
    /// active, playback starts after the settle delay.
    pub fn attach_handle(&self, id: impl Into<ItemId>, handle: SharedHandle) {
        let id = id.into();
        self.transact(|state, fx| {
            if state.registry.get(&id).is_none() {
                debug!(%id, "attach_handle for unregistered item; ignoring");
                return;
            }

            // A surface belongs to one item at a time.
            let holders: Vec<ItemId> = state
                .registry
                .values()
                .filter(|item| item.id != id)
                .filter(|item| item.handle.as_ref().map_or(false, |h| same_handle(h, &handle)))
                .map(|item| item.id.clone())
                .collect();
            for other in holders {
                warn!(from = %other, to = %id, "Handle re-attached to another item");
                self.drop_handle_locked(state, &other, fx);
            }

            let generation = state.next_generation();
            let is_active = state.is_active(&id);
            let Some(item) = state.registry.get_mut(&id) else {
                return;
            };

            if item.handle.as_ref().map_or(false, |h| same_handle(h, &handle)) {
                if !is_active || item.is_engaged() {
                    debug!(%id, "Handle already attached");
                    return;
                }
                item.reset_attempts();
            } else {
                if let Some(old) = item.handle.replace(handle) {
                    fx.pause(old);
                }
                item.is_playing = false;
                item.is_buffering = false;
                item.play_generation = generation;
                item.reset_attempts();
                debug!(%id, index = item.index, "Handle attached");
            }
            fx.touch(&id);

            state.cancel_timers(&id);
            if is_active {
                self.schedule_settle_locked(state, &id);
            }
        });
    }

    /// Pause and forget the item's handle, keeping the item registered.
    pub fn detach_handle(&self, id: impl Into<ItemId>) {
        let id = id.into();
        self.transact(|state, fx| {
            if state.registry.get(&id).is_none() {
                debug!(%id, "detach_handle for unregistered item; ignoring");
                return;
            }
            self.drop_handle_locked(state, &id, fx);
        });
    }

    fn drop_handle_locked(&self, state: &mut EngineState, id: &ItemId, fx: &mut Effects) {
        state.cancel_timers(id);
        let generation = state.next_generation();
        let Some(item) = state.registry.get_mut(id) else {
            return;
        };
        if let Some(handle) = item.handle.take() {
            debug!(%id, "Handle detached");
            fx.pause(handle);
        }
        item.is_playing = false;
        item.is_buffering = false;
        item.play_generation = generation;
        fx.touch(id);
    }

    // -----------------------------------------------------------------------
    // Active item
    // -----------------------------------------------------------------------

    /// Make the item at `index` the active one.
    ///
    /// Pauses whatever else is playing, starts the new item if it has a
    /// handle, reschedules prefetch, releases handles outside the retention
    /// window and queues an idle cleanup of the registry. Ignored when the
    /// index is already active or nothing is registered there.
    pub fn set_active_index(&self, index: usize) {
        self.transact(|state, fx| {
            let Some(id) = state.registry.id_at(index).cloned() else {
                debug!(index, "No item registered at index; ignoring");
                return;
            };
            if state
                .active
                .as_ref()
                .map_or(false, |a| a.index == index && a.id == id)
            {
                return;
            }

            let previous = state.active.clone();
            let direction = ScrollDirection::between(previous.as_ref().map(|a| a.index), index);

            for other in state.engaged_except(Some(&id)) {
                self.pause_locked(state, &other, fx);
            }
            if let Some(previous) = &previous {
                state.cancel_timers(&previous.id);
                fx.touch(&previous.id);
            }

            let current = ActiveRef {
                index,
                id: id.clone(),
            };
            state.active = Some(current.clone());
            state.direction = direction;
            info!(%id, index, %direction, "Active item changed");

            state.cancel_timers(&id);
            if let Some(item) = state.registry.get_mut(&id) {
                item.reset_attempts();
            }
            self.begin_play_locked(state, &id, fx);

            self.schedule_window_locked(state, fx);
            self.release_outside_retention_locked(state, fx);
            self.schedule_cleanup_locked(state);

            fx.touch(&id);
            fx.global(GlobalEvent::ActiveChanged {
                previous,
                current,
                direction,
            });
        });
    }

    // -----------------------------------------------------------------------
    // Platform signals
    // -----------------------------------------------------------------------

    pub fn handle_signal(&self, signal: PlatformSignal) {
        match signal {
            PlatformSignal::Lifecycle(lifecycle) => self.handle_app_state(lifecycle),
            PlatformSignal::Connectivity(connectivity) => self.handle_connectivity(connectivity),
        }
    }

    /// Pause everything when leaving the foreground; resume the active item
    /// on return.
    pub fn handle_app_state(&self, lifecycle: AppLifecycle) {
        self.transact(|state, fx| {
            let was = state.lifecycle;
            if was == lifecycle {
                return;
            }
            state.lifecycle = lifecycle;
            info!(from = %was, to = %lifecycle, "App lifecycle changed");
            fx.global(GlobalEvent::LifecycleChanged { state: lifecycle });

            if !lifecycle.is_foreground() {
                state.settle_timers.cancel_all();
                state.retry_timers.cancel_all();
                for id in state.engaged_except(None) {
                    self.pause_locked(state, &id, fx);
                }
            } else if !was.is_foreground() {
                let resumable = state.active.as_ref().and_then(|active| {
                    let item = state.registry.get(&active.id)?;
                    item.handle.as_ref()?;
                    Some(active.id.clone())
                });
                if let Some(id) = resumable {
                    debug!(%id, "Resuming active item");
                    self.begin_play_locked(state, &id, fx);
                }
            }
        });
    }

    /// Forward a connectivity change to the scheduler. In-flight prefetches
    /// continue; the next window honours the new policy.
    pub fn handle_connectivity(&self, connectivity: Connectivity) {
        self.transact(|state, fx| {
            if state.connectivity == connectivity {
                return;
            }
            state.connectivity = connectivity;
            info!(%connectivity, "Connectivity changed");
            self.inner.scheduler.set_connectivity(connectivity);
            fx.global(GlobalEvent::ConnectivityChanged { connectivity });
        });
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Release every handle, forget every item and cancel all pending work.
    pub fn clear(&self) {
        self.transact(|state, fx| {
            state.settle_timers.cancel_all();
            state.retry_timers.cancel_all();
            if let Some(cleanup) = state.cleanup.take() {
                cleanup.abort();
            }
            let mut released = 0;
            for handle in state.registry.clear().into_iter().filter_map(|item| item.handle) {
                fx.release(handle);
                released += 1;
            }
            state.active = None;
            state.direction = ScrollDirection::Unknown;
            self.inner.scheduler.clear();
            info!(released, "Engine cleared");
            fx.global(GlobalEvent::Cleared);
        });
    }

    // -----------------------------------------------------------------------
    // Subscriptions
    // -----------------------------------------------------------------------

    /// Observe one item's state changes. Notifications are batched per tick.
    pub fn subscribe<F>(&self, id: impl Into<ItemId>, observer: F) -> SubscriptionId
    where
        F: Fn(&ItemSnapshot) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(id.into(), observer)
    }

    pub fn subscribe_global<F>(&self, observer: F) -> SubscriptionId
    where
        F: Fn(&GlobalEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe_global(observer)
    }

    pub fn unsubscribe(&self, sub: SubscriptionId) -> bool {
        self.inner.events.unsubscribe(sub)
    }

    /// Global events as a broadcast stream.
    pub fn global_events(&self) -> broadcast::Receiver<GlobalEvent> {
        self.inner.events.subscribe_stream()
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn active(&self) -> Option<ActiveRef> {
        self.inner.state.lock().active.clone()
    }

    pub fn snapshot(&self, id: &ItemId) -> Option<ItemSnapshot> {
        self.inner.state.lock().registry.get(id).map(ItemState::snapshot)
    }

    /// Snapshots of all registered items ordered by index.
    pub fn snapshots(&self) -> Vec<ItemSnapshot> {
        let mut snapshots: Vec<ItemSnapshot> = self
            .inner
            .state
            .lock()
            .registry
            .values()
            .map(ItemState::snapshot)
            .collect();
        snapshots.sort_by_key(|s| s.index);
        snapshots
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().registry.is_empty()
    }

    pub fn lifecycle(&self) -> AppLifecycle {
        self.inner.state.lock().lifecycle
    }

    pub fn is_warmed(&self, id: &ItemId) -> bool {
        self.inner.scheduler.is_warmed(id)
    }

    pub fn prefetch_status(&self, id: &ItemId) -> Option<PrefetchEntry> {
        self.inner.scheduler.status(id)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn shape(&self) -> WindowShape {
        WindowShape {
            ahead: self.inner.config.preload_ahead,
            behind: self.inner.config.preload_behind,
        }
    }

    /// Run `f` under the state lock, then apply the effects it collected.
    fn transact<R>(&self, f: impl FnOnce(&mut EngineState, &mut Effects) -> R) -> R {
        let mut fx = Effects::default();
        let result = {
            let mut state = self.inner.state.lock();
            let result = f(&mut state, &mut fx);
            fx.seal(&state.registry);
            result
        };
        fx.apply(self);
        result
    }
}

impl std::fmt::Debug for FeedEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("FeedEngine")
            .field("items", &state.registry.len())
            .field("active", &state.active)
            .field("lifecycle", &state.lifecycle)
            .field(
                "pending_timers",
                &(state.settle_timers.len() + state.retry_timers.len()),
            )
            .field("pending_events", &self.inner.events.pending_len())
            .finish_non_exhaustive()
    }
}
