//! Play, pause and retry.
//!
//! Each play launch carries a generation number. Pausing, detaching or
//! re-launching bumps the item's generation, so an outcome arriving for an
//! older launch is recognized as stale: a stale success is paused again
//! unless the same handle is legitimately playing, and a stale failure is
//! ignored.

use std::sync::Arc;

use feedplay_core::ItemId;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::effects::{Effects, PlayLaunch};
use super::{EngineState, FeedEngine};
use crate::handle::{same_handle, PlayError};

impl FeedEngine {
    /// Play an item now, pausing any other item first.
    ///
    /// Without an attached handle the item is only marked preloaded; it
    /// starts once a handle is attached while it is active.
    pub fn play(&self, id: impl Into<ItemId>) {
        let id = id.into();
        self.transact(|state, fx| {
            if state.registry.get(&id).is_none() {
                debug!(%id, "play for unregistered item; ignoring");
                return;
            }
            for other in state.engaged_except(Some(&id)) {
                self.pause_locked(state, &other, fx);
            }
            state.cancel_timers(&id);
            self.begin_play_locked(state, &id, fx);
        });
    }

    /// Pause an item. Does nothing unless it is playing or starting to.
    pub fn pause(&self, id: impl Into<ItemId>) {
        let id = id.into();
        self.transact(|state, fx| self.pause_locked(state, &id, fx));
    }

    pub(super) fn pause_locked(&self, state: &mut EngineState, id: &ItemId, fx: &mut Effects) {
        let engaged = state.registry.get(id).map_or(false, |item| item.is_engaged());
        if !engaged {
            return;
        }
        state.cancel_timers(id);
        let generation = state.next_generation();
        let Some(item) = state.registry.get_mut(id) else {
            return;
        };
        item.is_playing = false;
        item.is_buffering = false;
        item.play_generation = generation;
        if let Some(handle) = &item.handle {
            fx.pause(Arc::clone(handle));
        }
        debug!(%id, index = item.index, "Paused");
        fx.touch(id);
    }

    /// Launch a play call for `id` if it has a handle and is not already
    /// engaged. Retry counters are left alone.
    pub(super) fn begin_play_locked(&self, state: &mut EngineState, id: &ItemId, fx: &mut Effects) {
        let foreground = state.lifecycle.is_foreground();
        let generation = state.next_generation();
        let Some(item) = state.registry.get_mut(id) else {
            debug!(%id, "play for unregistered item; ignoring");
            return;
        };
        let Some(handle) = item.handle.clone() else {
            item.is_preloaded = true;
            fx.touch(id);
            return;
        };
        if item.is_engaged() {
            return;
        }
        if !foreground {
            debug!(%id, "App not in foreground; play deferred");
            return;
        }

        item.is_buffering = true;
        item.play_generation = generation;
        debug!(%id, index = item.index, attempt = item.retry_count, "Starting play");
        fx.touch(id);
        fx.play(PlayLaunch {
            id: id.clone(),
            generation,
            handle,
        });
    }

    /// Record the outcome of a play launch.
    pub(super) fn finish_play(&self, launch: PlayLaunch, result: Result<(), PlayError>) {
        self.transact(|state, fx| {
            let max_retries = self.inner.config.max_retries;
            let Some(item) = state.registry.get_mut(&launch.id) else {
                if result.is_ok() {
                    fx.pause(launch.handle);
                }
                return;
            };

            let same = item
                .handle
                .as_ref()
                .map_or(false, |h| same_handle(h, &launch.handle));
            if !same || item.play_generation != launch.generation {
                debug!(id = %launch.id, "Discarding stale play outcome");
                if result.is_ok() && !(same && item.is_engaged()) {
                    fx.pause(launch.handle);
                }
                return;
            }

            item.is_buffering = false;
            fx.touch(&launch.id);
            let err = match result {
                Ok(()) => {
                    item.is_playing = true;
                    item.reset_attempts();
                    info!(id = %launch.id, index = item.index, "Playing");
                    return;
                }
                Err(err) => err,
            };

            item.is_playing = false;
            item.error = Some(err.to_string());

            if err.is_surface_lost() {
                item.retry_count += 1;
                item.handle = None;
                warn!(
                    id = %launch.id,
                    error = %err,
                    "Rendering surface lost; waiting for a new handle"
                );
                state.retry_timers.cancel(&launch.id);
                return;
            }

            if item.retry_count >= max_retries {
                warn!(
                    id = %launch.id,
                    retries = item.retry_count,
                    error = %err,
                    "Play failed; retries exhausted"
                );
                return;
            }

            item.retry_count += 1;
            item.last_retry_at = Some(Instant::now());
            let attempt = item.retry_count;
            let delay = self.inner.config.retry_delay(attempt);
            warn!(
                id = %launch.id,
                attempt,
                ?delay,
                error = %err,
                "Play failed; retrying"
            );

            let weak = Arc::downgrade(&self.inner);
            let id = launch.id.clone();
            state.retry_timers.schedule(launch.id, delay, move |seq| async move {
                if let Some(inner) = weak.upgrade() {
                    FeedEngine { inner }.retry_fired(id, seq);
                }
            });
        });
    }

    fn retry_fired(&self, id: ItemId, seq: u64) {
        self.transact(|state, fx| {
            if !state.retry_timers.complete(&id, seq) {
                return;
            }
            if !state.is_active(&id) {
                debug!(%id, "Retry skipped; item no longer active");
                return;
            }
            let Some(item) = state.registry.get(&id).filter(|item| item.handle.is_some()) else {
                debug!(%id, "Retry skipped; no handle attached");
                return;
            };
            debug!(
                %id,
                attempt = item.retry_count,
                waited = ?item.last_retry_at.map(|at| at.elapsed()),
                "Retrying play"
            );
            self.begin_play_locked(state, &id, fx);
        });
    }

    /// Start the settle delay before playing a freshly attached handle.
    pub(super) fn schedule_settle_locked(&self, state: &mut EngineState, id: &ItemId) {
        let weak = Arc::downgrade(&self.inner);
        let target = id.clone();
        state
            .settle_timers
            .schedule(id.clone(), self.inner.config.settle_delay(), move |seq| async move {
                if let Some(inner) = weak.upgrade() {
                    FeedEngine { inner }.settle_fired(target, seq);
                }
            });
    }

    fn settle_fired(&self, id: ItemId, seq: u64) {
        self.transact(|state, fx| {
            if !state.settle_timers.complete(&id, seq) {
                return;
            }
            if !state.is_active(&id) {
                return;
            }
            self.begin_play_locked(state, &id, fx);
        });
    }
}
