//! Side effects collected under the engine lock and applied after it.
//!
//! Handle calls and event publication never run while the engine state is
//! locked, so a handle or observer may call back into the engine. Effects are
//! applied in order: pauses and releases first, then events, then play
//! launches, which keeps every pause ahead of the next play.

use std::sync::{Arc, Weak};

use feedplay_core::events::{EventHub, GlobalEvent, ItemSnapshot};
use feedplay_core::ItemId;
use tokio::runtime::Handle;

use super::state::Registry;
use super::{EngineInner, FeedEngine};
use crate::handle::SharedHandle;

enum HandleOp {
    Pause(SharedHandle),
    Release(SharedHandle),
}

/// A play call to launch once the lock is released.
pub(crate) struct PlayLaunch {
    pub id: ItemId,
    pub generation: u64,
    pub handle: SharedHandle,
}

#[derive(Default)]
pub(crate) struct Effects {
    handle_ops: Vec<HandleOp>,
    plays: Vec<PlayLaunch>,
    touched: Vec<ItemId>,
    snapshots: Vec<ItemSnapshot>,
    globals: Vec<GlobalEvent>,
}

impl Effects {
    pub fn pause(&mut self, handle: SharedHandle) {
        self.handle_ops.push(HandleOp::Pause(handle));
    }

    /// Pause, then release.
    pub fn release(&mut self, handle: SharedHandle) {
        self.handle_ops.push(HandleOp::Pause(handle.clone()));
        self.handle_ops.push(HandleOp::Release(handle));
    }

    pub fn play(&mut self, launch: PlayLaunch) {
        self.plays.push(launch);
    }

    /// Mark an item whose snapshot must be published.
    pub fn touch(&mut self, id: &ItemId) {
        if !self.touched.contains(id) {
            self.touched.push(id.clone());
        }
    }

    pub fn global(&mut self, event: GlobalEvent) {
        self.globals.push(event);
    }

    /// Take snapshots of every touched item that is still registered.
    /// Call while still holding the lock.
    pub fn seal(&mut self, registry: &Registry) {
        let touched = std::mem::take(&mut self.touched);
        self.snapshots.extend(
            touched
                .iter()
                .filter_map(|id| registry.get(id))
                .map(|item| item.snapshot()),
        );
    }

    pub fn apply(self, engine: &FeedEngine) {
        for op in self.handle_ops {
            match op {
                HandleOp::Pause(handle) => handle.pause(),
                HandleOp::Release(handle) => handle.release(),
            }
        }

        publish(&engine.inner.events, self.snapshots, self.globals);

        if self.plays.is_empty() {
            return;
        }
        let Ok(runtime) = Handle::try_current() else {
            tracing::warn!(count = self.plays.len(), "No async runtime; play calls dropped");
            return;
        };
        for launch in self.plays {
            let weak = Arc::downgrade(&engine.inner);
            runtime.spawn(run_play(weak, launch));
        }
    }
}

fn publish(events: &EventHub, snapshots: Vec<ItemSnapshot>, globals: Vec<GlobalEvent>) {
    for snapshot in snapshots {
        events.publish_item(snapshot);
    }
    for event in globals {
        events.publish_global(event);
    }
}

async fn run_play(engine: Weak<EngineInner>, launch: PlayLaunch) {
    let result = launch.handle.play().await;
    match engine.upgrade() {
        Some(inner) => FeedEngine { inner }.finish_play(launch, result),
        // Engine dropped while the call was in flight.
        None if result.is_ok() => launch.handle.pause(),
        None => {}
    }
}
