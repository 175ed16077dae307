//! Batched observer registry for item state changes and global events.
//!
//! [`EventHub`] keeps per-item observers keyed by [`ItemId`] plus a global
//! observer list. Publications are queued and delivered by a single deferred
//! flush task per tick, so several mutations of one item inside the same
//! engine call reach observers as one notification carrying the latest
//! snapshot. Global events are also mirrored on a `tokio::sync::broadcast`
//! channel for hosts that prefer a stream.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::ids::ItemId;
use crate::media::{AppLifecycle, Connectivity, ScrollDirection};

/// Default capacity of the global broadcast channel.
const BROADCAST_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Observable state of one registered item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemSnapshot {
    pub id: ItemId,
    pub index: usize,
    pub url: String,
    pub is_playing: bool,
    pub is_buffering: bool,
    pub is_preloaded: bool,
    pub has_handle: bool,
    pub retry_count: u32,
    /// Last playback error, kept until the next successful play.
    pub error: Option<String>,
}

/// Position and identity of the active item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveRef {
    pub index: usize,
    pub id: ItemId,
}

/// Feed-wide events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GlobalEvent {
    ActiveChanged {
        previous: Option<ActiveRef>,
        current: ActiveRef,
        direction: ScrollDirection,
    },
    ItemEvicted {
        id: ItemId,
        index: usize,
    },
    LifecycleChanged {
        state: AppLifecycle,
    },
    ConnectivityChanged {
        connectivity: Connectivity,
    },
    Cleared,
}

// ---------------------------------------------------------------------------
// Observers
// ---------------------------------------------------------------------------

/// Callback receiving item snapshots.
pub type ItemObserver = Arc<dyn Fn(&ItemSnapshot) + Send + Sync>;

/// Callback receiving global events.
pub type GlobalObserver = Arc<dyn Fn(&GlobalEvent) + Send + Sync>;

/// Token returned by the subscribe methods, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct HubState {
    next_id: u64,
    item_observers: HashMap<ItemId, Vec<(SubscriptionId, ItemObserver)>>,
    global_observers: Vec<(SubscriptionId, GlobalObserver)>,
    /// Ids in first-publication order; snapshots hold the latest value.
    pending_order: Vec<ItemId>,
    pending_items: HashMap<ItemId, ItemSnapshot>,
    pending_global: Vec<GlobalEvent>,
    flush_scheduled: bool,
}

impl HubState {
    fn next_subscription(&mut self) -> SubscriptionId {
        self.next_id += 1;
        SubscriptionId(self.next_id)
    }
}

struct HubInner {
    state: Mutex<HubState>,
    tx: broadcast::Sender<GlobalEvent>,
}

// ---------------------------------------------------------------------------
// EventHub
// ---------------------------------------------------------------------------

/// Observer registry with tick-batched delivery.
#[derive(Clone)]
pub struct EventHub {
    inner: Arc<HubInner>,
}

impl EventHub {
    /// Create a hub whose broadcast mirror buffers `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(HubInner {
                state: Mutex::new(HubState::default()),
                tx,
            }),
        }
    }

    /// Observe state changes of a single item.
    pub fn subscribe<F>(&self, id: ItemId, observer: F) -> SubscriptionId
    where
        F: Fn(&ItemSnapshot) + Send + Sync + 'static,
    {
        let mut state = self.inner.state.lock();
        let sub = state.next_subscription();
        state
            .item_observers
            .entry(id)
            .or_default()
            .push((sub, Arc::new(observer)));
        sub
    }

    /// Observe feed-wide events.
    pub fn subscribe_global<F>(&self, observer: F) -> SubscriptionId
    where
        F: Fn(&GlobalEvent) + Send + Sync + 'static,
    {
        let mut state = self.inner.state.lock();
        let sub = state.next_subscription();
        state.global_observers.push((sub, Arc::new(observer)));
        sub
    }

    /// Receive global events as a broadcast stream.
    pub fn subscribe_stream(&self) -> broadcast::Receiver<GlobalEvent> {
        self.inner.tx.subscribe()
    }

    /// Remove an observer. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, sub: SubscriptionId) -> bool {
        let mut state = self.inner.state.lock();

        let before = state.global_observers.len();
        state.global_observers.retain(|(s, _)| *s != sub);
        if state.global_observers.len() != before {
            return true;
        }

        let mut removed = false;
        state.item_observers.retain(|_, observers| {
            let len = observers.len();
            observers.retain(|(s, _)| *s != sub);
            removed |= observers.len() != len;
            !observers.is_empty()
        });
        removed
    }

    /// Queue an item snapshot, replacing any snapshot of the same item that
    /// has not been delivered yet.
    pub fn publish_item(&self, snapshot: ItemSnapshot) {
        let flush_inline = {
            let mut state = self.inner.state.lock();
            if !state.pending_items.contains_key(&snapshot.id) {
                state.pending_order.push(snapshot.id.clone());
            }
            state.pending_items.insert(snapshot.id.clone(), snapshot);
            self.schedule_flush(&mut state)
        };
        if flush_inline {
            self.flush();
        }
    }

    /// Queue a global event. Consecutive `ActiveChanged` events within a tick
    /// collapse into one spanning the whole move.
    pub fn publish_global(&self, event: GlobalEvent) {
        let flush_inline = {
            let mut state = self.inner.state.lock();
            let merged = match (state.pending_global.last_mut(), &event) {
                (
                    Some(GlobalEvent::ActiveChanged {
                        current, direction, ..
                    }),
                    GlobalEvent::ActiveChanged {
                        current: next,
                        direction: next_direction,
                        ..
                    },
                ) => {
                    *current = next.clone();
                    *direction = *next_direction;
                    true
                }
                _ => false,
            };
            if !merged {
                state.pending_global.push(event);
            }
            self.schedule_flush(&mut state)
        };
        if flush_inline {
            self.flush();
        }
    }

    /// Deliver everything queued so far, synchronously, on the caller's thread.
    pub fn flush(&self) {
        let (items, globals, item_observers, global_observers) = {
            let mut state = self.inner.state.lock();
            state.flush_scheduled = false;
            let order = std::mem::take(&mut state.pending_order);
            let mut snapshots = std::mem::take(&mut state.pending_items);
            let items: Vec<ItemSnapshot> =
                order.into_iter().filter_map(|id| snapshots.remove(&id)).collect();
            let globals = std::mem::take(&mut state.pending_global);

            let item_observers: Vec<(ItemId, Vec<ItemObserver>)> = items
                .iter()
                .filter_map(|snap| {
                    state.item_observers.get(&snap.id).map(|obs| {
                        (snap.id.clone(), obs.iter().map(|(_, f)| Arc::clone(f)).collect())
                    })
                })
                .collect();
            let global_observers: Vec<GlobalObserver> = state
                .global_observers
                .iter()
                .map(|(_, f)| Arc::clone(f))
                .collect();
            (items, globals, item_observers, global_observers)
        };

        for snapshot in &items {
            if let Some((_, observers)) = item_observers.iter().find(|(id, _)| *id == snapshot.id) {
                for observer in observers {
                    observer(snapshot);
                }
            }
        }

        for event in globals {
            for observer in &global_observers {
                observer(&event);
            }
            // Ignore send errors (no stream subscribers).
            let _ = self.inner.tx.send(event);
        }
    }

    /// Number of queued, undelivered publications.
    pub fn pending_len(&self) -> usize {
        let state = self.inner.state.lock();
        state.pending_items.len() + state.pending_global.len()
    }

    /// Arrange for one deferred flush. Returns `true` when no runtime is
    /// available and the caller must flush inline after releasing the lock.
    fn schedule_flush(&self, state: &mut HubState) -> bool {
        if state.flush_scheduled {
            return false;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                state.flush_scheduled = true;
                let hub = self.clone();
                runtime.spawn(async move {
                    // Let the publishing call stack finish its batch first.
                    tokio::task::yield_now().await;
                    hub.flush();
                });
                false
            }
            Err(_) => true,
        }
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(BROADCAST_CAPACITY)
    }
}
