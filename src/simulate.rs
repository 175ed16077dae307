//! Scripted scroll sessions against logging rendering handles.
//!
//! Used by the `feedplay simulate` command to watch the engine's decisions
//! (active changes, handle retention, prefetch windows) for a list of real
//! manifest URLs without a UI.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use feedplay_core::events::{GlobalEvent, ItemSnapshot};
use feedplay_core::ItemId;
use feedplay_prefetch::{window, PrefetchEntry, WindowShape};
use serde::Serialize;
use tokio::sync::broadcast::error::TryRecvError;
use tracing::info;
use url::Url;

use crate::engine::FeedEngine;
use crate::handle::{PlayError, RenderingHandle, SharedHandle};

/// A rendering handle that only logs what it is asked to do.
pub struct LoggingHandle {
    label: String,
    latency: Duration,
    playing: AtomicBool,
    plays: AtomicUsize,
}

impl LoggingHandle {
    pub fn new(label: impl Into<String>, latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            latency,
            playing: AtomicBool::new(false),
            plays: AtomicUsize::new(0),
        })
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    pub fn play_count(&self) -> usize {
        self.plays.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RenderingHandle for LoggingHandle {
    async fn play(&self) -> Result<(), PlayError> {
        self.plays.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        self.playing.store(true, Ordering::SeqCst);
        info!(handle = %self.label, "play");
        Ok(())
    }

    fn pause(&self) {
        if self.playing.swap(false, Ordering::SeqCst) {
            info!(handle = %self.label, "pause");
        }
    }

    fn release(&self) {
        self.playing.store(false, Ordering::SeqCst);
        info!(handle = %self.label, "release");
    }
}

/// What a simulated session produced.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub events: Vec<GlobalEvent>,
    pub items: Vec<ItemSnapshot>,
    pub prefetch: Vec<PrefetchEntry>,
}

/// Id given to the item at `index` in simulated feeds.
pub fn item_id(index: usize) -> ItemId {
    ItemId::new(format!("item-{index}"))
}

/// Register `urls` as a feed, then visit `steps` in order, staying `dwell`
/// on each. Like a real feed, cells within the retention window of the
/// current index are mounted (given a handle) as the user arrives.
pub async fn run(
    engine: &FeedEngine,
    urls: &[Url],
    steps: &[usize],
    dwell: Duration,
    play_latency: Duration,
) -> SimulationReport {
    let mut events_rx = engine.global_events();
    for (index, url) in urls.iter().enumerate() {
        engine.register_or_update(item_id(index), index, url.clone());
    }

    let shape = WindowShape {
        ahead: engine.config().preload_ahead,
        behind: engine.config().preload_behind,
    };
    for &step in steps {
        info!(step, "Scrolling");
        engine.set_active_index(step);
        for index in window::retention_range(step, shape).filter(|i| *i < urls.len()) {
            let id = item_id(index);
            let mounted = engine.snapshot(&id).map_or(true, |s| s.has_handle);
            if !mounted {
                let handle: SharedHandle = LoggingHandle::new(id.to_string(), play_latency);
                engine.attach_handle(id, handle);
            }
        }
        tokio::time::sleep(dwell).await;
    }

    let mut events = Vec::new();
    loop {
        match events_rx.try_recv() {
            Ok(event) => events.push(event),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }

    SimulationReport {
        events,
        items: engine.snapshots(),
        prefetch: engine.scheduler().entries(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn logging_handle_tracks_state() {
        let handle = LoggingHandle::new("a", Duration::from_millis(10));
        handle.play().await.unwrap();
        assert!(handle.is_playing());
        assert_eq!(handle.play_count(), 1);

        handle.pause();
        assert!(!handle.is_playing());
        handle.release();
        assert!(!handle.is_playing());
    }

    #[test]
    fn simulated_ids_follow_index() {
        assert_eq!(item_id(3).as_str(), "item-3");
    }
}
