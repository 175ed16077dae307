//! Shared test harness for engine integration tests.
//!
//! Provides [`FakeHandle`], a scripted rendering handle recording every call,
//! [`FakeFetcher`], an in-memory manifest source, and [`Harness`], which wires
//! both into a [`FeedEngine`] built from the default (desktop) configuration.

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use feedplay::{FeedEngine, PlayError, RenderingHandle, SharedHandle};
use feedplay_core::config::Config;
use feedplay_core::events::GlobalEvent;
use feedplay_core::{Error, ItemId};
use feedplay_prefetch::Fetcher;
use parking_lot::Mutex;
use url::Url;

/// A media playlist with two segments.
pub const MEDIA_PLAYLIST: &str = "#EXTM3U\n\
#EXT-X-TARGETDURATION:4\n\
#EXTINF:4.0,\n\
seg0.ts\n\
#EXTINF:4.0,\n\
seg1.ts\n\
#EXT-X-ENDLIST\n";

// ---------------------------------------------------------------------------
// FakeHandle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Play,
    Pause,
    Release,
}

/// Rendering handle whose `play` outcomes are scripted.
///
/// Unscripted plays succeed. A successful play marks the handle playing; a
/// pause or release clears it.
pub struct FakeHandle {
    pub label: String,
    latency: Duration,
    script: Mutex<VecDeque<Result<(), PlayError>>>,
    calls: Mutex<Vec<Call>>,
    playing: AtomicBool,
}

impl FakeHandle {
    pub fn new(label: &str) -> Arc<Self> {
        Self::with_latency(label, Duration::ZERO)
    }

    pub fn with_latency(label: &str, latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            latency,
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            playing: AtomicBool::new(false),
        })
    }

    /// Queue outcomes for the next play calls.
    pub fn script(&self, results: impl IntoIterator<Item = Result<(), PlayError>>) {
        self.script.lock().extend(results);
    }

    pub fn shared(self: &Arc<Self>) -> SharedHandle {
        self.clone()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn count(&self, call: Call) -> usize {
        self.calls.lock().iter().filter(|c| **c == call).count()
    }

    pub fn plays(&self) -> usize {
        self.count(Call::Play)
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RenderingHandle for FakeHandle {
    async fn play(&self) -> Result<(), PlayError> {
        self.calls.lock().push(Call::Play);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let outcome = self.script.lock().pop_front().unwrap_or(Ok(()));
        if outcome.is_ok() {
            self.playing.store(true, Ordering::SeqCst);
        }
        outcome
    }

    fn pause(&self) {
        self.calls.lock().push(Call::Pause);
        self.playing.store(false, Ordering::SeqCst);
    }

    fn release(&self) {
        self.calls.lock().push(Call::Release);
        self.playing.store(false, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// FakeFetcher
// ---------------------------------------------------------------------------

/// Serves [`MEDIA_PLAYLIST`] for every manifest URL and records requests.
#[derive(Default)]
pub struct FakeFetcher {
    manifests: Mutex<Vec<Url>>,
    ranges: AtomicUsize,
    failing: Mutex<HashSet<Url>>,
}

impl FakeFetcher {
    pub fn fail(&self, url: &Url) {
        self.failing.lock().insert(url.clone());
    }

    pub fn manifest_requests(&self) -> Vec<Url> {
        self.manifests.lock().clone()
    }

    pub fn range_requests(&self) -> usize {
        self.ranges.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch_manifest(&self, url: &Url) -> feedplay_core::Result<String> {
        self.manifests.lock().push(url.clone());
        if self.failing.lock().contains(url) {
            return Err(Error::http(500, url));
        }
        Ok(MEDIA_PLAYLIST.to_string())
    }

    async fn fetch_range(&self, _url: &Url, len: u64) -> feedplay_core::Result<u64> {
        self.ranges.fetch_add(1, Ordering::SeqCst);
        Ok(len)
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// Engine wired to a [`FakeFetcher`], with helpers for feeds of items
/// `item-0`, `item-1`, ...
pub struct Harness {
    pub engine: FeedEngine,
    pub fetcher: Arc<FakeFetcher>,
    events: Arc<Mutex<Vec<GlobalEvent>>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let fetcher = Arc::new(FakeFetcher::default());
        let engine = FeedEngine::with_fetcher(&config, fetcher.clone());
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        engine.subscribe_global(move |event| sink.lock().push(event.clone()));
        Self {
            engine,
            fetcher,
            events,
        }
    }

    pub fn id(index: usize) -> ItemId {
        ItemId::new(format!("item-{index}"))
    }

    pub fn url(index: usize) -> Url {
        Url::parse(&format!("https://cdn.test/v/{index}/index.m3u8")).unwrap()
    }

    /// Register items at indices `0..count`.
    pub fn register(&self, count: usize) {
        for index in 0..count {
            self.engine
                .register_or_update(Self::id(index), index, Self::url(index));
        }
    }

    /// Attach a fresh fake handle to the item at `index`.
    pub fn attach(&self, index: usize) -> Arc<FakeHandle> {
        let handle = FakeHandle::new(&format!("handle-{index}"));
        self.engine.attach_handle(Self::id(index), handle.shared());
        handle
    }

    pub fn is_playing(&self, index: usize) -> bool {
        self.engine
            .snapshot(&Self::id(index))
            .map_or(false, |s| s.is_playing)
    }

    /// Global events delivered so far.
    pub fn events(&self) -> Vec<GlobalEvent> {
        self.events.lock().clone()
    }
}

/// Let paused virtual time run forward.
pub async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}
