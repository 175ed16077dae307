//! The prefetch scheduler.
//!
//! [`PrefetchScheduler::schedule`] turns the active index and scroll direction
//! into a priority-ordered queue of [`Candidate`]s, replacing whatever was
//! queued before. A pump launches warm operations while fewer than
//! `max_concurrent` are in flight and runs again whenever one finishes.
//! Concurrent warms of the same item share one spawned task through a
//! [`futures::future::Shared`] handle, so the manifest is fetched once.
//!
//! Warm failures are recorded on the cache entry and logged; nothing is ever
//! returned to the caller as an error.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use feedplay_core::config::PrefetchConfig;
use feedplay_core::{Connectivity, ItemId, PrefetchStatus, Priority, Result, ScrollDirection};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{PrefetchCache, PrefetchEntry};
use crate::fetcher::{Fetcher, HttpFetcher};
use crate::manifest::{self, ManifestKind};
use crate::window::{self, WindowShape};

/// Shared outcome of one warm operation. Resolves to `Loaded` or `Error`.
pub type WarmFuture = Shared<BoxFuture<'static, PrefetchStatus>>;

/// An item the scheduler may warm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub id: ItemId,
    pub index: usize,
    pub url: Url,
    pub priority: Priority,
}

struct InFlight {
    /// Distinguishes this launch from a later one for the same id.
    ticket: u64,
    future: WarmFuture,
    abort: AbortHandle,
}

struct SchedulerState {
    cache: PrefetchCache,
    queue: VecDeque<Candidate>,
    in_flight: HashMap<ItemId, InFlight>,
    unmetered: bool,
    active: Option<usize>,
    window_ids: HashSet<ItemId>,
    next_ticket: u64,
}

struct Inner {
    config: PrefetchConfig,
    fetcher: Arc<dyn Fetcher>,
    state: Mutex<SchedulerState>,
}

/// Result of a successful warm.
struct Warmed {
    manifest_body: String,
    segment_urls: Vec<Url>,
}

/// Cheaply cloneable handle to a prefetch scheduler.
#[derive(Clone)]
pub struct PrefetchScheduler {
    inner: Arc<Inner>,
}

impl PrefetchScheduler {
    /// Create a scheduler using `fetcher` for all network access.
    pub fn new(config: PrefetchConfig, fetcher: Arc<dyn Fetcher>) -> Self {
        let state = SchedulerState {
            cache: PrefetchCache::new(config.max_cache_size),
            queue: VecDeque::new(),
            in_flight: HashMap::new(),
            unmetered: Connectivity::default().is_unmetered(),
            active: None,
            window_ids: HashSet::new(),
            next_ticket: 0,
        };
        Self {
            inner: Arc::new(Inner {
                config,
                fetcher,
                state: Mutex::new(state),
            }),
        }
    }

    /// Create a scheduler backed by [`HttpFetcher`].
    pub fn with_http(config: PrefetchConfig) -> Result<Self> {
        let fetcher = HttpFetcher::new(&config)?;
        Ok(Self::new(config, Arc::new(fetcher)))
    }

    pub fn config(&self) -> &PrefetchConfig {
        &self.inner.config
    }

    /// Update the network-type flag. Affects the next window only; in-flight
    /// work continues.
    pub fn set_connectivity(&self, connectivity: Connectivity) {
        let mut state = self.inner.state.lock();
        let unmetered = connectivity.is_unmetered();
        if state.unmetered != unmetered {
            debug!(%connectivity, "Prefetch connectivity changed");
        }
        state.unmetered = unmetered;
    }

    pub fn is_unmetered(&self) -> bool {
        self.inner.state.lock().unmetered
    }

    /// Compute the window around `active`, replace the queue with it and
    /// start as much work as the concurrency cap allows.
    ///
    /// `resolve` maps a feed index to the item registered there; indices it
    /// does not know are skipped. Returns every candidate of the window,
    /// including ones skipped because they are already loaded or in flight.
    pub fn schedule<F>(
        &self,
        active: usize,
        direction: ScrollDirection,
        feed_len: usize,
        shape: WindowShape,
        resolve: F,
    ) -> Vec<Candidate>
    where
        F: Fn(usize) -> Option<(ItemId, Url)>,
    {
        let candidates = {
            let mut state = self.inner.state.lock();
            let slots = window::compute(active, direction, feed_len, shape, state.unmetered);
            let mut candidates: Vec<Candidate> = slots
                .into_iter()
                .filter_map(|slot| {
                    let (id, url) = resolve(slot.index)?;
                    Some(Candidate {
                        id,
                        index: slot.index,
                        url,
                        priority: slot.priority,
                    })
                })
                .collect();
            candidates.sort_by_key(|c| c.priority);

            state.active = Some(active);
            state.window_ids = candidates.iter().map(|c| c.id.clone()).collect();

            let mut queue = VecDeque::with_capacity(candidates.len());
            for candidate in &candidates {
                if self.refresh_existing(&mut state, candidate) {
                    continue;
                }
                state.cache.insert(PrefetchEntry::new(
                    candidate.id.clone(),
                    candidate.index,
                    candidate.url.clone(),
                    candidate.priority,
                ));
                queue.push_back(candidate.clone());
            }
            state.queue = queue;

            // Pending entries that fell out of the window were never started.
            let window_ids = std::mem::take(&mut state.window_ids);
            let stale: Vec<ItemId> = state
                .cache
                .iter()
                .filter(|e| e.status == PrefetchStatus::Pending && !window_ids.contains(&e.id))
                .map(|e| e.id.clone())
                .collect();
            for id in stale {
                state.cache.remove(&id);
            }
            state.window_ids = window_ids;

            self.evict_locked(&mut state, &HashSet::new());

            debug!(
                active,
                %direction,
                window = candidates.len(),
                queued = state.queue.len(),
                in_flight = state.in_flight.len(),
                "Prefetch window scheduled"
            );
            candidates
        };

        self.pump();
        candidates
    }

    /// Warm one item directly, bypassing the queue.
    ///
    /// Joins the in-flight warm for the same id if there is one; resolves
    /// immediately when the entry is already loaded for the same URL.
    pub fn prefetch(&self, candidate: Candidate) -> WarmFuture {
        let mut state = self.inner.state.lock();
        if let Some(in_flight) = state.in_flight.get(&candidate.id) {
            let same_url = state
                .cache
                .get(&candidate.id)
                .map_or(false, |e| e.url == candidate.url);
            if same_url {
                return in_flight.future.clone();
            }
        }
        if let Some(entry) = state.cache.get(&candidate.id) {
            if entry.is_loaded() && entry.url == candidate.url {
                return futures::future::ready(PrefetchStatus::Loaded).boxed().shared();
            }
        }

        let Ok(runtime) = Handle::try_current() else {
            warn!(id = %candidate.id, "No async runtime; prefetch skipped");
            return futures::future::ready(PrefetchStatus::Error).boxed().shared();
        };
        state.queue.retain(|queued| queued.id != candidate.id);
        let id = candidate.id.clone();
        self.launch_locked(&mut state, candidate, &runtime);

        // Direct warms outlive the window; only settled entries make room.
        let pinned: HashSet<ItemId> = state.in_flight.keys().cloned().collect();
        self.evict_locked(&mut state, &pinned);
        match state.in_flight.get(&id) {
            Some(in_flight) => in_flight.future.clone(),
            None => futures::future::ready(PrefetchStatus::Error).boxed().shared(),
        }
    }

    /// Whether the item's manifest has been fetched and parsed.
    pub fn is_warmed(&self, id: &ItemId) -> bool {
        self.inner
            .state
            .lock()
            .cache
            .get(id)
            .map_or(false, PrefetchEntry::is_loaded)
    }

    /// Snapshot of the item's cache entry.
    pub fn status(&self, id: &ItemId) -> Option<PrefetchEntry> {
        self.inner.state.lock().cache.get(id).cloned()
    }

    /// Drop everything known about one item, cancelling its work.
    pub fn forget(&self, id: &ItemId) {
        let mut state = self.inner.state.lock();
        state.queue.retain(|queued| &queued.id != id);
        if let Some(in_flight) = state.in_flight.remove(id) {
            in_flight.abort.abort();
        }
        state.cache.remove(id);
    }

    /// Cancel all work and empty the cache.
    pub fn clear(&self) {
        let mut state = self.inner.state.lock();
        for (id, in_flight) in state.in_flight.drain() {
            debug!(%id, "Cancelling in-flight prefetch");
            in_flight.abort.abort();
        }
        state.queue.clear();
        state.cache.clear();
        state.window_ids.clear();
        state.active = None;
    }

    pub fn in_flight_count(&self) -> usize {
        self.inner.state.lock().in_flight.len()
    }

    /// Ids waiting in the queue, in launch order.
    pub fn queued(&self) -> Vec<ItemId> {
        self.inner
            .state
            .lock()
            .queue
            .iter()
            .map(|c| c.id.clone())
            .collect()
    }

    pub fn cache_len(&self) -> usize {
        self.inner.state.lock().cache.len()
    }

    /// Snapshot of every cache entry, sorted by index.
    pub fn entries(&self) -> Vec<PrefetchEntry> {
        let mut entries: Vec<PrefetchEntry> =
            self.inner.state.lock().cache.iter().cloned().collect();
        entries.sort_by_key(|e| e.index);
        entries
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Update an entry that needs no new work. Returns `false` when the
    /// candidate has to be queued.
    fn refresh_existing(&self, state: &mut SchedulerState, candidate: &Candidate) -> bool {
        let Some(entry) = state.cache.get_mut(&candidate.id) else {
            return false;
        };
        if entry.url != candidate.url {
            if let Some(in_flight) = state.in_flight.remove(&candidate.id) {
                in_flight.abort.abort();
            }
            state.cache.remove(&candidate.id);
            return false;
        }
        entry.index = candidate.index;
        entry.priority = candidate.priority;
        // Failed entries stay failed; the item is fetched on demand once active.
        entry.status != PrefetchStatus::Pending
    }

    /// Launch queued candidates while under the concurrency cap.
    fn pump(&self) {
        let Ok(runtime) = Handle::try_current() else {
            debug!("No async runtime; prefetch queue left idle");
            return;
        };
        let mut state = self.inner.state.lock();
        while state.in_flight.len() < self.inner.config.max_concurrent {
            let Some(candidate) = state.queue.pop_front() else {
                break;
            };
            if state.in_flight.contains_key(&candidate.id) {
                continue;
            }
            self.launch_locked(&mut state, candidate, &runtime);
        }
    }

    fn launch_locked(
        &self,
        state: &mut SchedulerState,
        candidate: Candidate,
        runtime: &Handle,
    ) {
        state.next_ticket += 1;
        let ticket = state.next_ticket;

        let mut entry = state.cache.remove(&candidate.id).unwrap_or_else(|| {
            PrefetchEntry::new(
                candidate.id.clone(),
                candidate.index,
                candidate.url.clone(),
                candidate.priority,
            )
        });
        entry.index = candidate.index;
        entry.priority = candidate.priority;
        entry.status = PrefetchStatus::Loading;
        entry.error = None;
        state.cache.insert(entry);

        debug!(
            id = %candidate.id,
            index = candidate.index,
            priority = %candidate.priority,
            "Starting prefetch"
        );

        let id = candidate.id.clone();
        let this = self.clone();
        let task = runtime.spawn(async move { this.run_warm(ticket, candidate).await });
        let abort = task.abort_handle();
        let future: WarmFuture = task
            .map(|joined| joined.unwrap_or(PrefetchStatus::Error))
            .boxed()
            .shared();

        let previous = state.in_flight.insert(
            id,
            InFlight {
                ticket,
                future,
                abort,
            },
        );
        if let Some(previous) = previous {
            previous.abort.abort();
        }
    }

    async fn run_warm(self, ticket: u64, candidate: Candidate) -> PrefetchStatus {
        let result = self.warm(&candidate).await;
        let status = if result.is_ok() {
            PrefetchStatus::Loaded
        } else {
            PrefetchStatus::Error
        };

        {
            let mut state = self.inner.state.lock();
            let current = state
                .in_flight
                .get(&candidate.id)
                .map_or(false, |f| f.ticket == ticket);
            if !current {
                debug!(id = %candidate.id, "Discarding superseded prefetch result");
                return status;
            }
            state.in_flight.remove(&candidate.id);

            if let Some(entry) = state.cache.get_mut(&candidate.id) {
                match result {
                    Ok(warmed) => {
                        info!(
                            id = %candidate.id,
                            index = candidate.index,
                            segments = warmed.segment_urls.len(),
                            "Prefetch loaded"
                        );
                        entry.status = PrefetchStatus::Loaded;
                        entry.manifest_body = Some(warmed.manifest_body);
                        entry.segment_urls = Some(warmed.segment_urls);
                        entry.loaded_at = Some(Utc::now());
                        entry.error = None;
                    }
                    Err(e) => {
                        warn!(
                            id = %candidate.id,
                            url = %candidate.url,
                            error = %e,
                            transient = e.is_transient(),
                            "Prefetch failed"
                        );
                        entry.status = PrefetchStatus::Error;
                        entry.error = Some(e.to_string());
                    }
                }
            }
        }

        self.pump();
        status
    }

    async fn warm(&self, candidate: &Candidate) -> Result<Warmed> {
        let config = &self.inner.config;
        let fetcher = &self.inner.fetcher;

        let mut manifest_url = candidate.url.clone();
        let mut body = fetcher.fetch_manifest(&manifest_url).await?;
        let mut parsed = manifest::parse(&body, &manifest_url)?;

        if parsed.kind == ManifestKind::Master && config.follow_master_playlist {
            if let Some(variant) = parsed.uris.first().cloned() {
                debug!(id = %candidate.id, variant = %variant, "Following master playlist");
                body = fetcher.fetch_manifest(&variant).await?;
                parsed = manifest::parse(&body, &variant)?;
                manifest_url = variant;
            }
        }

        if candidate.priority == Priority::High && parsed.kind == ManifestKind::Media {
            for target in parsed.warm_targets(config.warm_segment_count) {
                self.spawn_range_warm(candidate.id.clone(), target);
            }
        }

        debug!(id = %candidate.id, manifest = %manifest_url, "Manifest parsed");
        Ok(Warmed {
            manifest_body: body,
            segment_urls: parsed.uris,
        })
    }

    /// Fire-and-forget range read; the outcome is only logged.
    fn spawn_range_warm(&self, id: ItemId, url: Url) {
        let fetcher = Arc::clone(&self.inner.fetcher);
        let len = self.inner.config.warm_range_bytes;
        tokio::spawn(async move {
            match fetcher.fetch_range(&url, len).await {
                Ok(bytes) => debug!(%id, url = %url, bytes, "Segment warmed"),
                Err(e) => debug!(%id, url = %url, error = %e, "Segment warm failed"),
            }
        });
    }

    fn evict_locked(&self, state: &mut SchedulerState, pinned: &HashSet<ItemId>) {
        let active = state.active;
        let evicted = state.cache.evict_over_bound(active, &state.window_ids, pinned);
        for entry in evicted {
            state.queue.retain(|queued| queued.id != entry.id);
            if let Some(in_flight) = state.in_flight.remove(&entry.id) {
                debug!(id = %entry.id, "Cancelling prefetch of evicted entry");
                in_flight.abort.abort();
            }
        }
    }
}

impl std::fmt::Debug for PrefetchScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("PrefetchScheduler")
            .field("cache", &state.cache.len())
            .field("queued", &state.queue.len())
            .field("in_flight", &state.in_flight.len())
            .field("unmetered", &state.unmetered)
            .finish()
    }
}
