//! Windowed, direction-aware prefetch scheduler.
//!
//! Given the active feed index and scroll direction, [`PrefetchScheduler`]
//! decides which items to warm, queues them by priority, runs at most a
//! configured number of warm operations at once and keeps the outcomes in a
//! bounded [`PrefetchCache`]. Warming means fetching the manifest and, for
//! high-priority items, range-reading the first bytes of the first segments.

pub mod cache;
pub mod fetcher;
pub mod manifest;
pub mod scheduler;
pub mod window;

pub use cache::{PrefetchCache, PrefetchEntry};
pub use fetcher::{Fetcher, HttpFetcher};
pub use manifest::{Manifest, ManifestKind};
pub use scheduler::{Candidate, PrefetchScheduler, WarmFuture};
pub use window::{WindowShape, WindowSlot};
