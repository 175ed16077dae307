//! Feedplay - playback lifecycle and prefetch engine for vertically
//! scrolling video feeds.
//!
//! The engine decides which single item plays, which rendering handles are
//! kept, and which manifests are warmed ahead of the user's scroll position.

pub mod engine;
pub mod handle;
pub mod platform;
pub mod simulate;

pub use engine::FeedEngine;
pub use handle::{PlayError, RenderingHandle, SharedHandle};
pub use platform::{spawn_signal_listener, PlatformSignal};
