//! feedplay-core: shared identifiers, errors, configuration, and event hub.
//!
//! This crate is the foundational dependency for the prefetch scheduler and
//! the lifecycle engine, providing the item identity type, media-domain
//! enums, a unified error type, TOML configuration, and the batched
//! observer registry that carries state changes back to the host.

pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod media;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result};
pub use ids::ItemId;
pub use media::*;
