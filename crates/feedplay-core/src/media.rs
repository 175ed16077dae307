//! Media-domain enums shared by the scheduler and the lifecycle engine.
//!
//! All enums serialize in lowercase (via `serde(rename_all = "lowercase")`) and
//! implement `Display` manually for consistent string representation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

/// Warm priority of a prefetch candidate.
///
/// Ordering follows urgency: `High < Medium < Low`, so sorting a list of
/// candidates ascending puts the most urgent work first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
        }
    }
}

// ---------------------------------------------------------------------------
// PrefetchStatus
// ---------------------------------------------------------------------------

/// Lifecycle of a prefetch cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PrefetchStatus {
    #[default]
    Pending,
    Loading,
    Loaded,
    Error,
}

impl PrefetchStatus {
    /// Whether the entry reached a final state (loaded or failed).
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Loaded | Self::Error)
    }
}

impl fmt::Display for PrefetchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Loading => write!(f, "loading"),
            Self::Loaded => write!(f, "loaded"),
            Self::Error => write!(f, "error"),
        }
    }
}

// ---------------------------------------------------------------------------
// ScrollDirection
// ---------------------------------------------------------------------------

/// Direction of the last active-index transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    /// Towards higher indices.
    Down,
    /// Towards lower indices.
    Up,
    /// First transition, no previous index to compare against.
    #[default]
    Unknown,
}

impl ScrollDirection {
    /// Derive the direction of a move from `previous` to `next`.
    pub fn between(previous: Option<usize>, next: usize) -> Self {
        match previous {
            Some(prev) if next > prev => Self::Down,
            Some(prev) if next < prev => Self::Up,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ScrollDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Down => write!(f, "down"),
            Self::Up => write!(f, "up"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

// ---------------------------------------------------------------------------
// AppLifecycle
// ---------------------------------------------------------------------------

/// Foreground/background state reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AppLifecycle {
    #[default]
    Active,
    Inactive,
    Background,
}

impl AppLifecycle {
    /// Only `Active` allows playback.
    pub fn is_foreground(self) -> bool {
        matches!(self, Self::Active)
    }
}

impl fmt::Display for AppLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Inactive => write!(f, "inactive"),
            Self::Background => write!(f, "background"),
        }
    }
}

// ---------------------------------------------------------------------------
// Connectivity
// ---------------------------------------------------------------------------

/// Network cost class reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    /// WiFi or ethernet.
    Unmetered,
    /// Cellular or otherwise billed per byte. Assumed until told otherwise.
    #[default]
    Metered,
}

impl Connectivity {
    pub fn is_unmetered(self) -> bool {
        matches!(self, Self::Unmetered)
    }
}

impl fmt::Display for Connectivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unmetered => write!(f, "unmetered"),
            Self::Metered => write!(f, "metered"),
        }
    }
}

// ---------------------------------------------------------------------------
// PlatformProfile
// ---------------------------------------------------------------------------

/// Host platform, used to pick tuned engine defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlatformProfile {
    Ios,
    Android,
    #[default]
    Desktop,
}

impl fmt::Display for PlatformProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ios => write!(f, "ios"),
            Self::Android => write!(f, "android"),
            Self::Desktop => write!(f, "desktop"),
        }
    }
}

impl FromStr for PlatformProfile {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ios" => Ok(Self::Ios),
            "android" => Ok(Self::Android),
            "desktop" => Ok(Self::Desktop),
            other => Err(Error::Config(format!("unknown platform profile: {other}"))),
        }
    }
}
