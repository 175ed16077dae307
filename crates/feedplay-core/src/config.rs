//! Engine and prefetch configuration.
//!
//! The top-level [`Config`] struct is deserialized from TOML and carries the
//! `[engine]` and `[prefetch]` sections. Every section defaults sensibly so a
//! completely empty file is valid.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::Result;
use crate::media::PlatformProfile;
use crate::Error;

/// Locations searched by [`Config::load_or_default`] when no path is given.
const DEFAULT_PATHS: &[&str] = &[
    "./feedplay.toml",
    "~/.config/feedplay/config.toml",
    "/etc/feedplay/config.toml",
];

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub prefetch: PrefetchConfig,
}

impl Config {
    /// Deserialize a `Config` from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| Error::Config(format!("config parse error: {e}")))
    }

    /// Serialize the configuration back to TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(format!("config encode error: {e}")))
    }

    /// Load and strictly validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&contents)?;
        config.validate_strict()?;
        for warning in config.validate() {
            tracing::warn!(path = %path.display(), "{warning}");
        }
        Ok(config)
    }

    /// Load from `custom_path` if given, otherwise from the first default
    /// location that exists, otherwise return defaults.
    pub fn load_or_default(custom_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = custom_path {
            return Self::load(path);
        }

        for path_str in DEFAULT_PATHS {
            let expanded = shellexpand::tilde(path_str);
            let path = Path::new(expanded.as_ref());
            if path.exists() {
                tracing::debug!(path = %path.display(), "Loading config");
                return Self::load(path);
            }
        }

        tracing::debug!("No config file found; using defaults");
        Ok(Self::default())
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.engine.preload_ahead == 0 {
            warnings.push("engine.preload_ahead is 0; nothing ahead will be warmed".into());
        }
        if self.engine.max_retries == 0 {
            warnings.push("engine.max_retries is 0; transient play failures are final".into());
        }
        if self.engine.settle_delay_ms > 2_000 {
            warnings.push(format!(
                "engine.settle_delay_ms is {}; playback start will feel sluggish",
                self.engine.settle_delay_ms
            ));
        }
        if self.prefetch.warm_range_bytes > 4 * 1024 * 1024 {
            warnings.push(format!(
                "prefetch.warm_range_bytes is {}; warm reads are meant to be small",
                self.prefetch.warm_range_bytes
            ));
        }
        if self.prefetch.max_concurrent > 8 {
            warnings.push(format!(
                "prefetch.max_concurrent is {}; this competes with the active stream",
                self.prefetch.max_concurrent
            ));
        }

        warnings
    }

    /// Reject configurations the engine cannot honour.
    pub fn validate_strict(&self) -> Result<()> {
        if self.prefetch.max_concurrent == 0 {
            return Err(Error::Config("prefetch.max_concurrent must be at least 1".into()));
        }
        if self.prefetch.max_cache_size == 0 {
            return Err(Error::Config("prefetch.max_cache_size must be at least 1".into()));
        }
        let window = self.engine.window_len();
        if self.prefetch.max_cache_size < window {
            return Err(Error::Config(format!(
                "prefetch.max_cache_size ({}) is smaller than the prefetch window ({window})",
                self.prefetch.max_cache_size
            )));
        }
        let retention = self.engine.preload_ahead + self.engine.preload_behind + 1;
        if self.engine.max_cached_items < retention {
            return Err(Error::Config(format!(
                "engine.max_cached_items ({}) is smaller than the retention window ({retention})",
                self.engine.max_cached_items
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Lifecycle engine tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Items kept alive (and warmed at high priority) ahead of the active one.
    pub preload_ahead: usize,
    /// Items kept alive (and warmed at medium priority) behind the active one.
    pub preload_behind: usize,
    /// Upper bound on registered items after idle cleanup.
    pub max_cached_items: usize,
    /// Transient play failures retried before giving up.
    pub max_retries: u32,
    /// First backoff delay; doubles on every further retry.
    pub retry_base_delay_ms: u64,
    /// Delay between attaching a handle to the active item and playing it.
    pub settle_delay_ms: u64,
    /// Delay before the low-priority registry cleanup runs.
    pub idle_cleanup_delay_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::for_platform(PlatformProfile::default())
    }
}

impl EngineConfig {
    /// Tuned defaults for a host platform.
    pub fn for_platform(profile: PlatformProfile) -> Self {
        let (preload_ahead, settle_delay_ms) = match profile {
            PlatformProfile::Ios => (3, 100),
            PlatformProfile::Android => (2, 300),
            PlatformProfile::Desktop => (2, 50),
        };
        Self {
            preload_ahead,
            preload_behind: 1,
            max_cached_items: 5,
            max_retries: 3,
            retry_base_delay_ms: 1_000,
            settle_delay_ms,
            idle_cleanup_delay_ms: 200,
        }
    }

    /// Number of indices the prefetch window can cover: the active item, the
    /// ahead and behind tiers, and the unmetered-only outermost slot.
    pub fn window_len(&self) -> usize {
        self.preload_ahead + self.preload_behind + 2
    }

    /// Backoff before retry number `attempt` (1-based): base, 2x base, 4x base...
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.retry_base_delay_ms.saturating_mul(1u64 << exponent))
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn idle_cleanup_delay(&self) -> Duration {
        Duration::from_millis(self.idle_cleanup_delay_ms)
    }
}

// ---------------------------------------------------------------------------
// Prefetch
// ---------------------------------------------------------------------------

/// Prefetch scheduler tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefetchConfig {
    /// Warm operations allowed in flight at once.
    pub max_concurrent: usize,
    /// Upper bound on prefetch cache entries.
    pub max_cache_size: usize,
    /// Segments range-read for high-priority items.
    pub warm_segment_count: usize,
    /// Bytes requested per segment warm read.
    pub warm_range_bytes: u64,
    /// Per-request timeout.
    pub request_timeout_secs: u64,
    /// Optional `User-Agent` header for prefetch requests.
    pub user_agent: Option<String>,
    /// Fetch the first variant when the manifest is a master playlist.
    pub follow_master_playlist: bool,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            max_cache_size: 10,
            warm_segment_count: 2,
            warm_range_bytes: 256 * 1024,
            request_timeout_secs: 10,
            user_agent: None,
            follow_master_playlist: true,
        }
    }
}

impl PrefetchConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_toml_is_default() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
        assert!(config.validate_strict().is_ok());
        assert!(config.validate().is_empty());
    }

    #[test]
    fn partial_sections_keep_defaults() {
        let config = Config::from_toml(
            r#"
            [engine]
            preload_ahead = 3

            [prefetch]
            max_concurrent = 2
            user_agent = "feedplay-test"
            "#,
        )
        .unwrap();
        assert_eq!(config.engine.preload_ahead, 3);
        assert_eq!(config.engine.preload_behind, 1);
        assert_eq!(config.prefetch.max_concurrent, 2);
        assert_eq!(config.prefetch.max_cache_size, 10);
        assert_eq!(config.prefetch.user_agent.as_deref(), Some("feedplay-test"));
    }

    #[test]
    fn invalid_toml_is_config_error() {
        let err = Config::from_toml("[engine\npreload_ahead = ").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn strict_rejects_zero_concurrency() {
        let mut config = Config::default();
        config.prefetch.max_concurrent = 0;
        assert!(config.validate_strict().is_err());
    }

    #[test]
    fn strict_rejects_cache_smaller_than_window() {
        let mut config = Config::default();
        config.prefetch.max_cache_size = 3;
        let err = config.validate_strict().unwrap_err();
        assert!(err.to_string().contains("prefetch window"));
    }

    #[test]
    fn strict_rejects_registry_bound_inside_retention_window() {
        let mut config = Config::default();
        config.engine.max_cached_items = 3;
        assert!(config.validate_strict().is_err());
    }

    #[test]
    fn warnings_for_odd_values() {
        let mut config = Config::default();
        config.engine.max_retries = 0;
        config.prefetch.max_concurrent = 12;
        let warnings = config.validate();
        assert_eq!(warnings.len(), 2);
    }

    #[test]
    fn retry_delay_doubles() {
        let engine = EngineConfig::default();
        assert_eq!(engine.retry_delay(1), Duration::from_secs(1));
        assert_eq!(engine.retry_delay(2), Duration::from_secs(2));
        assert_eq!(engine.retry_delay(3), Duration::from_secs(4));
    }

    #[test]
    fn platform_profiles_differ() {
        let ios = EngineConfig::for_platform(PlatformProfile::Ios);
        let android = EngineConfig::for_platform(PlatformProfile::Android);
        assert_eq!(ios.preload_ahead, 3);
        assert_eq!(android.preload_ahead, 2);
        assert!(android.settle_delay_ms > ios.settle_delay_ms);
    }

    #[test]
    fn toml_roundtrip() {
        let mut config = Config::default();
        config.prefetch.user_agent = Some("ua".into());
        let text = config.to_toml().unwrap();
        assert_eq!(Config::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[engine]\nmax_retries = 5").unwrap();
        let config = Config::load_or_default(Some(file.path())).unwrap();
        assert_eq!(config.engine.max_retries, 5);
    }

    #[test]
    fn load_missing_file_fails() {
        let err = Config::load(Path::new("/nonexistent/feedplay.toml")).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }
}
