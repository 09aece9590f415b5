//! Configuration for fetch coordination and playback arbitration.

use crate::error::{AnimError, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the fetch coordinator and its caches.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Number of simultaneously active download sessions (default: 3).
    /// Sessions beyond the limit stay `Queued` until a slot frees.
    pub max_concurrent_downloads: usize,

    /// Entry-count capacity of the in-memory caches (default: 20).
    pub memory_capacity: usize,

    /// Timeout for a single dynamic-image fetch (default: 30s).
    pub image_fetch_timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: 3,
            memory_capacity: 20,
            image_fetch_timeout: Duration::from_secs(30),
        }
    }
}

impl FetchConfig {
    /// Create a new fetch configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the concurrent download limit.
    pub fn with_max_concurrent_downloads(mut self, count: usize) -> Self {
        self.max_concurrent_downloads = count;
        self
    }

    /// Set the in-memory cache capacity (entry count).
    pub fn with_memory_capacity(mut self, capacity: usize) -> Self {
        self.memory_capacity = capacity;
        self
    }

    /// Set the dynamic-image fetch timeout.
    pub fn with_image_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.image_fetch_timeout = timeout;
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_downloads == 0 {
            return Err(AnimError::InvalidConfig(
                "max_concurrent_downloads must be at least 1".into(),
            ));
        }
        if self.memory_capacity == 0 {
            return Err(AnimError::InvalidConfig(
                "memory_capacity must be at least 1".into(),
            ));
        }
        if self.image_fetch_timeout.is_zero() {
            return Err(AnimError::InvalidConfig(
                "image_fetch_timeout must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration for the playback arbiter.
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Window during which a repeated force-play request is suppressed
    /// while a prior one is still outstanding (default: 10s).
    pub force_play_debounce: Duration,

    /// Delay before a deferred restart runs after playback completes,
    /// letting teardown settle (default: 100ms).
    pub restart_grace: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            force_play_debounce: Duration::from_secs(10),
            restart_grace: Duration::from_millis(100),
        }
    }
}

impl PlaybackConfig {
    /// Create a new playback configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the force-play debounce window.
    pub fn with_force_play_debounce(mut self, window: Duration) -> Self {
        self.force_play_debounce = window;
        self
    }

    /// Set the deferred-restart grace delay.
    pub fn with_restart_grace(mut self, grace: Duration) -> Self {
        self.restart_grace = grace;
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.force_play_debounce.is_zero() {
            return Err(AnimError::InvalidConfig(
                "force_play_debounce must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root directory of the on-disk cache namespace.
    pub cache_root: PathBuf,

    /// Optional root directory for bundled assets; asset-path sources
    /// resolve relative to it.
    pub assets_root: Option<PathBuf>,

    /// Fetch coordinator settings.
    pub fetch: FetchConfig,

    /// Playback arbiter settings.
    pub playback: PlaybackConfig,
}

impl EngineConfig {
    /// Create an engine configuration rooted at the given cache directory.
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
            assets_root: None,
            fetch: FetchConfig::default(),
            playback: PlaybackConfig::default(),
        }
    }

    /// Set the bundled-assets root.
    pub fn with_assets_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.assets_root = Some(root.into());
        self
    }

    /// Replace the fetch settings.
    pub fn with_fetch(mut self, fetch: FetchConfig) -> Self {
        self.fetch = fetch;
        self
    }

    /// Replace the playback settings.
    pub fn with_playback(mut self, playback: PlaybackConfig) -> Self {
        self.playback = playback;
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.cache_root.as_os_str().is_empty() {
            return Err(AnimError::InvalidConfig("cache_root cannot be empty".into()));
        }
        self.fetch.validate()?;
        self.playback.validate()?;
        Ok(())
    }
}
