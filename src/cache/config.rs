//! Cache configuration, derived from the validated `[cache]` settings.

use std::num::NonZeroUsize;
use std::time::Duration;

use crate::config::{CacheSettings, DEFAULT_CACHE_MAX_ENTRIES, DEFAULT_CACHE_TTL_SECS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheBackendKind {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// When off, every read goes straight to the store.
    pub enabled: bool,
    pub backend: CacheBackendKind,
    /// Expiry applied to every cached page.
    pub ttl_seconds: u64,
    /// Capacity of the in-process LRU.
    pub max_entries: usize,
    pub redis_url: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: CacheBackendKind::Memory,
            ttl_seconds: DEFAULT_CACHE_TTL_SECS,
            max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            redis_url: None,
        }
    }
}

impl From<&CacheSettings> for CacheConfig {
    fn from(settings: &CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            backend: settings.backend,
            ttl_seconds: settings.ttl.as_secs(),
            max_entries: settings.max_entries.get(),
            redis_url: settings.redis_url.clone(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds.max(1))
    }

    /// Returns the entry limit as NonZeroUsize, clamping to 1 if zero.
    pub fn max_entries_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.max_entries).unwrap_or(NonZeroUsize::MIN)
    }
}
