//! Cache-aside reads and post-commit invalidation of serialized responses.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use metrics::counter;
use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, info, warn};

use super::backend::{CacheBackend, CacheError};
use super::config::{CacheBackendKind, CacheConfig};
use super::keys::{CacheKey, KeyPattern};
use super::memory::MemoryCache;
use super::redis_store::RedisCache;

const SOURCE: &str = "cache::response";

pub const METRIC_CACHE_HIT_TOTAL: &str = "itemsvc_cache_hit_total";
pub const METRIC_CACHE_MISS_TOTAL: &str = "itemsvc_cache_miss_total";
pub const METRIC_CACHE_ERROR_TOTAL: &str = "itemsvc_cache_error_total";
pub const METRIC_CACHE_INVALIDATED_TOTAL: &str = "itemsvc_cache_invalidated_keys_total";

#[derive(Clone)]
pub struct ResponseCache {
    backend: Option<Arc<dyn CacheBackend>>,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(backend: Arc<dyn CacheBackend>, ttl: Duration) -> Self {
        Self {
            backend: Some(backend),
            ttl,
        }
    }

    /// Every read goes to the loader and invalidation is a no-op.
    pub fn disabled() -> Self {
        Self {
            backend: None,
            ttl: Duration::ZERO,
        }
    }

    /// Builds the configured backend. An unreachable Redis disables caching instead of failing startup.
    pub async fn from_config(config: &CacheConfig) -> Self {
        if !config.enabled {
            info!(target = SOURCE, "Response cache disabled by configuration");
            return Self::disabled();
        }

        match config.backend {
            CacheBackendKind::Memory => {
                Self::new(Arc::new(MemoryCache::new(config)), config.ttl())
            }
            CacheBackendKind::Redis => {
                let Some(url) = config.redis_url.as_deref() else {
                    warn!(
                        target = SOURCE,
                        "cache.backend is redis but cache.redis_url is not set; caching disabled"
                    );
                    return Self::disabled();
                };
                match RedisCache::connect(url).await {
                    Ok(cache) => Self::new(Arc::new(cache), config.ttl()),
                    Err(err) => {
                        warn!(
                            target = SOURCE,
                            error = %err,
                            "Failed to connect to redis; caching disabled"
                        );
                        Self::disabled()
                    }
                }
            }
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the cached value for `key`, or runs `loader` and stores its result.
    ///
    /// Cache failures degrade to a miss. Concurrent misses on the same key each
    /// run the loader and the last write wins.
    pub async fn get_or_populate<T, E, F, Fut>(&self, key: CacheKey, loader: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let Some(backend) = self.backend.as_ref() else {
            return loader().await;
        };
        let rendered = key.to_string();

        match backend.get(&rendered).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<T>(&bytes) {
                Ok(value) => {
                    counter!(METRIC_CACHE_HIT_TOTAL, "kind" => key.kind()).increment(1);
                    debug!(target = SOURCE, key = %rendered, "Cache hit");
                    return Ok(value);
                }
                Err(err) => {
                    record_error("decode", &rendered, &CacheError::Serialization(err.to_string()))
                }
            },
            Ok(None) => {}
            Err(err) => record_error("get", &rendered, &err),
        }

        counter!(METRIC_CACHE_MISS_TOTAL, "kind" => key.kind()).increment(1);
        debug!(target = SOURCE, key = %rendered, "Cache miss");

        let value = loader().await?;

        match serde_json::to_vec(&value) {
            Ok(encoded) => {
                if let Err(err) = backend.set(&rendered, Bytes::from(encoded), self.ttl).await {
                    record_error("set", &rendered, &err);
                }
            }
            Err(err) => record_error(
                "encode",
                &rendered,
                &CacheError::Serialization(err.to_string()),
            ),
        }

        Ok(value)
    }

    /// Deletes every key in `pattern`. Call only after the write has committed.
    ///
    /// Not fenced against reads: a loader that queried the store before the
    /// commit can still write its page after this returns, and that page
    /// stays stale until its TTL runs out.
    pub async fn invalidate(&self, pattern: KeyPattern) -> u64 {
        let Some(backend) = self.backend.as_ref() else {
            return 0;
        };

        match backend.delete_pattern(pattern.as_str()).await {
            Ok(removed) => {
                counter!(METRIC_CACHE_INVALIDATED_TOTAL).increment(removed);
                debug!(
                    target = SOURCE,
                    pattern = %pattern,
                    removed,
                    "Invalidated cached responses"
                );
                removed
            }
            Err(err) => {
                record_error("delete_pattern", pattern.as_str(), &err);
                0
            }
        }
    }
}

fn record_error(op: &'static str, key: &str, err: &CacheError) {
    counter!(METRIC_CACHE_ERROR_TOTAL, "op" => op).increment(1);
    warn!(
        target = SOURCE,
        op,
        key,
        error = %err,
        "Cache operation failed; continuing without cache"
    );
}
