//! Response cache for item list pages.
//!
//! Reads are cache-aside: look up the rendered key, fall back to the store on
//! a miss, then write the result back with a fixed TTL. Writes invalidate by
//! glob pattern once their transaction has committed.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! backend = "memory"   # or "redis"
//! ttl_seconds = 300
//! max_entries = 1000
//! # redis_url = "redis://127.0.0.1:6379"
//! ```
//!
//! Cache failures never fail a request: a broken backend behaves like an
//! always-missing cache and stale entries age out with their TTL.

mod backend;
mod config;
mod keys;
mod lock;
mod memory;
mod patterns;
mod redis_store;
mod response;

pub use backend::{CacheBackend, CacheError};
pub use config::{CacheBackendKind, CacheConfig};
pub use keys::{CacheKey, KeyPattern};
pub use memory::{METRIC_CACHE_EVICT_TOTAL, MemoryCache};
pub use patterns::pattern_matches;
pub use redis_store::RedisCache;
pub use response::{
    METRIC_CACHE_ERROR_TOTAL, METRIC_CACHE_HIT_TOTAL, METRIC_CACHE_INVALIDATED_TOTAL,
    METRIC_CACHE_MISS_TOTAL, ResponseCache,
};

pub(crate) use lock::mutex_lock;
