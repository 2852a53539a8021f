use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache connection failed: {0}")]
    Connection(String),
    #[error("cache operation failed: {0}")]
    Operation(String),
    #[error("cache serialization error: {0}")]
    Serialization(String),
}

/// Key/value store holding serialized responses.
///
/// Callers treat every error as a miss or a skipped write; the primary store
/// stays authoritative.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError>;

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Removes every key matching the `*` glob and returns how many were removed.
    async fn delete_pattern(&self, pattern: &str) -> Result<u64, CacheError>;
}
