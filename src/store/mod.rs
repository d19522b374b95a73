//! Counter stores backing the rate limiter.
//!
//! A store maps bucket keys to unsigned counters and offers three atomic
//! operations. The rate limiter holds no counter state of its own, so every
//! guarantee it makes under concurrency comes from the store it is given.

pub mod memory;
pub mod redis;

use crate::config::{Config, StoreBackend};
use crate::error::{ThrottlerError, ThrottlerResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// Atomic key/counter storage.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Create the key at 0 if it is absent (applying `ttl_s` only then), then
    /// increment it and return the new value.
    ///
    /// Concurrent callers on the same key each observe a distinct value.
    async fn incr_and_get(&self, key: &str, ttl_s: u64) -> u64;

    /// Decrement the key if it exists. Missing keys are left alone.
    async fn decr(&self, key: &str);

    /// Look up several keys at once. Absent keys are omitted from the result.
    async fn get_multi(&self, keys: &[String]) -> HashMap<String, u64>;
}

/// Build the store selected by `config`.
pub async fn build_store(config: &Config) -> ThrottlerResult<Arc<dyn CounterStore>> {
    match config.store_backend {
        StoreBackend::Memory => {
            info!("Using in-process counter store");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Redis => {
            let url = config.redis_url.as_deref().ok_or_else(|| {
                ThrottlerError::Configuration(
                    "REDIS_URL must be set when STORE_BACKEND is redis".to_string(),
                )
            })?;
            let store = RedisStore::connect(url, config.redis_timeout()).await?;
            Ok(Arc::new(store))
        }
    }
}
