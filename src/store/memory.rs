use super::CounterStore;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;

/// In-process counter store.
///
/// Each key is guarded by its shard lock, so operations on one key are
/// linearizable. Keys never expire: the TTL passed to `incr_and_get` is
/// ignored and old buckets stay in memory for the life of the store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    counts: DashMap<String, u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a single key
    pub fn get(&self, key: &str) -> Option<u64> {
        self.counts.get(key).map(|count| *count)
    }

    /// Number of buckets held
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn incr_and_get(&self, key: &str, _ttl_s: u64) -> u64 {
        let mut count = self.counts.entry(key.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    async fn decr(&self, key: &str) {
        if let Some(mut count) = self.counts.get_mut(key) {
            *count = count.saturating_sub(1);
        }
    }

    async fn get_multi(&self, keys: &[String]) -> HashMap<String, u64> {
        keys.iter()
            .filter_map(|key| self.get(key).map(|count| (key.clone(), count)))
            .collect()
    }
}
