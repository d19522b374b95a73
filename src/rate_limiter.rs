//! Sliding window rate limiting
//!
//! Permits are counted per caller in one-second buckets. An acquisition adds
//! the current second's bucket to the `period_s` buckets before it and
//! compares the total against the permit count. The current bucket is
//! incremented first and decremented again on refusal, which keeps the read
//! consistent under concurrent callers without a separate read-before-write.

use crate::clock::{Clock, SystemClock};
use crate::error::{ThrottlerError, ThrottlerResult};
use crate::store::CounterStore;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

pub struct RateLimiter {
    permits: i64,
    period_s: u64,
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a limiter allowing `permits` acquisitions per caller over any
    /// rolling `period_s` seconds.
    ///
    /// A `permits` value below 1 disables limiting entirely: every call is
    /// allowed and the store is never touched.
    pub fn new(permits: i64, period_s: u64, store: Arc<dyn CounterStore>) -> ThrottlerResult<Self> {
        Self::with_clock(permits, period_s, store, Arc::new(SystemClock))
    }

    pub fn with_clock(
        permits: i64,
        period_s: u64,
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
    ) -> ThrottlerResult<Self> {
        if period_s == 0 {
            return Err(ThrottlerError::Configuration(
                "rate limit period must be at least one second".to_string(),
            ));
        }

        Ok(Self {
            permits,
            period_s,
            store,
            clock,
        })
    }

    pub fn permits(&self) -> i64 {
        self.permits
    }

    pub fn period_s(&self) -> u64 {
        self.period_s
    }

    pub fn is_enabled(&self) -> bool {
        self.permits >= 1
    }

    /// Try to take a permit for `caller`.
    ///
    /// Returns 0 when the permit was granted, otherwise the number of seconds
    /// until the caller's oldest counted permit leaves the window.
    pub async fn try_acquire(&self, caller: &str) -> u64 {
        if !self.is_enabled() {
            return 0;
        }

        let now = self.clock.now_secs();

        let current = self.current_permits(caller, now).await;
        let previous = self.previous_permits(caller, now).await;
        let total = current + previous.values().sum::<u64>();

        if total <= self.permits as u64 {
            debug!(caller = %caller, total, permits = self.permits, "Permit granted");
            return 0;
        }

        // Refused attempts must not count toward later windows.
        self.store.decr(&self.store_key(caller, now)).await;

        let cooldown_s = self.cooldown_period_s(now, &previous);
        debug!(caller = %caller, total, permits = self.permits, cooldown_s, "Permit refused");
        cooldown_s
    }

    /// Count this attempt in the current second's bucket and return the
    /// bucket's new value.
    pub(crate) async fn current_permits(&self, caller: &str, now: i64) -> u64 {
        self.store
            .incr_and_get(&self.store_key(caller, now), self.period_s)
            .await
    }

    /// Bucket values for the `period_s` seconds before `now`, keyed by second.
    /// Seconds without a bucket are omitted.
    pub(crate) async fn previous_permits(&self, caller: &str, now: i64) -> HashMap<i64, u64> {
        let keys = self.previous_store_keys(caller, now);
        let lookup: Vec<String> = keys.values().cloned().collect();
        let counts = self.store.get_multi(&lookup).await;

        keys.into_iter()
            .filter_map(|(t, key)| counts.get(&key).map(|count| (t, *count)))
            .collect()
    }

    /// Seconds until the oldest permit in `previous` falls out of the window.
    ///
    /// Never 0, since callers read 0 as a grant.
    pub(crate) fn cooldown_period_s(&self, now: i64, previous: &HashMap<i64, u64>) -> u64 {
        let period_start = now - self.period_s as i64;

        let oldest_permit = (period_start..now)
            .find(|t| previous.get(t).copied().unwrap_or(0) > 0)
            .unwrap_or(now);

        ((oldest_permit - period_start) as u64).max(1)
    }

    pub(crate) fn previous_store_keys(&self, caller: &str, now: i64) -> BTreeMap<i64, String> {
        let period_start = now - self.period_s as i64;
        (period_start..now)
            .map(|t| (t, self.store_key(caller, t)))
            .collect()
    }

    pub(crate) fn store_key(&self, caller: &str, t: i64) -> String {
        format!("{}-{}", caller, t)
    }
}
