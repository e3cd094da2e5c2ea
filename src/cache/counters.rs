//! Hot counters and per-user flags.
//!
//! Both are bounded-staleness mirrors of durable state. A `None` from any
//! read means "unknown": callers re-derive the value from the database and
//! must never read it as zero or `false`.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::client::CacheClient;
use super::keys::{counter_key, user_flag_key};

const FLAG_SET: &[u8] = b"1";

#[derive(Debug, Clone)]
pub struct CounterStore {
    client: Arc<CacheClient>,
    counter_ttl: Duration,
    flag_ttl: Duration,
}

impl CounterStore {
    pub fn new(client: Arc<CacheClient>, counter_ttl: Duration, flag_ttl: Duration) -> Self {
        Self {
            client,
            counter_ttl,
            flag_ttl,
        }
    }

    /// Add `delta` to `(subject_id, field)` and return the new value.
    ///
    /// The creating increment fixes the expiry at `counter_ttl`; later
    /// increments do not extend it. `None` means the write was not reflected
    /// in the cache and must not be retried.
    pub async fn increment_counter(&self, subject_id: &str, field: &str, delta: i64) -> Option<i64> {
        let key = counter_key(subject_id, field);
        let value = self
            .client
            .incr_with_ttl(&key, delta, self.counter_ttl)
            .await;
        debug!(key = %key, delta, value = ?value, "counter increment");
        value
    }

    /// Cached value of `(subject_id, field)`, or `None` when unknown.
    pub async fn get_counter(&self, subject_id: &str, field: &str) -> Option<i64> {
        let raw = self.client.get(&counter_key(subject_id, field)).await?;
        std::str::from_utf8(&raw)
            .ok()
            .and_then(|text| text.trim().parse::<i64>().ok())
    }

    /// Mirror a value read from the source of truth, with a fresh `counter_ttl`.
    pub async fn seed_counter(&self, subject_id: &str, field: &str, value: i64) {
        let key = counter_key(subject_id, field);
        self.client
            .set(&key, value.to_string().into_bytes(), self.counter_ttl)
            .await;
    }

    /// Drop a mirrored counter so the next read re-derives it.
    pub async fn clear_counter(&self, subject_id: &str, field: &str) {
        self.client.delete(&counter_key(subject_id, field)).await;
    }

    /// `Some(true)` when the flag is mirrored as set, `None` otherwise.
    ///
    /// This never returns `Some(false)`: a cleared flag and a missing flag
    /// both mean "re-check the source".
    pub async fn get_user_flag(&self, user_id: &str, subject_id: &str) -> Option<bool> {
        let raw = self.client.get(&user_flag_key(user_id, subject_id)).await?;
        (raw.as_slice() == FLAG_SET).then_some(true)
    }

    /// Mirror a flag. `false` deletes the key instead of storing a sentinel.
    pub async fn set_user_flag(&self, user_id: &str, subject_id: &str, value: bool) {
        let key = user_flag_key(user_id, subject_id);
        if value {
            self.client.set(&key, FLAG_SET.to_vec(), self.flag_ttl).await;
        } else {
            self.client.delete(&key).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use crate::cache::client::test_support::FailingStore;
    use crate::cache::memory::MemoryStore;

    use super::*;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    fn counters_with(store: Arc<MemoryStore>) -> CounterStore {
        let client = CacheClient::with_store(store, Duration::from_millis(250));
        CounterStore::new(Arc::new(client), DAY, DAY)
    }

    #[tokio::test]
    async fn increment_creates_and_accumulates() {
        let counters = counters_with(Arc::new(MemoryStore::new()));

        assert_eq!(counters.get_counter("post1", "likes").await, None);
        assert_eq!(counters.increment_counter("post1", "likes", 1).await, Some(1));
        assert_eq!(counters.increment_counter("post1", "likes", 2).await, Some(3));
        assert_eq!(counters.increment_counter("post1", "likes", -1).await, Some(2));
        assert_eq!(counters.get_counter("post1", "likes").await, Some(2));
        assert_eq!(counters.get_counter("post1", "views").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn counter_ttl_is_fixed_at_creation() {
        let store = Arc::new(MemoryStore::new());
        let counters = counters_with(store.clone());

        counters.increment_counter("post1", "views", 1).await;
        for _ in 0..5 {
            tokio::time::advance(Duration::from_secs(60 * 60)).await;
            counters.increment_counter("post1", "views", 1).await;
        }

        let remaining = store
            .ttl("counter:post1:views")
            .flatten()
            .expect("counter has an expiry");
        assert_eq!(remaining, DAY - Duration::from_secs(5 * 60 * 60));

        tokio::time::advance(remaining).await;
        assert_eq!(counters.get_counter("post1", "views").await, None);
    }

    #[tokio::test]
    async fn concurrent_increments_are_atomic() {
        let counters = counters_with(Arc::new(MemoryStore::new()));

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let counters = counters.clone();
                tokio::spawn(async move { counters.increment_counter("post1", "likes", 1).await })
            })
            .collect();
        for task in tasks {
            assert!(task.await.expect("task completes").is_some());
        }

        assert_eq!(counters.get_counter("post1", "likes").await, Some(10));
    }

    #[tokio::test]
    async fn seeded_counter_accepts_increments() {
        let counters = counters_with(Arc::new(MemoryStore::new()));

        counters.seed_counter("post1", "likes", 41).await;
        assert_eq!(counters.increment_counter("post1", "likes", 1).await, Some(42));

        counters.clear_counter("post1", "likes").await;
        assert_eq!(counters.get_counter("post1", "likes").await, None);
    }

    #[tokio::test]
    async fn cleared_flag_reads_as_unknown() {
        let counters = counters_with(Arc::new(MemoryStore::new()));

        assert_eq!(counters.get_user_flag("u1", "post1").await, None);
        counters.set_user_flag("u1", "post1", true).await;
        assert_eq!(counters.get_user_flag("u1", "post1").await, Some(true));

        counters.set_user_flag("u1", "post1", false).await;
        assert_eq!(counters.get_user_flag("u1", "post1").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn flags_expire() {
        let counters = counters_with(Arc::new(MemoryStore::new()));
        counters.set_user_flag("u1", "post1", true).await;
        tokio::time::advance(DAY).await;
        assert_eq!(counters.get_user_flag("u1", "post1").await, None);
    }

    #[tokio::test]
    async fn garbage_values_read_as_unknown() {
        let store = Arc::new(MemoryStore::new());
        let client = Arc::new(CacheClient::with_store(
            store.clone(),
            Duration::from_millis(250),
        ));
        client
            .set("counter:post1:likes", b"many".to_vec(), DAY)
            .await;
        client.set("flag:u1:post1", b"0".to_vec(), DAY).await;

        let counters = CounterStore::new(client, DAY, DAY);
        assert_eq!(counters.get_counter("post1", "likes").await, None);
        assert_eq!(counters.get_user_flag("u1", "post1").await, None);
    }

    #[tokio::test]
    async fn unavailable_store_yields_unknown() {
        let store = Arc::new(FailingStore::default());
        let client = CacheClient::with_store(store.clone(), Duration::from_millis(250));
        let counters = CounterStore::new(Arc::new(client), DAY, DAY);

        assert_eq!(counters.increment_counter("post1", "likes", 1).await, None);
        assert_eq!(counters.get_counter("post1", "likes").await, None);
        assert_eq!(counters.get_user_flag("u1", "post1").await, None);
        counters.set_user_flag("u1", "post1", true).await;
        counters.set_user_flag("u1", "post1", false).await;
        assert_eq!(store.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn disabled_cache_yields_unknown() {
        let counters = CounterStore::new(Arc::new(CacheClient::disabled()), DAY, DAY);
        assert_eq!(counters.increment_counter("post1", "likes", 1).await, None);
        assert_eq!(counters.get_counter("post1", "likes").await, None);
    }
}
