//! Fail-open handle to the remote cache store.
//!
//! `CacheClient` is the single chokepoint between application code and the
//! store: every call is bounded by a timeout, every failure is logged and
//! replaced by the caller's fallback, and a missing store turns every call
//! into an immediate fallback without I/O.

use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use metrics::counter;
use tracing::{debug, info, trace, warn};

use crate::config::CacheBackend;

use super::config::CacheConfig;
use super::lock::{rw_read, rw_write};
use super::memory::MemoryStore;
use super::redis_store::RedisStore;
use super::store::{KvStore, StoreError};

const METRIC_STORE_OP_FAILED: &str = "cachefront_store_op_failed_total";

pub struct CacheClient {
    store: RwLock<Option<Arc<dyn KvStore>>>,
    op_timeout: Duration,
}

impl std::fmt::Debug for CacheClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backend = self.current().map(|store| store.backend_name());
        f.debug_struct("CacheClient")
            .field("backend", &backend)
            .field("op_timeout", &self.op_timeout)
            .finish()
    }
}

impl CacheClient {
    /// A client with no store: every operation returns its fallback.
    pub fn disabled() -> Self {
        Self {
            store: RwLock::new(None),
            op_timeout: Duration::ZERO,
        }
    }

    pub fn with_store(store: Arc<dyn KvStore>, op_timeout: Duration) -> Self {
        Self {
            store: RwLock::new(Some(store)),
            op_timeout,
        }
    }

    /// Connect the configured backend.
    ///
    /// Never fails: an absent URL or an unreachable store yields a disabled
    /// client, and the service keeps running without acceleration.
    pub async fn connect(config: &CacheConfig) -> Self {
        if !config.is_enabled() {
            info!(
                backend = ?config.backend,
                "cache store not configured; running without cache"
            );
            return Self::disabled();
        }

        match config.backend {
            CacheBackend::Memory => {
                info!(backend = "memory", "using in-process cache store");
                Self::with_store(Arc::new(MemoryStore::new()), config.op_timeout)
            }
            CacheBackend::Redis => {
                let url = config.url.as_deref().unwrap_or_default();
                match RedisStore::connect(url, config.op_timeout, config.connect_timeout).await {
                    Ok(store) => Self::with_store(Arc::new(store), config.op_timeout),
                    Err(error) => {
                        warn!(
                            op = "connect",
                            backend = "redis",
                            error = %error,
                            "cache store unreachable; running without cache"
                        );
                        counter!(METRIC_STORE_OP_FAILED, "op" => "connect").increment(1);
                        Self::disabled()
                    }
                }
            }
        }
    }

    /// True while a store is attached.
    pub fn is_ready(&self) -> bool {
        rw_read(&self.store, "is_ready").is_some()
    }

    /// Detach the store. Later calls short-circuit to their fallbacks; calls
    /// already in flight finish on their own clone of the handle.
    pub fn shutdown(&self) {
        if let Some(store) = rw_write(&self.store, "shutdown").take() {
            info!(backend = store.backend_name(), "cache store detached");
        }
    }

    fn current(&self) -> Option<Arc<dyn KvStore>> {
        rw_read(&self.store, "current").clone()
    }

    /// Run `operation` against the store, returning `fallback` on any failure,
    /// on timeout, or when no store is attached.
    ///
    /// Failures are logged at `warn` with `op`; successes are not logged.
    pub async fn execute<T, F, Fut>(&self, op: &'static str, operation: F, fallback: T) -> T
    where
        F: FnOnce(Arc<dyn KvStore>) -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let Some(store) = self.current() else {
            trace!(op, "cache disabled; returning fallback");
            return fallback;
        };

        match tokio::time::timeout(self.op_timeout, operation(store)).await {
            Ok(Ok(value)) => value,
            Ok(Err(error)) => {
                warn!(op, error = %error, "cache operation failed; using fallback");
                counter!(METRIC_STORE_OP_FAILED, "op" => op).increment(1);
                fallback
            }
            Err(_) => {
                warn!(
                    op,
                    error = %StoreError::Timeout,
                    timeout_ms = self.op_timeout.as_millis() as u64,
                    "cache operation failed; using fallback"
                );
                counter!(METRIC_STORE_OP_FAILED, "op" => op).increment(1);
                fallback
            }
        }
    }

    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let key = key.to_owned();
        self.execute("get", |store| async move { store.get(&key).await }, None)
            .await
    }

    /// Store `value` for `ttl`. Returns whether the write reached the store.
    pub async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> bool {
        let key = key.to_owned();
        self.execute(
            "set",
            |store| async move { store.set(&key, &value, ttl).await.map(|()| true) },
            false,
        )
        .await
    }

    pub async fn delete(&self, key: &str) -> bool {
        let key = key.to_owned();
        self.execute("delete", |store| async move { store.delete(&key).await }, false)
            .await
    }

    /// Plain `INCRBY`. Prefer [`incr_with_ttl`](Self::incr_with_ttl) for
    /// anything written by this crate; this exists for keys whose lifetime is
    /// managed separately through [`expire`](Self::expire).
    pub async fn incr_by(&self, key: &str, delta: i64) -> Option<i64> {
        let key = key.to_owned();
        self.execute(
            "incr_by",
            |store| async move { store.incr_by(&key, delta).await.map(Some) },
            None,
        )
        .await
    }

    pub async fn incr_with_ttl(&self, key: &str, delta: i64, ttl: Duration) -> Option<i64> {
        let key = key.to_owned();
        self.execute(
            "incr_with_ttl",
            |store| async move { store.incr_with_ttl(&key, delta, ttl).await.map(Some) },
            None,
        )
        .await
    }

    pub async fn expire(&self, key: &str, ttl: Duration) -> bool {
        let key = key.to_owned();
        self.execute(
            "expire",
            |store| async move { store.expire(&key, ttl).await },
            false,
        )
        .await
    }

    /// Remove every key matching `pattern`. `None` when the store could not
    /// be reached.
    pub async fn delete_pattern(&self, pattern: &str) -> Option<u64> {
        let pattern = pattern.to_owned();
        self.execute(
            "delete_pattern",
            |store| async move { store.delete_pattern(&pattern).await.map(Some) },
            None,
        )
        .await
    }

    pub async fn ping(&self) -> bool {
        self.execute(
            "ping",
            |store| async move { store.ping().await.map(|()| true) },
            false,
        )
        .await
    }
}

/// Run `task` in the background with no handle retained.
///
/// The task must absorb its own failures (everything routed through
/// [`CacheClient`] already does). A panic inside it is contained by the
/// runtime and logged by the watcher task.
pub fn spawn_detached<F>(op: &'static str, task: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let handle = tokio::spawn(task);
    tokio::spawn(async move {
        if let Err(error) = handle.await
            && error.is_panic()
        {
            warn!(op, "detached cache task panicked");
        } else {
            debug!(op, "detached cache task finished");
        }
    });
}
