//! Remote key-value store contract.
//!
//! `KvStore` is the only wire protocol the cache layer owns. Implementations
//! surface every failure as a `StoreError`; absorbing those errors is the job
//! of [`CacheClient`](super::CacheClient), never of the store.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection failed: {0}")]
    Connection(String),
    #[error("store operation timed out")]
    Timeout,
    #[error("value at `{key}` is not an integer")]
    NotAnInteger { key: String },
    #[error("integer overflow at `{key}`")]
    Overflow { key: String },
    #[error("serialization failed: {0}")]
    Serialization(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Redis(#[from] redis::RedisError),
}

impl StoreError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }
}

/// Operations the cache layer needs from a remote key-value store.
///
/// Every value written through this trait carries a finite TTL; there is no
/// "persist forever" variant on purpose.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// `GET key`.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// `SET key value EX ttl`.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError>;

    /// `DEL key`. Returns whether the key existed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// `INCRBY key delta`. Creates the key at zero when absent.
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError>;

    /// `INCRBY key delta` followed by `EXPIRE key ttl` when the key has no
    /// expiry, executed atomically in one round trip.
    ///
    /// The expiry is therefore set by the creating increment and never
    /// renewed by later ones.
    async fn incr_with_ttl(&self, key: &str, delta: i64, ttl: Duration)
    -> Result<i64, StoreError>;

    /// `EXPIRE key ttl`. Returns whether the key existed.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Delete every key matching a glob pattern (`*`, `?`, `[...]`, `\`).
    ///
    /// Returns the number of keys removed.
    async fn delete_pattern(&self, pattern: &str) -> Result<u64, StoreError>;

    /// Round-trip health check.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Backend name for logs.
    fn backend_name(&self) -> &'static str;
}

/// Whole seconds for an `EX`/`EXPIRE` argument, rounding sub-second TTLs up.
pub(crate) fn ttl_seconds(ttl: Duration) -> Result<u64, StoreError> {
    if ttl.is_zero() {
        return Err(StoreError::invalid_argument("ttl must be greater than zero"));
    }
    let secs = ttl.as_secs();
    Ok(if ttl.subsec_nanos() > 0 { secs + 1 } else { secs })
}
