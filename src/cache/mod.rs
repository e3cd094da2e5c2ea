//! Fail-open cache layer.
//!
//! Everything here treats the key-value store as an optimization. Store
//! errors, timeouts, and a missing connection degrade to "no cached value"
//! and never surface to request handlers:
//!
//! - [`CacheClient`]: bounded, logged access to a [`KvStore`]
//! - [`CounterStore`]: hot counters and per-user flags
//! - [`RateLimiter`]: fixed-window request limiting
//! - [`response_cache_layer`] / [`invalidate_cache_layer`]: HTTP response caching
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! backend = "redis"
//! url = "redis://127.0.0.1:6379"
//! op_timeout_ms = 250
//! ```
//!
//! Leaving `cache.url` unset runs the service without a store.

mod client;
mod config;
mod counters;
mod keys;
mod lock;
mod memory;
mod middleware;
mod rate_limit;
mod redis_store;
mod store;

pub use client::{CacheClient, spawn_detached};
pub use config::CacheConfig;
pub use counters::CounterStore;
pub use keys::{
    RESPONSE_PREFIX, canonical_query, counter_key, entity_tag, normalize_path, rate_key,
    response_key, user_flag_key,
};
pub use memory::MemoryStore;
pub use middleware::{
    CACHE_KEY_HEADER, CACHE_STATUS_HEADER, InvalidationState, KeyGenerator, ResponseCacheOptions,
    ResponseCacheState, Viewer, invalidate_cache_layer, invalidate_detached,
    response_cache_layer,
};
pub use rate_limit::{
    LIMIT_HEADER, REMAINING_HEADER, RateDecision, RateLimitPolicy, RateLimitState, RateLimiter,
    rate_limit_layer,
};
pub use redis_store::RedisStore;
pub use store::{KvStore, StoreError};

#[cfg(test)]
pub(crate) use client::test_support;
