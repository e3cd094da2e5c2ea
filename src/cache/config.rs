//! Cache configuration.
//!
//! Resolved from the `[cache]`, `[counters]`, `[rate_limit]` and
//! `[response_cache]` sections of `cachefront.toml`.

use std::time::Duration;

use crate::config::{CacheBackend, Settings};

const DEFAULT_OP_TIMEOUT_MS: u64 = 250;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_COUNTER_TTL_SECS: u64 = 24 * 60 * 60;
const DEFAULT_FLAG_TTL_SECS: u64 = 24 * 60 * 60;
const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 60;
const DEFAULT_RATE_LIMIT_MAX_REQUESTS: u32 = 120;
const DEFAULT_RESPONSE_TTL_SECS: u64 = 60;
const DEFAULT_RESPONSE_MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Which store implementation to connect.
    pub backend: CacheBackend,
    /// Connection URL for the remote store. `None` disables the cache.
    pub url: Option<String>,
    /// Upper bound for every single store call.
    pub op_timeout: Duration,
    /// Upper bound for establishing the store connection.
    pub connect_timeout: Duration,
    /// Fixed lifetime of a counter, counted from its creating increment.
    pub counter_ttl: Duration,
    /// Lifetime of a per-user flag.
    pub flag_ttl: Duration,
    /// Fixed rate-limit window.
    pub rate_limit_window: Duration,
    /// Requests admitted per window and key.
    pub rate_limit_max_requests: u32,
    /// Default freshness window for cached responses.
    pub response_ttl: Duration,
    /// Responses with larger bodies are served but not cached.
    pub response_max_body_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Redis,
            url: None,
            op_timeout: Duration::from_millis(DEFAULT_OP_TIMEOUT_MS),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            counter_ttl: Duration::from_secs(DEFAULT_COUNTER_TTL_SECS),
            flag_ttl: Duration::from_secs(DEFAULT_FLAG_TTL_SECS),
            rate_limit_window: Duration::from_secs(DEFAULT_RATE_LIMIT_WINDOW_SECS),
            rate_limit_max_requests: DEFAULT_RATE_LIMIT_MAX_REQUESTS,
            response_ttl: Duration::from_secs(DEFAULT_RESPONSE_TTL_SECS),
            response_max_body_bytes: DEFAULT_RESPONSE_MAX_BODY_BYTES,
        }
    }
}

impl From<&Settings> for CacheConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            backend: settings.cache.backend,
            url: settings.cache.url.clone(),
            op_timeout: settings.cache.op_timeout,
            connect_timeout: settings.cache.connect_timeout,
            counter_ttl: Duration::from_secs(settings.counters.ttl_seconds.get().into()),
            flag_ttl: Duration::from_secs(settings.counters.flag_ttl_seconds.get().into()),
            rate_limit_window: Duration::from_secs(
                settings.rate_limit.window_seconds.get().into(),
            ),
            rate_limit_max_requests: settings.rate_limit.max_requests.get(),
            response_ttl: Duration::from_secs(settings.response_cache.ttl_seconds.get().into()),
            response_max_body_bytes: settings.response_cache.max_body_bytes.get(),
        }
    }
}

impl CacheConfig {
    /// Returns true if a store can be reached at all with this configuration.
    pub fn is_enabled(&self) -> bool {
        match self.backend {
            CacheBackend::Memory => true,
            CacheBackend::Redis => self.url.as_deref().is_some_and(|url| !url.is_empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert_eq!(config.backend, CacheBackend::Redis);
        assert!(config.url.is_none());
        assert_eq!(config.op_timeout, Duration::from_millis(250));
        assert_eq!(config.counter_ttl, Duration::from_secs(86_400));
        assert_eq!(config.flag_ttl, Duration::from_secs(86_400));
        assert_eq!(config.rate_limit_window, Duration::from_secs(60));
        assert_eq!(config.rate_limit_max_requests, 120);
        assert_eq!(config.response_ttl, Duration::from_secs(60));
        assert_eq!(config.response_max_body_bytes, 1024 * 1024);
    }

    #[test]
    fn redis_without_url_is_disabled() {
        let config = CacheConfig::default();
        assert!(!config.is_enabled());
    }

    #[test]
    fn redis_with_empty_url_is_disabled() {
        let config = CacheConfig {
            url: Some(String::new()),
            ..Default::default()
        };
        assert!(!config.is_enabled());
    }

    #[test]
    fn memory_backend_is_always_enabled() {
        let config = CacheConfig {
            backend: CacheBackend::Memory,
            ..Default::default()
        };
        assert!(config.is_enabled());
    }
}
